//! Request pipeline: an ordered list of [`Policy`] middleware in front of a [`Transport`].
//!
//! Each policy receives the request plus a [`Next`] handle for the remaining stages and
//! decides whether (and how many times) to call it. The last stage is the transport.

pub mod authenticator;
pub mod identity_url;

pub use authenticator::AuthenticatorPolicy;
pub use identity_url::{API_VERSION_PARAMETER, IdentityUrl, IdentityUrlPolicy};

// self
use crate::{
	_prelude::*,
	http::{Request, Response, Transport},
};

/// Future returned by [`Policy::handle`] and [`Next::run`].
pub type PolicyFuture<'a> = Pin<Box<dyn Future<Output = Result<Response>> + 'a + Send>>;

/// Middleware stage able to rewrite, short-circuit, or repeat a request.
pub trait Policy
where
	Self: Send + Sync,
{
	/// Handles `request`, delegating to `next` for the remaining stages.
	fn handle<'a>(&'a self, request: Request, next: Next<'a>) -> PolicyFuture<'a>;
}

/// Remaining pipeline stages after the current policy.
#[derive(Clone, Copy)]
pub struct Next<'a> {
	policies: &'a [Arc<dyn Policy>],
	transport: &'a dyn Transport,
}
impl<'a> Next<'a> {
	/// Chains `policies` in front of `transport`; an empty slice dispatches directly.
	pub fn new(policies: &'a [Arc<dyn Policy>], transport: &'a dyn Transport) -> Self {
		Self { policies, transport }
	}

	/// Runs the next stage.
	pub fn run(self, request: Request) -> PolicyFuture<'a> {
		match self.policies.split_first() {
			Some((policy, rest)) =>
				policy.handle(request, Next { policies: rest, transport: self.transport }),
			None => {
				let transport = self.transport;

				Box::pin(async move { transport.send(request).await.map_err(Error::from) })
			},
		}
	}
}
impl Debug for Next<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Next").field("remaining_policies", &self.policies.len()).finish()
	}
}

/// Owned pipeline holding its policies and transport.
#[derive(Clone)]
pub struct Pipeline {
	policies: Vec<Arc<dyn Policy>>,
	transport: Arc<dyn Transport>,
}
impl Pipeline {
	/// Creates a pipeline running `policies` in order before `transport`.
	pub fn new(policies: Vec<Arc<dyn Policy>>, transport: Arc<dyn Transport>) -> Self {
		Self { policies, transport }
	}

	/// Sends `request` through every policy and the transport.
	pub fn send(&self, request: Request) -> PolicyFuture<'_> {
		Next::new(&self.policies, self.transport.as_ref()).run(request)
	}
}
impl Debug for Pipeline {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Pipeline").field("policies", &self.policies.len()).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::http::{HeaderValue, StatusCode};
	// self
	use super::*;
	use crate::_preludet::RecordingTransport;

	struct Tag(&'static str);
	impl Policy for Tag {
		fn handle<'a>(&'a self, mut request: Request, next: Next<'a>) -> PolicyFuture<'a> {
			request.headers_mut().append("x-order", HeaderValue::from_static(self.0));

			next.run(request)
		}
	}

	#[tokio::test]
	async fn policies_run_in_order_before_transport() {
		let transport = Arc::new(RecordingTransport::new([StatusCode::NO_CONTENT]));
		let pipeline = Pipeline::new(
			vec![Arc::new(Tag("first")), Arc::new(Tag("second"))],
			transport.clone(),
		);
		let response = pipeline.send(Request::new(Vec::new())).await.expect("Pipeline should succeed.");

		assert_eq!(response.status(), StatusCode::NO_CONTENT);

		let sent = transport.requests();
		let order = sent[0].headers().get_all("x-order").iter().collect::<Vec<_>>();

		assert_eq!(order, ["first", "second"]);
	}
}
