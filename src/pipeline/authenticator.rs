//! Challenge-driven bearer authentication.
//!
//! The first dispatch goes out without an `Authorization` header. A `401` answer is
//! expected to carry a challenge whose `authorization` parameter points at the token
//! authority for the tenant (`https://login.example/<tenant>`). The policy requests a
//! token for `{audience}/.default` in that tenant and retries exactly once; whatever the
//! retry returns, including another `401`, goes back to the caller.

// crates.io
use oauth2::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	challenge::{self, Challenge},
	credential::{TenantId, TokenCredential, TokenRequestOptions},
	error::{CredentialError, ProtocolError},
	http::{self, Request},
	obs::{self, OpKind, OpOutcome, OpSpan},
	pipeline::{Next, Policy, PolicyFuture},
};

/// Authenticates requests with tokens from a [`TokenCredential`].
#[derive(Clone)]
pub struct AuthenticatorPolicy {
	credential: Arc<dyn TokenCredential>,
	audience: String,
}
impl AuthenticatorPolicy {
	/// Creates a policy requesting `{audience}/.default` tokens from `credential`.
	pub fn new(credential: Arc<dyn TokenCredential>, audience: impl Into<String>) -> Self {
		Self { credential, audience: audience.into() }
	}

	/// Scope requested for every authenticated retry.
	pub fn scope(&self) -> String {
		format!("{}/.default", self.audience)
	}

	async fn authenticate(&self, request: Request, next: Next<'_>) -> Result<http::Response> {
		let mut retry = http::clone_request(&request);
		let mut probe = request;

		probe.headers_mut().remove(AUTHORIZATION);

		let response = next.run(probe).await?;

		if response.status() != StatusCode::UNAUTHORIZED {
			return Ok(response);
		}

		let challenges = challenge::parse_headers(response.headers())?;
		let authority = authorization_url(&challenges)?;
		let tenant = tenant_from_authority(&authority)?;

		tracing::debug!(tenant = %tenant, "Received authentication challenge.");

		let options = TokenRequestOptions::new([self.scope()])
			.map_err(CredentialError::from)?
			.with_tenant(tenant);
		let token = self.credential.get_token(&options).await?;
		let mut value = HeaderValue::from_str(&token.token.bearer())
			.map_err(|_| ProtocolError::InvalidAuthHeader {
				reason: "token is not a valid header value".into(),
			})?;

		value.set_sensitive(true);
		retry.headers_mut().insert(AUTHORIZATION, value);

		next.run(retry).await
	}
}
impl Debug for AuthenticatorPolicy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthenticatorPolicy").field("audience", &self.audience).finish()
	}
}
impl Policy for AuthenticatorPolicy {
	fn handle<'a>(&'a self, request: Request, next: Next<'a>) -> PolicyFuture<'a> {
		const KIND: OpKind = OpKind::Authenticate;

		let span = OpSpan::new(KIND, "handle");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		Box::pin(span.instrument(async move {
			let result = self.authenticate(request, next).await;

			obs::record_result(KIND, &result);

			result
		}))
	}
}

/// First `authorization` parameter, across all challenges, that parses as a URL.
fn authorization_url(challenges: &[Challenge]) -> Result<Url, ProtocolError> {
	let mut last_invalid = None;

	for value in challenges.iter().filter_map(|c| c.parameter("authorization")) {
		match Url::parse(value) {
			Ok(url) => return Ok(url),
			Err(e) => last_invalid = Some(format!("authorization `{value}` is not a URL ({e})")),
		}
	}

	Err(ProtocolError::InvalidAuthHeader {
		reason: last_invalid
			.unwrap_or_else(|| "no challenge carries an authorization parameter".into()),
	})
}

/// Final non-empty path segment, lowercased.
fn tenant_from_authority(url: &Url) -> Result<TenantId, ProtocolError> {
	url.path_segments()
		.and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
		.and_then(|segment| TenantId::new(segment.to_lowercase()).ok())
		.ok_or_else(|| ProtocolError::InvalidTenantId { url: url.to_string() })
}
