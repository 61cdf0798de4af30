//! HTTP primitives shared by the request pipeline and token exchanges.
//!
//! Requests and responses are plain [`oauth2::http`] values with `Vec<u8>` bodies, so the
//! pipeline, the policies, and the `oauth2` token exchange all speak the same types.
//! [`Transport`] is the only dependency the pipeline has on an HTTP stack;
//! [`ReqwestHttpClient`] implements it and also hands out [`InstrumentedHandle`]s that
//! record [`ResponseMetadata`] for token-endpoint error mapping.

// std
use std::ops::Deref;
// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Outgoing request flowing through the pipeline.
pub type Request = HttpRequest;
/// Response returned by a transport.
pub type Response = HttpResponse;
/// Future returned by [`Transport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Response, TransportError>> + 'a + Send>>;

/// Dispatches a fully prepared request over the network.
pub trait Transport
where
	Self: Send + Sync,
{
	/// Sends `request` and resolves with the raw response, whatever its status.
	fn send(&self, request: Request) -> TransportFuture<'_>;
}

/// Captures metadata from the most recent HTTP response for downstream error mapping.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
	/// HTTP status code returned by the endpoint, if available.
	pub status: Option<u16>,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
}

/// Thread-safe slot for sharing [`ResponseMetadata`] between transport and error layers.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Stores new metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Returns the captured metadata, if any, consuming it from the slot.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds an instrumented `oauth2` HTTP client that captures response metadata.
	pub(crate) fn instrumented(&self, slot: ResponseMetadataSlot) -> InstrumentedHandle {
		InstrumentedHandle(Arc::new(InstrumentedHttpClient { client: self.0.clone(), slot }))
	}
}
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
impl Debug for ReqwestHttpClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("ReqwestHttpClient(..)")
	}
}
impl Transport for ReqwestHttpClient {
	fn send(&self, request: Request) -> TransportFuture<'_> {
		Box::pin(async move {
			let request = reqwest::Request::try_from(request)?;
			let response = self.0.execute(request).await?;
			let (response, _) = into_http_response(response).await?;

			Ok(response)
		})
	}
}

struct InstrumentedHttpClient {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}

/// `oauth2` HTTP client handle returned by [`ReqwestHttpClient`].
#[derive(Clone)]
pub struct InstrumentedHandle(Arc<InstrumentedHttpClient>);
impl<'c> AsyncHttpClient<'c> for InstrumentedHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send + Sync>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		let client = Arc::clone(&self.0);

		Box::pin(async move {
			client.slot.take();

			let response = client
				.client
				.execute(request.try_into().map_err(Box::new)?)
				.await
				.map_err(Box::new)?;
			let (response, meta) = into_http_response(response).await.map_err(Box::new)?;

			client.slot.store(meta);

			Ok(response)
		})
	}
}

/// Copies a request, including its extensions, so it can be dispatched again.
pub fn clone_request(request: &Request) -> Request {
	let mut copy = Request::new(request.body().clone());

	*copy.method_mut() = request.method().clone();
	*copy.uri_mut() = request.uri().clone();
	*copy.version_mut() = request.version();
	*copy.headers_mut() = request.headers().clone();
	*copy.extensions_mut() = request.extensions().clone();

	copy
}

async fn into_http_response(
	response: reqwest::Response,
) -> Result<(Response, ResponseMetadata), ReqwestError> {
	let status = response.status();
	let headers = response.headers().to_owned();
	let meta =
		ResponseMetadata { status: Some(status.as_u16()), retry_after: parse_retry_after(&headers) };
	let mut converted = Response::new(response.bytes().await?.to_vec());

	*converted.status_mut() = status;
	*converted.headers_mut() = headers;

	Ok((converted, meta))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
