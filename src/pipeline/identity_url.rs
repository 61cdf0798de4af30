//! Binds each outgoing request to the caller-supplied identity URL.
//!
//! The generated request targets a placeholder host and carries the API version in its
//! query string. This policy swaps the URL for the [`IdentityUrl`] attached to the
//! request, after checking it against the [`EndpointValidator`] of the configured cloud,
//! and carries the API version over.

// crates.io
use oauth2::http::{HeaderValue, Uri, header::HOST};
// self
use crate::{
	_prelude::*,
	cloud::Cloud,
	error::{ConfigError, ValidationError},
	http::Request,
	obs::{self, OpKind, OpOutcome, OpSpan},
	pipeline::{Next, Policy, PolicyFuture},
	validation::EndpointValidator,
};

/// Query parameter carrying the data-plane API version.
pub const API_VERSION_PARAMETER: &str = "api-version";

/// Identity URL attached to a request as a typed extension.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IdentityUrl(String);
impl IdentityUrl {
	/// Wraps the raw identity URL; parsing and validation happen in the policy.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the raw URL string.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

/// Rewrites the request URL to the validated identity URL.
#[derive(Clone, Debug)]
pub struct IdentityUrlPolicy {
	validator: EndpointValidator,
	api_version_parameter: String,
}
impl IdentityUrlPolicy {
	/// Creates a policy validating against `cloud`.
	pub fn new(cloud: Cloud) -> Result<Self, ConfigError> {
		Ok(Self {
			validator: EndpointValidator::for_cloud(cloud)?,
			api_version_parameter: API_VERSION_PARAMETER.into(),
		})
	}

	/// Overrides the API version query parameter name.
	pub fn with_api_version_parameter(mut self, name: impl Into<String>) -> Self {
		self.api_version_parameter = name.into();

		self
	}

	/// Applies the rewrite in place; the extension itself is left untouched.
	pub fn rewrite(&self, request: &mut Request) -> Result<()> {
		let api_version = self
			.validator
			.validate_api_version_present(request.uri().query(), &self.api_version_parameter)?;
		let raw = request
			.extensions()
			.get::<IdentityUrl>()
			.ok_or(ValidationError::InvalidContextValue)?
			.as_str();
		let mut url = Url::parse(raw)
			.map_err(|source| ValidationError::InvalidUrl { value: raw.to_owned(), source })?;

		self.validator.validate_identity_url(&url)?;
		merge_query(&mut url, &self.api_version_parameter, &api_version);

		let uri = url
			.as_str()
			.parse::<Uri>()
			.map_err(|source| ConfigError::InvalidUri { value: url.to_string(), source })?;
		let host = HeaderValue::from_str(url.host_str().unwrap_or_default())
			.map_err(|e| ConfigError::HttpRequest(e.into()))?;

		*request.uri_mut() = uri;
		request.headers_mut().insert(HOST, host);

		tracing::debug!(url = %url, "Bound request to identity URL.");

		Ok(())
	}
}
impl Policy for IdentityUrlPolicy {
	fn handle<'a>(&'a self, mut request: Request, next: Next<'a>) -> PolicyFuture<'a> {
		const KIND: OpKind = OpKind::InjectIdentityUrl;

		let span = OpSpan::new(KIND, "handle");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		Box::pin(span.instrument(async move {
			let rewritten = self.rewrite(&mut request);

			obs::record_result(KIND, &rewritten);
			rewritten?;

			next.run(request).await
		}))
	}
}

/// Sets `name=value` (replacing any existing values) and sorts pairs by key.
fn merge_query(url: &mut Url, name: &str, value: &str) {
	let mut pairs = url
		.query_pairs()
		.filter(|(key, _)| key != name)
		.map(|(key, value)| (key.into_owned(), value.into_owned()))
		.collect::<Vec<_>>();

	pairs.push((name.to_owned(), value.to_owned()));
	pairs.sort_by(|a, b| a.0.cmp(&b.0));
	url.query_pairs_mut().clear().extend_pairs(pairs);
}
