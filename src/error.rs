//! Crate-level error types shared by the policies, credentials, and client.

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	challenge::ChallengeParseError,
	credential::{IdentifierError, ScopeValidationError},
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs; one variant per failure category.
#[derive(Debug, ThisError)]
pub enum Error {
	/// A `WWW-Authenticate` header violated the challenge grammar.
	#[error(transparent)]
	Challenge(#[from] ChallengeParseError),
	/// Caller or environment misconfiguration detected before dispatch.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// The remote service answered with a non-conforming response.
	#[error(transparent)]
	Protocol(#[from] ProtocolError),
	/// Token retrieval or credential material failure.
	#[error(transparent)]
	Credential(#[from] CredentialError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Request validation failures; these never resolve by retrying.
#[derive(Debug, ThisError)]
pub enum ValidationError {
	/// The outgoing request lacks the API version query parameter.
	#[error("Request is missing the `{parameter}` query parameter.")]
	MissingApiVersion {
		/// Name of the expected query parameter.
		parameter: String,
	},
	/// The outgoing request does not carry an identity URL extension.
	#[error("Request does not carry an identity URL.")]
	InvalidContextValue,
	/// The identity URL could not be parsed.
	#[error("Identity URL `{value}` is not a valid URL.")]
	InvalidUrl {
		/// Raw identity URL supplied by the caller.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The identity URL does not use `https`.
	#[error("Identity URL `{url}` does not use the https scheme.")]
	NotHttps {
		/// Offending URL.
		url: String,
	},
	/// The identity URL host is outside the expected domain.
	#[error("Identity URL `{url}` is not within the expected domain `{expected}`.")]
	InvalidDomain {
		/// Offending URL.
		url: String,
		/// Host suffix required by the configured cloud.
		expected: &'static str,
	},
	/// A client request failed field validation.
	#[error("Request is invalid: {reason}.")]
	InvalidRequest {
		/// Description of the failed rule.
		reason: String,
	},
}

/// Non-conforming responses from the data-plane API.
#[derive(Debug, ThisError)]
pub enum ProtocolError {
	/// No usable `authorization` parameter was found in the challenges.
	#[error("Authentication challenge is invalid: {reason}.")]
	InvalidAuthHeader {
		/// Description of what was missing or malformed.
		reason: String,
	},
	/// The authorization URL has no tenant path segment.
	#[error("Authorization URL `{url}` does not carry a tenant ID.")]
	InvalidTenantId {
		/// Authorization URL taken from the challenge.
		url: String,
	},
	/// The data-plane API answered with a non-success status.
	#[error("Data-plane API returned HTTP {status}: {message}")]
	UnexpectedStatus {
		/// HTTP status code.
		status: u16,
		/// Service-supplied error message.
		message: String,
	},
	/// The data-plane API answered with malformed JSON.
	#[error("Data-plane API returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// The number of returned identities differs from the number requested.
	#[error("Data-plane API returned {found} identities instead of {expected}.")]
	IdentityCountMismatch {
		/// Number of requested resource IDs.
		expected: usize,
		/// Number of identities in the response.
		found: usize,
	},
	/// A returned identity omitted a field.
	#[error("Returned identity is missing the `{field}` field.")]
	MissingIdentityField {
		/// Name of the missing JSON field.
		field: &'static str,
	},
	/// A requested resource ID is absent from the response.
	#[error("Requested resource ID `{resource_id}` was not found in the response.")]
	ResourceIdMismatch {
		/// Requested resource ID.
		resource_id: String,
	},
}

/// Credential loading and token retrieval failures.
#[derive(Debug, ThisError)]
pub enum CredentialError {
	/// No credential is available to serve the request.
	#[error("Credential is unavailable: {reason}.")]
	Unavailable {
		/// Description of why no token could be produced.
		reason: String,
	},
	/// The credential file could not be read.
	#[error("Failed to read credential file `{}`.", .path.display())]
	Read {
		/// Path of the credential file.
		path: PathBuf,
		/// Underlying IO failure.
		#[source]
		source: std::io::Error,
	},
	/// The credential record is not valid JSON for the expected shape.
	#[error("Credential record is malformed.")]
	Record {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// The credential record omitted a required field.
	#[error("Credential record is missing the `{field}` field.")]
	MissingField {
		/// Name of the missing JSON field.
		field: &'static str,
	},
	/// The `not_before` field is not an RFC 3339 timestamp.
	#[error("Credential record carries an invalid not_before timestamp `{value}`.")]
	InvalidNotBefore {
		/// Raw timestamp value.
		value: String,
	},
	/// A tenant or client identifier is malformed.
	#[error(transparent)]
	Identifier(#[from] IdentifierError),
	/// Requested scopes are malformed.
	#[error(transparent)]
	Scope(#[from] ScopeValidationError),
	/// The authentication endpoint is not a valid URL.
	#[error("Authentication endpoint `{value}` is not a valid URL.")]
	InvalidAuthority {
		/// Raw endpoint value.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The client secret is not valid base64.
	#[error("Failed to decode the client secret.")]
	DecodeSecret {
		/// Underlying decoding failure.
		#[source]
		source: base64::DecodeError,
	},
	/// The decoded client secret is not a readable PKCS#12 archive.
	#[error("Failed to parse the certificate: {reason}.")]
	ParseCertificate {
		/// Description of the decoding failure.
		reason: String,
	},
	/// The PKCS#12 archive holds a non-RSA private key.
	#[error("PKCS#12 certificate must contain an RSA private key.")]
	NotRsaKey,
	/// The client assertion could not be signed.
	#[error("Failed to sign the client assertion.")]
	Assertion {
		/// Underlying signing failure.
		#[source]
		source: jsonwebtoken::errors::Error,
	},
	/// The token endpoint rejected or failed the exchange.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The token endpoint responded with JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// No identity in the credentials object matches the resource ID.
	#[error("Resource ID `{resource_id}` was not found in the user-assigned identities.")]
	ResourceIdNotFound {
		/// Requested resource ID.
		resource_id: String,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the remote endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the remote endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Configuration failures raised while building clients, policies, or requests.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A validated URL could not be converted into a request URI.
	#[error("URL `{value}` cannot be used as a request URI.")]
	InvalidUri {
		/// URL that failed conversion.
		value: String,
		/// Underlying conversion failure.
		#[source]
		source: oauth2::http::uri::InvalidUri,
	},
	/// The token endpoint URL is invalid.
	#[error("Token endpoint URL is invalid.")]
	InvalidTokenEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The audience is empty.
	#[error("Audience cannot be empty.")]
	EmptyAudience,
	/// The API version or its query parameter name is empty.
	#[error("API version and its query parameter name cannot be empty.")]
	EmptyApiVersion,
	/// The identity host pattern could not be compiled.
	#[error("Identity host pattern could not be compiled.")]
	HostPattern {
		/// Underlying regex failure.
		#[source]
		source: regex::Error,
	},
	/// The reload backstop interval must be positive.
	#[error("Backstop interval must be positive.")]
	NonPositiveBackstop,
	/// The reload backstop interval exceeds the supported maximum.
	#[error("Backstop interval cannot exceed {max}.")]
	BackstopOutOfRange {
		/// Largest accepted interval.
		max: Duration,
	},
	/// A background task was requested outside a Tokio runtime.
	#[error("A Tokio runtime is required to start the credential reloader.")]
	MissingRuntime,
	/// Request body serialization failed.
	#[error("Request body could not be serialized.")]
	Serialize(#[from] serde_json::Error),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}
