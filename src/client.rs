//! Client for the managed identity data-plane API.
//!
//! [`ManagedIdentityClient`] sends every call through a [`Pipeline`] of
//! [`IdentityUrlPolicy`] then [`AuthenticatorPolicy`], so requests reach the caller's
//! identity URL and authenticate through the service challenge.

pub mod options;
pub mod request;

pub use options::{ClientOptions, ClientOptionsBuilder, DEFAULT_API_VERSION};
pub use request::UserAssignedMsiRequest;

// crates.io
use oauth2::http::{
	self as http_types, Method, StatusCode,
	header::{ACCEPT, CONTENT_TYPE},
};
// self
use crate::{
	_prelude::*,
	credential::{ManagedIdentityCredentials, TokenCredential, UserAssignedIdentities},
	error::{ConfigError, ProtocolError},
	http::{ReqwestHttpClient, Request, Response, Transport},
	obs::{self, OpKind, OpOutcome, OpSpan},
	pipeline::{AuthenticatorPolicy, IdentityUrl, IdentityUrlPolicy, Pipeline, Policy},
};

// Replaced by the identity URL before dispatch.
const PLACEHOLDER_ENDPOINT: &str = "https://management.azure.com";
const UNKNOWN_ERROR: &str = "An unknown error occurred.";

/// Retrieves user-assigned identity credentials from the data-plane API.
#[derive(Clone, Debug)]
pub struct ManagedIdentityClient {
	options: ClientOptions,
	pipeline: Pipeline,
}
impl ManagedIdentityClient {
	/// Creates a client dispatching over a default reqwest transport.
	pub fn new(
		options: ClientOptions,
		credential: Arc<dyn TokenCredential>,
	) -> Result<Self, ConfigError> {
		Self::with_transport(options, credential, Arc::new(ReqwestHttpClient::default()))
	}

	/// Creates a client dispatching over `transport`.
	pub fn with_transport(
		options: ClientOptions,
		credential: Arc<dyn TokenCredential>,
		transport: Arc<dyn Transport>,
	) -> Result<Self, ConfigError> {
		let policies: Vec<Arc<dyn Policy>> = vec![
			Arc::new(
				IdentityUrlPolicy::new(options.cloud)?
					.with_api_version_parameter(options.api_version_parameter.clone()),
			),
			Arc::new(AuthenticatorPolicy::new(credential, options.audience.clone())),
		];

		Ok(Self { pipeline: Pipeline::new(policies, transport), options })
	}

	/// Options the client was built with.
	pub fn options(&self) -> &ClientOptions {
		&self.options
	}

	/// Fetches the credentials of every identity in `request`.
	///
	/// The response must hold exactly the requested identities with every field populated.
	/// Identities without a tenant ID inherit the request's.
	pub async fn get_user_assigned_identities(
		&self,
		request: &UserAssignedMsiRequest,
	) -> Result<UserAssignedIdentities> {
		const KIND: OpKind = OpKind::GetCredentials;

		let span = OpSpan::new(KIND, "get_user_assigned_identities");

		obs::record_op_outcome(KIND, OpOutcome::Attempt);

		let result = span.instrument(self.fetch(request)).await;

		obs::record_result(KIND, &result);

		result
	}

	async fn fetch(&self, request: &UserAssignedMsiRequest) -> Result<UserAssignedIdentities> {
		request.validate()?;

		let response = self.pipeline.send(self.build_request(request)?).await?;
		let credentials = parse_credentials(&response)?;
		let credentials = check_identities(credentials, request)?;

		Ok(UserAssignedIdentities { credentials, cloud: self.options.cloud })
	}

	fn build_request(&self, request: &UserAssignedMsiRequest) -> Result<Request> {
		let query = url::form_urlencoded::Serializer::new(String::new())
			.append_pair(&self.options.api_version_parameter, &self.options.api_version)
			.finish();
		let body = serde_json::to_vec(&CredentialsRequest { identity_ids: &request.resource_ids })
			.map_err(ConfigError::from)?;

		http_types::Request::builder()
			.method(Method::POST)
			.uri(format!("{PLACEHOLDER_ENDPOINT}/?{query}"))
			.header(ACCEPT, "application/json")
			.header(CONTENT_TYPE, "application/json")
			.extension(IdentityUrl::new(request.identity_url.as_str()))
			.body(body)
			.map_err(|e| ConfigError::from(e).into())
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsRequest<'a> {
	identity_ids: &'a [String],
}

#[derive(Deserialize)]
struct ErrorEnvelope {
	error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
	message: Option<String>,
}

fn parse_credentials(response: &Response) -> Result<ManagedIdentityCredentials, ProtocolError> {
	let status = response.status();

	if status != StatusCode::OK {
		let message = serde_json::from_slice::<ErrorEnvelope>(response.body())
			.ok()
			.and_then(|envelope| envelope.error)
			.and_then(|error| error.message)
			.filter(|message| !message.is_empty())
			.unwrap_or_else(|| UNKNOWN_ERROR.into());

		return Err(ProtocolError::UnexpectedStatus { status: status.as_u16(), message });
	}

	let mut de = serde_json::Deserializer::from_slice(response.body());

	serde_path_to_error::deserialize(&mut de).map_err(|source| ProtocolError::ResponseParse { source })
}

fn check_identities(
	mut credentials: ManagedIdentityCredentials,
	request: &UserAssignedMsiRequest,
) -> Result<ManagedIdentityCredentials, ProtocolError> {
	let identities = credentials.explicit_identities.get_or_insert_default();

	if identities.len() != request.resource_ids.len() {
		return Err(ProtocolError::IdentityCountMismatch {
			expected: request.resource_ids.len(),
			found: identities.len(),
		});
	}

	for identity in identities.iter_mut() {
		if let Some(field) = identity.missing_field() {
			return Err(ProtocolError::MissingIdentityField { field });
		}
		if identity.tenant_id.as_deref().is_some_and(str::is_empty) {
			identity.tenant_id = Some(request.tenant_id.clone());
		}
	}

	for resource_id in &request.resource_ids {
		if !identities.iter().any(|identity| identity.resource_id.as_ref() == Some(resource_id)) {
			return Err(ProtocolError::ResourceIdMismatch { resource_id: resource_id.clone() });
		}
	}

	Ok(credentials)
}
