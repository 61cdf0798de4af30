//! JSON models of the credential records issued by the data-plane API.
//!
//! Every field is optional on the wire. Callers decide which ones they need:
//! the reloader only requires what a [`ClientCertificateCredential`] is built from, while
//! identities returned to [`ManagedIdentityClient`] must be complete.
//!
//! [`ClientCertificateCredential`]: crate::credential::ClientCertificateCredential
//! [`ManagedIdentityClient`]: crate::client::ManagedIdentityClient

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{_prelude::*, cloud::Cloud, error::CredentialError};

/// Claims stamped into issued credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomClaims {
	/// Network perimeter IDs.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub xms_az_nwperimid: Option<Vec<String>>,
	/// Trust mode.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub xms_az_tm: Option<String>,
}

/// Certificate-bearing credential record of one user-assigned identity.
///
/// This is also the format of the credential file watched by [`ReloadingCredential`].
///
/// [`ReloadingCredential`]: crate::credential::ReloadingCredential
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAssignedIdentityCredentials {
	/// Token authority host for this identity.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub authentication_endpoint: Option<String>,
	/// Instant after which the credential cannot be renewed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cannot_renew_after: Option<String>,
	/// Application (client) ID.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	/// Base64 PKCS#12 archive holding the certificate and private key.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret: Option<String>,
	/// URL to refresh the credential from.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_secret_url: Option<String>,
	/// Custom claims.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub custom_claims: Option<CustomClaims>,
	/// Token authority host for mutual TLS.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mtls_authentication_endpoint: Option<String>,
	/// Certificate expiry.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub not_after: Option<String>,
	/// Certificate start of validity; orders credential versions.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub not_before: Option<String>,
	/// Object (principal) ID.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub object_id: Option<String>,
	/// Instant after which renewal is recommended.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub renew_after: Option<String>,
	/// Resource ID of the identity.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_id: Option<String>,
	/// Tenant the identity lives in.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tenant_id: Option<String>,
}
impl UserAssignedIdentityCredentials {
	/// Parses a record, keeping the JSON path of any failure.
	pub fn from_json_slice(bytes: &[u8]) -> Result<Self, CredentialError> {
		let mut de = serde_json::Deserializer::from_slice(bytes);

		serde_path_to_error::deserialize(&mut de).map_err(|source| CredentialError::Record { source })
	}

	/// Parses `not_before` as an RFC 3339 timestamp.
	pub fn not_before(&self) -> Result<OffsetDateTime, CredentialError> {
		let raw = self.not_before.as_deref().ok_or(CredentialError::MissingField { field: "not_before" })?;

		OffsetDateTime::parse(raw, &Rfc3339)
			.map_err(|_| CredentialError::InvalidNotBefore { value: raw.to_owned() })
	}

	/// Returns the required field or a [`CredentialError::MissingField`].
	pub(crate) fn require<'a>(
		value: &'a Option<String>,
		field: &'static str,
	) -> Result<&'a str, CredentialError> {
		value.as_deref().ok_or(CredentialError::MissingField { field })
	}

	/// Name of the first absent field, if any.
	pub fn missing_field(&self) -> Option<&'static str> {
		let strings = [
			(&self.authentication_endpoint, "authentication_endpoint"),
			(&self.cannot_renew_after, "cannot_renew_after"),
			(&self.client_id, "client_id"),
			(&self.client_secret, "client_secret"),
			(&self.client_secret_url, "client_secret_url"),
			(&self.mtls_authentication_endpoint, "mtls_authentication_endpoint"),
			(&self.not_after, "not_after"),
			(&self.not_before, "not_before"),
			(&self.object_id, "object_id"),
			(&self.renew_after, "renew_after"),
			(&self.resource_id, "resource_id"),
			(&self.tenant_id, "tenant_id"),
		];

		strings
			.into_iter()
			.find_map(|(value, field)| value.is_none().then_some(field))
			.or_else(|| self.custom_claims.is_none().then_some("custom_claims"))
	}
}
impl Debug for UserAssignedIdentityCredentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("UserAssignedIdentityCredentials")
			.field("authentication_endpoint", &self.authentication_endpoint)
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("not_before", &self.not_before)
			.field("not_after", &self.not_after)
			.field("resource_id", &self.resource_id)
			.field("tenant_id", &self.tenant_id)
			.finish_non_exhaustive()
	}
}

/// Resource an identity has been delegated to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedResource {
	/// Delegation ID.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delegation_id: Option<String>,
	/// Delegation URL.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delegation_url: Option<String>,
	/// User-assigned identities of the delegated resource.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub explicit_identities: Option<Vec<UserAssignedIdentityCredentials>>,
	/// System-assigned identity of the delegated resource.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub implicit_identity: Option<UserAssignedIdentityCredentials>,
	/// Internal ID.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub internal_id: Option<String>,
	/// Resource ID.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_id: Option<String>,
}

/// Credentials object of a system- or user-assigned identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedIdentityCredentials {
	/// Fields shared with a single identity record.
	#[serde(flatten)]
	pub identity: UserAssignedIdentityCredentials,
	/// Delegated resources.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delegated_resources: Option<Vec<DelegatedResource>>,
	/// Delegation URL.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delegation_url: Option<String>,
	/// User-assigned identities.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub explicit_identities: Option<Vec<UserAssignedIdentityCredentials>>,
	/// Internal ID.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub internal_id: Option<String>,
}
impl ManagedIdentityCredentials {
	/// True when the object carries user-assigned identities.
	pub fn is_user_assigned(&self) -> bool {
		self.explicit_identities.as_ref().is_some_and(|ids| !ids.is_empty())
	}

	/// User-assigned identities, empty for system-assigned objects.
	pub fn explicit_identities(&self) -> &[UserAssignedIdentityCredentials] {
		self.explicit_identities.as_deref().unwrap_or_default()
	}
}

/// User-assigned identities returned by the data-plane API, bound to a cloud.
#[derive(Clone, Debug)]
pub struct UserAssignedIdentities {
	/// Response credentials object.
	pub credentials: ManagedIdentityCredentials,
	/// Cloud the identities belong to.
	pub cloud: Cloud,
}
impl UserAssignedIdentities {
	/// Finds the identity record for `resource_id`.
	pub fn identity(&self, resource_id: &str) -> Result<&UserAssignedIdentityCredentials, CredentialError> {
		self.credentials
			.explicit_identities()
			.iter()
			.find(|identity| identity.resource_id.as_deref() == Some(resource_id))
			.ok_or_else(|| CredentialError::ResourceIdNotFound { resource_id: resource_id.to_owned() })
	}
}
