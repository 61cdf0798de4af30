//! Request model for fetching user-assigned identity credentials.

// self
use crate::{_prelude::*, credential::id, error::ValidationError};

const RESOURCE_PROVIDER: &str = "Microsoft.ManagedIdentity";
const RESOURCE_TYPE: &str = "userAssignedIdentities";

/// Request for the credentials of one or more user-assigned identities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAssignedMsiRequest {
	/// Identity URL of the resource the identities are assigned to.
	pub identity_url: String,
	/// Resource IDs of the requested identities.
	pub resource_ids: Vec<String>,
	/// Tenant the identities live in.
	pub tenant_id: String,
}
impl UserAssignedMsiRequest {
	/// Checks the request before anything is sent.
	pub fn validate(&self) -> Result<(), ValidationError> {
		if !is_http_url(&self.identity_url) {
			return Err(invalid(format!("identity URL `{}` is not an http(s) URL", self.identity_url)));
		}
		if self.resource_ids.is_empty() {
			return Err(invalid("at least one resource ID is required".into()));
		}
		if let Some(resource_id) = self.resource_ids.iter().find(|id| !is_user_assigned_identity(id)) {
			return Err(invalid(format!(
				"resource ID `{resource_id}` is not a user-assigned identity"
			)));
		}
		if !id::is_guid(&self.tenant_id) {
			return Err(invalid(format!("tenant ID `{}` is not a GUID", self.tenant_id)));
		}

		Ok(())
	}
}

fn invalid(reason: String) -> ValidationError {
	ValidationError::InvalidRequest { reason }
}

fn is_http_url(value: &str) -> bool {
	Url::parse(value)
		.is_ok_and(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
}

/// Matches `/subscriptions/{s}/resourceGroups/{g}/providers/Microsoft.ManagedIdentity/userAssignedIdentities/{n}`.
fn is_user_assigned_identity(resource_id: &str) -> bool {
	let Some(path) = resource_id.strip_prefix('/') else {
		return false;
	};
	let segments = path.split('/').collect::<Vec<_>>();
	let [subscriptions, subscription, groups, group, providers, provider, kind, name] =
		segments.as_slice()
	else {
		return false;
	};

	subscriptions.eq_ignore_ascii_case("subscriptions")
		&& groups.eq_ignore_ascii_case("resourceGroups")
		&& providers.eq_ignore_ascii_case("providers")
		&& provider.eq_ignore_ascii_case(RESOURCE_PROVIDER)
		&& kind.eq_ignore_ascii_case(RESOURCE_TYPE)
		&& [subscription, group, name].iter().all(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	const RESOURCE_ID: &str = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/id-a";

	fn request() -> UserAssignedMsiRequest {
		UserAssignedMsiRequest {
			identity_url: "https://test.identity.azure.net/path".into(),
			resource_ids: vec![RESOURCE_ID.into()],
			tenant_id: "5d929ae3-b37c-46aa-a3c8-c1558902f101".into(),
		}
	}

	#[test]
	fn valid_request_passes() {
		request().validate().expect("Request should be valid.");
	}

	#[test]
	fn resource_id_keywords_are_case_insensitive() {
		assert!(is_user_assigned_identity(
			"/SUBSCRIPTIONS/s/resourcegroups/g/providers/microsoft.managedidentity/USERASSIGNEDIDENTITIES/n"
		));
		assert!(!is_user_assigned_identity(
			"/subscriptions/s/resourceGroups/g/providers/Microsoft.Compute/virtualMachines/n"
		));
		assert!(!is_user_assigned_identity(
			"subscriptions/s/resourceGroups/g/providers/Microsoft.ManagedIdentity/userAssignedIdentities/n"
		));
		assert!(!is_user_assigned_identity(
			"/subscriptions/s/resourceGroups//providers/Microsoft.ManagedIdentity/userAssignedIdentities/n"
		));
	}

	#[test]
	fn invalid_fields_are_rejected() {
		let cases: [fn(&mut UserAssignedMsiRequest); 5] = [
			|r| r.identity_url = String::new(),
			|r| r.identity_url = "ftp://test.identity.azure.net".into(),
			|r| r.resource_ids.clear(),
			|r| r.resource_ids.push("/subscriptions/s".into()),
			|r| r.tenant_id = "not-a-guid".into(),
		];

		for mutate in cases {
			let mut request = request();

			mutate(&mut request);

			assert!(matches!(request.validate(), Err(ValidationError::InvalidRequest { .. })));
		}
	}
}
