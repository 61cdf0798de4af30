//! Cloud environments and the endpoints each one implies.

// self
use crate::_prelude::*;

/// Identifier string for the public cloud.
pub const AZURE_PUBLIC_CLOUD: &str = "AZUREPUBLICCLOUD";
/// Identifier string for the US Government cloud.
pub const AZURE_US_GOVERNMENT_CLOUD: &str = "AZUREUSGOVERNMENTCLOUD";

/// Target cloud selecting the managed identity host suffix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cloud {
	/// Public cloud.
	#[default]
	AzurePublic,
	/// US Government cloud.
	AzureUsGovernment,
}
impl Cloud {
	/// Resolves a cloud identifier; unknown or empty identifiers map to the public cloud.
	pub fn from_identifier(identifier: &str) -> Self {
		match identifier {
			AZURE_US_GOVERNMENT_CLOUD => Self::AzureUsGovernment,
			_ => Self::AzurePublic,
		}
	}

	/// Returns the canonical identifier string.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AzurePublic => AZURE_PUBLIC_CLOUD,
			Self::AzureUsGovernment => AZURE_US_GOVERNMENT_CLOUD,
		}
	}

	/// Host suffix that regional managed identity endpoints must live under.
	pub const fn msi_host_suffix(self) -> &'static str {
		match self {
			Self::AzurePublic => "identity.azure.net",
			Self::AzureUsGovernment => "identity.usgovcloudapi.net",
		}
	}
}
impl Display for Cloud {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl From<&str> for Cloud {
	fn from(value: &str) -> Self {
		Self::from_identifier(value)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn unknown_identifiers_fall_back_to_public() {
		assert_eq!(Cloud::from_identifier(AZURE_PUBLIC_CLOUD), Cloud::AzurePublic);
		assert_eq!(Cloud::from_identifier(AZURE_US_GOVERNMENT_CLOUD), Cloud::AzureUsGovernment);
		assert_eq!(Cloud::from_identifier(""), Cloud::AzurePublic);
		assert_eq!(Cloud::from_identifier("AZURECHINACLOUD"), Cloud::AzurePublic);
		assert_eq!(Cloud::from("azureusgovernmentcloud"), Cloud::AzurePublic);
	}

	#[test]
	fn suffixes_follow_cloud() {
		assert_eq!(Cloud::AzurePublic.msi_host_suffix(), "identity.azure.net");
		assert_eq!(Cloud::AzureUsGovernment.msi_host_suffix(), "identity.usgovcloudapi.net");
		assert_eq!(Cloud::AzureUsGovernment.to_string(), AZURE_US_GOVERNMENT_CLOUD);
	}
}
