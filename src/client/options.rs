//! Client configuration: audience, cloud, and data-plane API version.

// self
use crate::{
	_prelude::*,
	cloud::Cloud,
	error::ConfigError,
	pipeline::API_VERSION_PARAMETER,
};

/// Data-plane API version sent when none is configured.
pub const DEFAULT_API_VERSION: &str = "2024-01-01";

/// Validated configuration of a [`ManagedIdentityClient`](crate::client::ManagedIdentityClient).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientOptions {
	/// Audience of the data-plane API; tokens are requested for `{audience}/.default`.
	pub audience: String,
	/// Cloud whose identity hosts are accepted.
	pub cloud: Cloud,
	/// API version sent with every request.
	pub api_version: String,
	/// Query parameter carrying [`api_version`](Self::api_version).
	pub api_version_parameter: String,
}
impl ClientOptions {
	/// Starts a builder for `audience`.
	pub fn builder(audience: impl Into<String>) -> ClientOptionsBuilder {
		ClientOptionsBuilder::new(audience)
	}
}

/// Builder for [`ClientOptions`].
#[derive(Debug)]
pub struct ClientOptionsBuilder {
	/// Audience of the data-plane API.
	pub audience: String,
	/// Target cloud.
	pub cloud: Cloud,
	/// API version.
	pub api_version: String,
	/// API version query parameter name.
	pub api_version_parameter: String,
}
impl ClientOptionsBuilder {
	/// Creates a builder for the public cloud and [`DEFAULT_API_VERSION`].
	pub fn new(audience: impl Into<String>) -> Self {
		Self {
			audience: audience.into(),
			cloud: Cloud::default(),
			api_version: DEFAULT_API_VERSION.into(),
			api_version_parameter: API_VERSION_PARAMETER.into(),
		}
	}

	/// Sets the target cloud.
	pub fn cloud(mut self, cloud: Cloud) -> Self {
		self.cloud = cloud;

		self
	}

	/// Overrides the API version.
	pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
		self.api_version = api_version.into();

		self
	}

	/// Overrides the API version query parameter name.
	pub fn api_version_parameter(mut self, name: impl Into<String>) -> Self {
		self.api_version_parameter = name.into();

		self
	}

	/// Consumes the builder and validates the options.
	pub fn build(self) -> Result<ClientOptions, ConfigError> {
		if self.audience.trim().is_empty() {
			return Err(ConfigError::EmptyAudience);
		}
		if self.api_version.trim().is_empty() || self.api_version_parameter.trim().is_empty() {
			return Err(ConfigError::EmptyApiVersion);
		}

		Ok(ClientOptions {
			audience: self.audience,
			cloud: self.cloud,
			api_version: self.api_version,
			api_version_parameter: self.api_version_parameter,
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn builder_applies_defaults() {
		let options = ClientOptions::builder("https://dataplane.example")
			.build()
			.expect("Options should build.");

		assert_eq!(options.cloud, Cloud::AzurePublic);
		assert_eq!(options.api_version, DEFAULT_API_VERSION);
		assert_eq!(options.api_version_parameter, "api-version");
	}

	#[test]
	fn builder_rejects_empty_values() {
		assert!(matches!(ClientOptions::builder(" ").build(), Err(ConfigError::EmptyAudience)));
		assert!(matches!(
			ClientOptions::builder("https://dataplane.example").api_version("").build(),
			Err(ConfigError::EmptyApiVersion)
		));
		assert!(matches!(
			ClientOptions::builder("https://dataplane.example").api_version_parameter("").build(),
			Err(ConfigError::EmptyApiVersion)
		));
	}
}
