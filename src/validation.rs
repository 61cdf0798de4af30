//! Identity endpoint validation rules, parameterized by target cloud.

// crates.io
use regex::Regex;
// self
use crate::{
	_prelude::*,
	cloud::Cloud,
	error::{ConfigError, ValidationError},
};

/// Validates identity URLs against the host suffix of one cloud.
#[derive(Clone, Debug)]
pub struct EndpointValidator {
	expected_host_suffix: &'static str,
	host_pattern: Regex,
}
impl EndpointValidator {
	/// Builds the validator for `cloud`.
	///
	/// Hosts must match `(?i)^[^.]+[.]<suffix>$`, one label in front of the escaped suffix.
	pub fn for_cloud(cloud: Cloud) -> Result<Self, ConfigError> {
		let expected_host_suffix = cloud.msi_host_suffix();
		let host_pattern =
			Regex::new(&format!("(?i)^[^.]+[.]{}$", regex::escape(expected_host_suffix)))
				.map_err(|source| ConfigError::HostPattern { source })?;

		Ok(Self { expected_host_suffix, host_pattern })
	}

	/// Host suffix every identity URL must end with.
	pub fn expected_host_suffix(&self) -> &'static str {
		self.expected_host_suffix
	}

	/// Compiled host pattern for the configured cloud.
	pub fn host_pattern(&self) -> &Regex {
		&self.host_pattern
	}

	/// Requires the `https` scheme.
	pub fn validate_scheme(&self, url: &Url) -> Result<(), ValidationError> {
		if url.scheme() == "https" {
			Ok(())
		} else {
			Err(ValidationError::NotHttps { url: url.to_string() })
		}
	}

	/// Requires exactly one label in front of the expected host suffix.
	///
	/// An explicit port is part of the checked authority, so `host:port` never matches.
	pub fn validate_host(&self, url: &Url) -> Result<(), ValidationError> {
		let matches = match (url.host_str(), url.port()) {
			(Some(host), None) => self.host_pattern.is_match(host),
			_ => false,
		};

		if matches {
			Ok(())
		} else {
			Err(ValidationError::InvalidDomain {
				url: url.to_string(),
				expected: self.expected_host_suffix,
			})
		}
	}

	/// Scheme check followed by host check.
	pub fn validate_identity_url(&self, url: &Url) -> Result<(), ValidationError> {
		self.validate_scheme(url)?;
		self.validate_host(url)
	}

	/// Returns the non-empty value of `parameter` from a raw query string.
	pub fn validate_api_version_present(
		&self,
		query: Option<&str>,
		parameter: &str,
	) -> Result<String, ValidationError> {
		url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
			.find(|(key, _)| key == parameter)
			.map(|(_, value)| value.into_owned())
			.filter(|value| !value.is_empty())
			.ok_or_else(|| ValidationError::MissingApiVersion { parameter: parameter.to_owned() })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(raw: &str) -> Url {
		Url::parse(raw).expect("Test URL should parse.")
	}

	fn validator_for(cloud: Cloud) -> EndpointValidator {
		EndpointValidator::for_cloud(cloud).expect("Host pattern should compile.")
	}

	#[test]
	fn host_requires_exactly_one_label() {
		let validator = validator_for(Cloud::AzurePublic);

		assert!(validator.validate_host(&url("https://foo.identity.azure.net/x")).is_ok());
		assert!(validator.validate_host(&url("https://FOO.Identity.Azure.NET")).is_ok());
		assert!(validator.validate_host(&url("https://identity.azure.net/")).is_err());
		assert!(validator.validate_host(&url("https://a.b.identity.azure.net/")).is_err());
		assert!(validator.validate_host(&url("https://foo.identity.azure.com/")).is_err());
		assert!(validator.validate_host(&url("https://foo.evilidentity.azure.net/")).is_err());
		assert!(validator.validate_host(&url("https://foo.identity.azure.net:8443/")).is_err());
	}

	#[test]
	fn suffix_dots_are_literal() {
		let validator = validator_for(Cloud::AzurePublic);

		assert!(validator.host_pattern().is_match("foo.identity.azure.net"));
		assert!(!validator.host_pattern().is_match("foo.identityXazure.net"));
		assert!(validator.validate_host(&url("https://foo.identity-azure.net/")).is_err());
	}

	#[test]
	fn government_cloud_uses_its_own_suffix() {
		let validator = validator_for(Cloud::AzureUsGovernment);

		assert!(validator.validate_host(&url("https://foo.identity.usgovcloudapi.net")).is_ok());
		assert!(matches!(
			validator.validate_host(&url("https://foo.identity.azure.net")),
			Err(ValidationError::InvalidDomain { expected: "identity.usgovcloudapi.net", .. })
		));
		assert_eq!(
			validator_for(Cloud::from_identifier("nonsense")).expected_host_suffix(),
			"identity.azure.net"
		);
	}

	#[test]
	fn scheme_must_be_https() {
		let validator = validator_for(Cloud::default());

		assert!(validator.validate_scheme(&url("https://foo.identity.azure.net")).is_ok());
		assert!(matches!(
			validator.validate_identity_url(&url("http://foo.identity.azure.net")),
			Err(ValidationError::NotHttps { .. })
		));
	}

	#[test]
	fn api_version_must_be_present_and_non_empty() {
		let validator = validator_for(Cloud::default());
		let version = validator
			.validate_api_version_present(Some("k=v&api-version=2024-01-01"), "api-version")
			.expect("API version should be found.");

		assert_eq!(version, "2024-01-01");
		assert!(validator.validate_api_version_present(Some("api-version="), "api-version").is_err());
		assert!(validator.validate_api_version_present(None, "api-version").is_err());
		assert!(matches!(
			validator.validate_api_version_present(Some("other=1"), "api-version"),
			Err(ValidationError::MissingApiVersion { .. })
		));
	}
}
