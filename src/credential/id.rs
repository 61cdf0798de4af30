//! Validated tenant and client identifiers.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use uuid::{Uuid, fmt::Hyphenated};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				validate($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier.
		kind: &'static str,
	},
	/// The identifier contains whitespace or control characters.
	#[error("{kind} identifier contains whitespace or control characters.")]
	InvalidCharacter {
		/// Kind of identifier.
		kind: &'static str,
	},
}

def_id! { TenantId, "Directory tenant a token is issued in.", "Tenant" }
def_id! { ClientId, "Application (client) ID of an identity.", "Client" }

/// Returns true for the canonical `8-4-4-4-12` hexadecimal GUID form.
pub fn is_guid(value: &str) -> bool {
	value.len() == Hyphenated::LENGTH && Uuid::try_parse(value).is_ok()
}

fn validate(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
		return Err(IdentifierError::InvalidCharacter { kind });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_empty_and_whitespace() {
		assert!(TenantId::new("").is_err());
		assert!(TenantId::new(" tenant").is_err());
		assert!(ClientId::new("client\u{00A0}id").is_err());

		let tenant = TenantId::new("5d929ae3-b37c-46aa-a3c8-c1558902f101")
			.expect("GUID tenant should be accepted.");

		assert_eq!(format!("{tenant:?}"), "Tenant(5d929ae3-b37c-46aa-a3c8-c1558902f101)");
	}

	#[test]
	fn serde_enforces_validation() {
		let client: ClientId =
			serde_json::from_str("\"client-1\"").expect("Client ID should deserialize.");

		assert_eq!(client.as_ref(), "client-1");
		assert!(serde_json::from_str::<ClientId>("\"\"").is_err());
	}

	#[test]
	fn guid_shape_is_checked() {
		assert!(is_guid("5D929AE3-B37C-46AA-A3C8-C1558902F101"));
		assert!(!is_guid("5D929AE3B37C46AAA3C8C1558902F101"));
		assert!(!is_guid("5D929AE3-B37C-46AA-A3C8-C1558902F101-0"));
		assert!(!is_guid("zzzzzzzz-b37c-46aa-a3c8-c1558902f101"));
		assert!(!is_guid("{5D929AE3-B37C-46AA-A3C8-C1558902F101}"));
		assert!(!is_guid("urn:uuid:5d929ae3-b37c-46aa-a3c8-c1558902f101"));
	}
}
