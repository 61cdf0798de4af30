//! Token-source contract and the credentials implementing it.

pub mod certificate;
pub mod id;
pub mod record;
pub mod reloading;
pub mod scope;

pub use certificate::{
	CertificateCredentialFactory, ClientCertificateCredential, ClientCertificateCredentialFactory,
};
pub use id::{ClientId, IdentifierError, TenantId};
pub use record::{
	CustomClaims, DelegatedResource, ManagedIdentityCredentials, UserAssignedIdentities,
	UserAssignedIdentityCredentials,
};
pub use reloading::{ReloadingCredential, ReloadingCredentialBuilder, ReloaderState};
pub use scope::{ScopeSet, ScopeValidationError};

// self
use crate::_prelude::*;

/// Future returned by [`TokenCredential::get_token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<AccessToken>> + 'a + Send>>;

/// Anything able to mint access tokens for a set of scopes.
///
/// Implementations must tolerate concurrent callers.
pub trait TokenCredential
where
	Self: Send + Sync,
{
	/// Returns a token valid for `options.scopes`, in `options.tenant_id` when set.
	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a>;
}

/// Parameters of a single token request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRequestOptions {
	/// Requested scopes.
	pub scopes: ScopeSet,
	/// Tenant override; the credential's own tenant applies when absent.
	pub tenant_id: Option<TenantId>,
}
impl TokenRequestOptions {
	/// Creates options for `scopes` without a tenant override.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Ok(Self { scopes: ScopeSet::new(scopes)?, tenant_id: None })
	}

	/// Sets the tenant override.
	pub fn with_tenant(mut self, tenant_id: TenantId) -> Self {
		self.tenant_id = Some(tenant_id);

		self
	}
}

/// Access token plus its absolute expiry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
	/// Secret token value.
	pub token: TokenSecret,
	/// Instant after which the token must not be used.
	pub expires_at: OffsetDateTime,
}
impl AccessToken {
	/// Wraps a token value and expiry.
	pub fn new(token: impl Into<String>, expires_at: OffsetDateTime) -> Self {
		Self { token: TokenSecret::new(token), expires_at }
	}

	/// True when the token expires within `skew` of `now`.
	pub fn expires_within(&self, now: OffsetDateTime, skew: Duration) -> bool {
		self.expires_at - skew <= now
	}
}

/// Token string that never shows up in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the raw token. Never log this value.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Formats the `Authorization` header value.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.0)
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenSecret(<redacted>)")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn secrets_are_redacted_but_usable() {
		let token = AccessToken::new("super-secret", OffsetDateTime::now_utc());

		assert_eq!(format!("{:?}", token.token), "TokenSecret(<redacted>)");
		assert_eq!(token.token.to_string(), "<redacted>");
		assert_eq!(token.token.bearer(), "Bearer super-secret");
		assert!(!format!("{token:?}").contains("super-secret"));
	}

	#[test]
	fn expiry_skew_is_inclusive() {
		let now = OffsetDateTime::now_utc();
		let token = AccessToken::new("t", now + Duration::minutes(5));

		assert!(token.expires_within(now, Duration::minutes(5)));
		assert!(!token.expires_within(now, Duration::minutes(4)));
	}
}
