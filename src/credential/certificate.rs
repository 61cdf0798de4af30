//! Client-certificate credentials built from user-assigned identity records.
//!
//! The record's `client_secret` is a base64 PKCS#12 archive with an empty password holding
//! exactly one key and one certificate. The archive's RSA key signs a short-lived client assertion which is exchanged at
//! `{authentication_endpoint}/{tenant}/oauth2/v2.0/token` through the `oauth2` client
//! credentials grant. Tokens are cached per tenant and scope set and refreshed shortly
//! before they expire; concurrent callers share a single exchange.

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oauth2::{
	AuthType, HttpClientError, RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError},
};
use rand::{Rng, distr::Alphanumeric};
use rsa::{RsaPrivateKey, pkcs1::EncodeRsaPrivateKey, pkcs8::DecodePrivateKey};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	cloud::Cloud,
	credential::{
		AccessToken, ClientId, ScopeSet, TenantId, TokenCredential, TokenFuture,
		TokenRequestOptions, UserAssignedIdentities, UserAssignedIdentityCredentials,
	},
	error::{ConfigError, CredentialError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
	obs::{self, OpKind, OpOutcome, OpSpan},
};

/// `client_assertion_type` sent alongside a signed certificate assertion.
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

const ASSERTION_LIFETIME: Duration = Duration::minutes(10);
const REFRESH_SKEW: Duration = Duration::minutes(5);

/// Builds token credentials from identity records.
///
/// [`ReloadingCredential`](crate::credential::ReloadingCredential) calls this every time a
/// newer record is read, so tests can substitute a factory that never touches PKCS#12 data.
pub trait CertificateCredentialFactory
where
	Self: Send + Sync,
{
	/// Builds a credential from `record` for `cloud`.
	fn build(
		&self,
		record: &UserAssignedIdentityCredentials,
		cloud: Cloud,
	) -> Result<Arc<dyn TokenCredential>, CredentialError>;
}

/// Default factory producing [`ClientCertificateCredential`]s.
#[derive(Clone, Debug, Default)]
pub struct ClientCertificateCredentialFactory {
	http_client: ReqwestHttpClient,
}
impl ClientCertificateCredentialFactory {
	/// Creates a factory whose credentials exchange assertions through `http_client`.
	pub fn new(http_client: ReqwestHttpClient) -> Self {
		Self { http_client }
	}
}
impl CertificateCredentialFactory for ClientCertificateCredentialFactory {
	fn build(
		&self,
		record: &UserAssignedIdentityCredentials,
		cloud: Cloud,
	) -> Result<Arc<dyn TokenCredential>, CredentialError> {
		let credential =
			ClientCertificateCredential::from_identity(record, cloud, self.http_client.clone())?;

		Ok(Arc::new(credential))
	}
}

type CacheKey = (TenantId, ScopeSet);

/// Token credential backed by an identity's client certificate.
pub struct ClientCertificateCredential {
	client_id: ClientId,
	tenant_id: TenantId,
	authority: Url,
	cloud: Cloud,
	signing_key: EncodingKey,
	certificate_chain: Vec<String>,
	thumbprint: String,
	http_client: ReqwestHttpClient,
	cache: Mutex<HashMap<CacheKey, AccessToken>>,
	exchange: AsyncMutex<()>,
}
impl ClientCertificateCredential {
	/// Builds a credential from an identity record.
	///
	/// `client_id`, `tenant_id`, `client_secret`, and `authentication_endpoint` are
	/// required, in that order.
	pub fn from_identity(
		record: &UserAssignedIdentityCredentials,
		cloud: Cloud,
		http_client: ReqwestHttpClient,
	) -> Result<Self, CredentialError> {
		let client_id =
			ClientId::new(UserAssignedIdentityCredentials::require(&record.client_id, "client_id")?)?;
		let tenant_id =
			TenantId::new(UserAssignedIdentityCredentials::require(&record.tenant_id, "tenant_id")?)?;
		let secret = UserAssignedIdentityCredentials::require(&record.client_secret, "client_secret")?;
		let endpoint = UserAssignedIdentityCredentials::require(
			&record.authentication_endpoint,
			"authentication_endpoint",
		)?;
		let authority = Url::parse(endpoint)
			.map_err(|source| CredentialError::InvalidAuthority { value: endpoint.to_owned(), source })?;
		let archive =
			STANDARD.decode(secret.trim()).map_err(|source| CredentialError::DecodeSecret { source })?;
		let material = CertificateMaterial::from_pkcs12(&archive)?;

		tracing::debug!(
			client_id = %client_id,
			tenant_id = %tenant_id,
			thumbprint = %material.thumbprint,
			"Loaded client certificate."
		);

		Ok(Self {
			client_id,
			tenant_id,
			authority,
			cloud,
			signing_key: material.signing_key,
			certificate_chain: material.certificate_chain,
			thumbprint: material.thumbprint,
			http_client,
			cache: Default::default(),
			exchange: AsyncMutex::new(()),
		})
	}

	/// Application (client) ID the assertion is issued for.
	pub fn client_id(&self) -> &ClientId {
		&self.client_id
	}

	/// Tenant used when a request carries no override.
	pub fn tenant_id(&self) -> &TenantId {
		&self.tenant_id
	}

	/// Token authority taken from the identity record.
	pub fn authority(&self) -> &Url {
		&self.authority
	}

	/// Cloud the credential was built for.
	pub fn cloud(&self) -> Cloud {
		self.cloud
	}

	/// `x5t#S256` thumbprint of the leaf certificate.
	pub fn thumbprint(&self) -> &str {
		&self.thumbprint
	}

	/// Token endpoint for `tenant`.
	pub fn token_url(&self, tenant: &TenantId) -> Result<TokenUrl, ConfigError> {
		TokenUrl::new(format!(
			"{}/{tenant}/oauth2/v2.0/token",
			self.authority.as_str().trim_end_matches('/')
		))
		.map_err(|source| ConfigError::InvalidTokenEndpoint { source })
	}

	fn cached(&self, key: &CacheKey) -> Option<AccessToken> {
		let now = OffsetDateTime::now_utc();

		self.cache.lock().get(key).filter(|token| !token.expires_within(now, REFRESH_SKEW)).cloned()
	}

	/// Inserts `token`, dropping entries that have already expired.
	fn store(&self, key: CacheKey, token: AccessToken) {
		let now = OffsetDateTime::now_utc();
		let mut cache = self.cache.lock();

		cache.retain(|_, cached| cached.expires_at > now);
		cache.insert(key, token);
	}

	fn assertion(&self, audience: &str) -> Result<String, CredentialError> {
		let now = OffsetDateTime::now_utc().unix_timestamp();
		let jti = rand::rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect();
		let claims = AssertionClaims {
			aud: audience,
			exp: now + ASSERTION_LIFETIME.whole_seconds(),
			iat: now,
			iss: &self.client_id,
			jti,
			nbf: now,
			sub: &self.client_id,
		};
		let mut header = Header::new(Algorithm::RS256);

		header.x5t_s256 = Some(self.thumbprint.clone());
		header.x5c = Some(self.certificate_chain.clone());

		jsonwebtoken::encode(&header, &claims, &self.signing_key)
			.map_err(|source| CredentialError::Assertion { source })
	}

	async fn exchange(&self, tenant: &TenantId, scopes: &ScopeSet) -> Result<AccessToken> {
		let token_url = self.token_url(tenant)?;
		let assertion = self.assertion(token_url.as_str())?;
		let client = BasicClient::new(oauth2::ClientId::new(self.client_id.to_string()))
			.set_token_uri(token_url)
			.set_auth_type(AuthType::RequestBody);
		let slot = ResponseMetadataSlot::default();
		let instrumented = self.http_client.instrumented(slot.clone());
		let mut request = client
			.exchange_client_credentials()
			.add_extra_param("client_assertion_type", CLIENT_ASSERTION_TYPE)
			.add_extra_param("client_assertion", assertion);

		for scope in scopes.iter() {
			request = request.add_scope(Scope::new(scope.to_owned()));
		}

		let response = request
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(slot.take(), err))?;
		let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
		let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

		if expires_in <= 0 {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}

		Ok(AccessToken::new(
			response.access_token().secret().to_owned(),
			OffsetDateTime::now_utc() + Duration::seconds(expires_in),
		))
	}
}
impl Debug for ClientCertificateCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientCertificateCredential")
			.field("client_id", &self.client_id)
			.field("tenant_id", &self.tenant_id)
			.field("authority", &self.authority.as_str())
			.field("cloud", &self.cloud)
			.field("thumbprint", &self.thumbprint)
			.finish_non_exhaustive()
	}
}
impl TokenCredential for ClientCertificateCredential {
	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		const KIND: OpKind = OpKind::ExchangeToken;

		let span = OpSpan::new(KIND, "get_token");

		Box::pin(span.instrument(async move {
			let tenant = options.tenant_id.clone().unwrap_or_else(|| self.tenant_id.clone());
			let key = (tenant, options.scopes.clone());

			if let Some(token) = self.cached(&key) {
				return Ok(token);
			}

			let _guard = self.exchange.lock().await;

			// Another caller may have refreshed while this one waited.
			if let Some(token) = self.cached(&key) {
				return Ok(token);
			}

			obs::record_op_outcome(KIND, OpOutcome::Attempt);

			let result = self.exchange(&key.0, &key.1).await;

			obs::record_result(KIND, &result);

			let token = result?;

			self.store(key, token.clone());

			Ok(token)
		}))
	}
}

impl UserAssignedIdentities {
	/// Builds a certificate credential for the identity with `resource_id`.
	pub fn get_credential(
		&self,
		resource_id: &str,
	) -> Result<ClientCertificateCredential, CredentialError> {
		self.get_credential_with(resource_id, ReqwestHttpClient::default())
	}

	/// Same as [`get_credential`](Self::get_credential) with an explicit HTTP client.
	pub fn get_credential_with(
		&self,
		resource_id: &str,
		http_client: ReqwestHttpClient,
	) -> Result<ClientCertificateCredential, CredentialError> {
		ClientCertificateCredential::from_identity(self.identity(resource_id)?, self.cloud, http_client)
	}
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
	aud: &'a str,
	exp: i64,
	iat: i64,
	iss: &'a str,
	jti: String,
	nbf: i64,
	sub: &'a str,
}

struct CertificateMaterial {
	signing_key: EncodingKey,
	certificate_chain: Vec<String>,
	thumbprint: String,
}
impl CertificateMaterial {
	fn from_pkcs12(archive: &[u8]) -> Result<Self, CredentialError> {
		let pfx = p12::PFX::parse(archive).map_err(parse_failure)?;

		if !pfx.verify_mac("") {
			return Err(CredentialError::ParseCertificate {
				reason: "archive integrity check failed".into(),
			});
		}

		let key = single(pfx.key_bags("").map_err(parse_failure)?, "private key")?;
		let leaf = single(pfx.cert_x509_bags("").map_err(parse_failure)?, "certificate")?;
		let private_key =
			RsaPrivateKey::from_pkcs8_der(&key).map_err(|_| CredentialError::NotRsaKey)?;
		let pkcs1 = private_key
			.to_pkcs1_der()
			.map_err(|e| CredentialError::ParseCertificate { reason: e.to_string() })?;

		Ok(Self {
			signing_key: EncodingKey::from_rsa_der(pkcs1.as_bytes()),
			thumbprint: URL_SAFE_NO_PAD.encode(Sha256::digest(&leaf)),
			certificate_chain: vec![STANDARD.encode(leaf)],
		})
	}
}

/// The archive must hold exactly one `what`, so the leaf certificate is never guessed.
fn single(mut bags: Vec<Vec<u8>>, what: &str) -> Result<Vec<u8>, CredentialError> {
	let count = bags.len();

	match bags.pop() {
		Some(bag) if count == 1 => Ok(bag),
		None => Err(CredentialError::ParseCertificate { reason: format!("archive holds no {what}") }),
		Some(_) => Err(CredentialError::ParseCertificate {
			reason: format!("archive holds {count} entries where exactly one {what} is expected"),
		}),
	}
}

fn parse_failure(e: impl Debug) -> CredentialError {
	CredentialError::ParseCertificate { reason: format!("{e:?}") }
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> Error {
	let status = meta.as_ref().and_then(|m| m.status);
	let retry_after = meta.as_ref().and_then(|m| m.retry_after);

	match err {
		RequestTokenError::ServerResponse(response) => CredentialError::TokenEndpoint {
			message: server_message(&response),
			status,
			retry_after,
		}
		.into(),
		RequestTokenError::Request(HttpClientError::Reqwest(e)) => {
			if e.is_builder() {
				return ConfigError::from(*e).into();
			}

			TransportError::from(*e).into()
		},
		RequestTokenError::Request(HttpClientError::Http(e)) => ConfigError::from(e).into(),
		RequestTokenError::Request(HttpClientError::Io(e)) => TransportError::from(e).into(),
		RequestTokenError::Request(HttpClientError::Other(message)) =>
			CredentialError::TokenEndpoint { message, status, retry_after }.into(),
		RequestTokenError::Request(_) => CredentialError::TokenEndpoint {
			message: "HTTP client error occurred while calling the token endpoint".into(),
			status,
			retry_after,
		}
		.into(),
		RequestTokenError::Parse(source, _body) =>
			CredentialError::TokenResponseParse { source, status }.into(),
		RequestTokenError::Other(message) =>
			CredentialError::TokenEndpoint { message, status, retry_after }.into(),
	}
}

fn server_message(response: &BasicErrorResponse) -> String {
	match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{EC_IDENTITY_P12, RSA_IDENTITY_P12, identity_record};

	const RSA_THUMBPRINT: &str = "TjL5uKZqHz7uDwtol11IbG4MUABPLqFPNiXjhxsHEYw";
	const RSA_CHAIN_IDENTITY_P12: &str = include_str!(concat!(
		env!("CARGO_MANIFEST_DIR"),
		"/tests/fixtures/identity_rsa_chain.p12.b64"
	));

	#[test]
	fn builds_from_rsa_archive() {
		let record = identity_record(RSA_IDENTITY_P12, "https://login.example/", None);
		let credential = ClientCertificateCredential::from_identity(
			&record,
			Cloud::AzurePublic,
			ReqwestHttpClient::default(),
		)
		.expect("RSA identity should build.");

		assert_eq!(credential.thumbprint(), RSA_THUMBPRINT);
		assert_eq!(
			credential
				.token_url(credential.tenant_id())
				.expect("Token URL should build.")
				.as_str(),
			format!("https://login.example/{}/oauth2/v2.0/token", credential.tenant_id())
		);
		assert!(!format!("{credential:?}").contains(RSA_IDENTITY_P12));
	}

	#[test]
	fn assertion_carries_certificate_headers() {
		let record = identity_record(RSA_IDENTITY_P12, "https://login.example", None);
		let credential = ClientCertificateCredential::from_identity(
			&record,
			Cloud::AzurePublic,
			ReqwestHttpClient::default(),
		)
		.expect("RSA identity should build.");
		let jwt = credential.assertion("https://login.example/t/token").expect("Assertion should sign.");
		let header = jsonwebtoken::decode_header(&jwt).expect("Assertion header should decode.");

		assert_eq!(header.alg, Algorithm::RS256);
		assert_eq!(header.x5t_s256.as_deref(), Some(RSA_THUMBPRINT));
		assert_eq!(header.x5c.map(|chain| chain.len()), Some(1));
	}

	#[test]
	fn archives_with_several_certificates_are_rejected() {
		let record = identity_record(RSA_CHAIN_IDENTITY_P12, "https://login.example/", None);
		let err = ClientCertificateCredential::from_identity(
			&record,
			Cloud::AzurePublic,
			ReqwestHttpClient::default(),
		)
		.expect_err("Archive with two certificates should be rejected.");

		assert!(
			matches!(&err, CredentialError::ParseCertificate { reason } if reason.contains("exactly one certificate")),
			"Unexpected error: {err:?}."
		);
	}

	#[test]
	fn storing_a_token_prunes_expired_entries() {
		let record = identity_record(RSA_IDENTITY_P12, "https://login.example/", None);
		let credential = ClientCertificateCredential::from_identity(
			&record,
			Cloud::AzurePublic,
			ReqwestHttpClient::default(),
		)
		.expect("RSA identity should build.");
		let scopes = ScopeSet::new(["https://x/.default"]).expect("Scope should be valid.");
		let tenant = |raw: &str| TenantId::new(raw).expect("Tenant should be valid.");
		let now = OffsetDateTime::now_utc();

		credential
			.cache
			.lock()
			.insert((tenant("stale"), scopes.clone()), AccessToken::new("old", now - Duration::minutes(1)));
		credential
			.cache
			.lock()
			.insert((tenant("near"), scopes.clone()), AccessToken::new("near", now + Duration::minutes(1)));
		credential.store((tenant("fresh"), scopes.clone()), AccessToken::new("new", now + Duration::hours(1)));

		let cache = credential.cache.lock();

		assert_eq!(cache.len(), 2);
		assert!(!cache.contains_key(&(tenant("stale"), scopes.clone())));
		assert!(cache.contains_key(&(tenant("near"), scopes.clone())));
		assert!(cache.contains_key(&(tenant("fresh"), scopes)));
	}

	#[test]
	fn non_rsa_keys_are_rejected() {
		let record = identity_record(EC_IDENTITY_P12, "https://login.example/", None);
		let err = ClientCertificateCredential::from_identity(
			&record,
			Cloud::AzurePublic,
			ReqwestHttpClient::default(),
		)
		.expect_err("EC identity should be rejected.");

		assert!(matches!(err, CredentialError::NotRsaKey));
	}

	#[test]
	fn required_fields_are_checked_in_order() {
		let complete = identity_record(RSA_IDENTITY_P12, "https://login.example/", None);
		let cases: [(&str, fn(&mut UserAssignedIdentityCredentials)); 4] = [
			("client_id", |r| r.client_id = None),
			("tenant_id", |r| r.tenant_id = None),
			("client_secret", |r| r.client_secret = None),
			("authentication_endpoint", |r| r.authentication_endpoint = None),
		];

		for (expected, strip) in cases {
			let mut record = complete.clone();

			strip(&mut record);

			let err = ClientCertificateCredential::from_identity(
				&record,
				Cloud::AzurePublic,
				ReqwestHttpClient::default(),
			)
			.expect_err("Incomplete identity should be rejected.");

			assert!(
				matches!(err, CredentialError::MissingField { field } if field == expected),
				"Unexpected error for {expected}: {err:?}."
			);
		}
	}

	#[test]
	fn malformed_secrets_are_rejected() {
		let record = identity_record("%%%", "https://login.example/", None);

		assert!(matches!(
			ClientCertificateCredential::from_identity(
				&record,
				Cloud::AzurePublic,
				ReqwestHttpClient::default()
			),
			Err(CredentialError::DecodeSecret { .. })
		));

		let record = identity_record("bm90IGFuIGFyY2hpdmU=", "https://login.example/", None);

		assert!(matches!(
			ClientCertificateCredential::from_identity(
				&record,
				Cloud::AzurePublic,
				ReqwestHttpClient::default()
			),
			Err(CredentialError::ParseCertificate { .. })
		));
	}
}
