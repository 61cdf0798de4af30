//! Managed identity data-plane client: challenge-driven bearer authentication, identity
//! endpoint binding, and certificate credentials that reload themselves from disk.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod challenge;
pub mod client;
pub mod cloud;
pub mod credential;
pub mod error;
pub mod http;
pub mod obs;
pub mod pipeline;
pub mod validation;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		io,
		sync::atomic::{AtomicBool, AtomicUsize, Ordering},
	};
	// crates.io
	use oauth2::http::StatusCode;
	// self
	use crate::{
		cloud::Cloud,
		credential::{
			AccessToken, CertificateCredentialFactory, TokenCredential, TokenFuture,
			TokenRequestOptions, UserAssignedIdentityCredentials,
		},
		error::{CredentialError, TransportError},
		http::{self, ReqwestHttpClient, Request, Response, Transport, TransportFuture},
	};

	/// Base64 PKCS#12 archive holding a self-signed RSA certificate and key.
	pub const RSA_IDENTITY_P12: &str =
		include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/identity_rsa.p12.b64"));
	/// Base64 PKCS#12 archive holding a self-signed P-256 certificate and key.
	pub const EC_IDENTITY_P12: &str =
		include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/identity_ec.p12.b64"));
	/// Tenant written into generated identity records.
	pub const TEST_TENANT_ID: &str = "00000000-0000-0000-0000-000000000001";
	/// Client ID written into generated identity records.
	pub const TEST_CLIENT_ID: &str = "11111111-1111-1111-1111-111111111111";

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Identity record carrying `secret` and `authority`.
	pub fn identity_record(
		secret: &str,
		authority: &str,
		not_before: Option<&str>,
	) -> UserAssignedIdentityCredentials {
		UserAssignedIdentityCredentials {
			authentication_endpoint: Some(authority.into()),
			client_id: Some(TEST_CLIENT_ID.into()),
			client_secret: Some(secret.trim().into()),
			not_before: not_before.map(Into::into),
			tenant_id: Some(TEST_TENANT_ID.into()),
			..Default::default()
		}
	}

	/// Credential file contents understood by [`MarkerFactory`].
	pub fn credential_file_json(client_id: &str, not_before: &str) -> String {
		serde_json::json!({
			"authentication_endpoint": "https://login.example/",
			"client_id": client_id,
			"client_secret": "",
			"not_before": not_before,
			"tenant_id": TEST_TENANT_ID,
		})
		.to_string()
	}

	/// Fully populated identity as returned by the data-plane API.
	pub fn complete_identity(resource_id: &str) -> serde_json::Value {
		serde_json::json!({
			"authentication_endpoint": "https://login.example/",
			"cannot_renew_after": "2024-08-01T00:00:00Z",
			"client_id": TEST_CLIENT_ID,
			"client_secret": RSA_IDENTITY_P12.trim(),
			"client_secret_url": "https://test.identity.azure.net/secret",
			"custom_claims": { "xms_az_tm": "azureresource" },
			"mtls_authentication_endpoint": "https://mtls.login.example/",
			"not_after": "2024-07-01T00:00:00Z",
			"not_before": "2024-05-01T00:00:00Z",
			"object_id": "22222222-2222-2222-2222-222222222222",
			"renew_after": "2024-06-01T00:00:00Z",
			"resource_id": resource_id,
			"tenant_id": TEST_TENANT_ID,
		})
	}

	/// Transport replaying scripted responses and recording every request it receives.
	#[derive(Default)]
	pub struct RecordingTransport {
		responses: Mutex<VecDeque<Response>>,
		requests: Mutex<Vec<Request>>,
	}
	impl RecordingTransport {
		/// Replies with empty-bodied responses carrying `statuses`, in order.
		pub fn new(statuses: impl IntoIterator<Item = StatusCode>) -> Self {
			Self::with_responses(
				statuses
					.into_iter()
					.map(|status| {
						let mut response = Response::new(Vec::new());

						*response.status_mut() = status;

						response
					})
					.collect(),
			)
		}

		/// Replies with `responses`, in order.
		pub fn with_responses(responses: Vec<Response>) -> Self {
			Self { responses: Mutex::new(responses.into()), requests: Default::default() }
		}

		/// Copies of every request received so far.
		pub fn requests(&self) -> Vec<Request> {
			self.requests.lock().iter().map(http::clone_request).collect()
		}

		/// Number of requests received so far.
		pub fn calls(&self) -> usize {
			self.requests.lock().len()
		}
	}
	impl Transport for RecordingTransport {
		fn send(&self, request: Request) -> TransportFuture<'_> {
			self.requests.lock().push(http::clone_request(&request));

			let response = self.responses.lock().pop_front();

			Box::pin(async move {
				response.ok_or_else(|| TransportError::Io(io::Error::other("no scripted response left")))
			})
		}
	}

	/// Credential echoing the requested tenant and scopes inside the token value.
	#[derive(Debug, Default)]
	pub struct FakeCredential {
		calls: AtomicUsize,
	}
	impl FakeCredential {
		/// Number of tokens issued so far.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}
	impl TokenCredential for FakeCredential {
		fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let tenant = options.tenant_id.as_deref().unwrap_or_default();
			let token = format!("fake_token, tenantID {tenant}, scopes [{}]", options.scopes);

			Box::pin(async move {
				Ok(AccessToken::new(token, OffsetDateTime::now_utc() + Duration::hours(1)))
			})
		}
	}

	/// Factory whose credentials issue the record's `client_id` as their token.
	#[derive(Debug, Default)]
	pub struct MarkerFactory {
		built: AtomicUsize,
		fail: AtomicBool,
	}
	impl MarkerFactory {
		/// Number of credentials built so far.
		pub fn built(&self) -> usize {
			self.built.load(Ordering::SeqCst)
		}

		/// Makes subsequent builds fail.
		pub fn fail_builds(&self, fail: bool) {
			self.fail.store(fail, Ordering::SeqCst);
		}
	}
	impl CertificateCredentialFactory for MarkerFactory {
		fn build(
			&self,
			record: &UserAssignedIdentityCredentials,
			_cloud: Cloud,
		) -> Result<Arc<dyn TokenCredential>, CredentialError> {
			if self.fail.load(Ordering::SeqCst) {
				return Err(CredentialError::Unavailable { reason: "build disabled".into() });
			}

			self.built.fetch_add(1, Ordering::SeqCst);

			Ok(Arc::new(MarkerCredential(record.client_id.clone().unwrap_or_default())))
		}
	}

	/// Credential issuing a fixed token.
	#[derive(Debug)]
	pub struct MarkerCredential(pub String);
	impl TokenCredential for MarkerCredential {
		fn get_token<'a>(&'a self, _options: &'a TokenRequestOptions) -> TokenFuture<'a> {
			Box::pin(async move {
				Ok(AccessToken::new(self.0.clone(), OffsetDateTime::now_utc() + Duration::hours(1)))
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::Hash,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {httpmock as _, tempfile as _};
