//! Observability helpers shared by the policies, credentials, and client.
//!
//! Every operation runs inside a span named `msi_dataplane.op` carrying the `op` and
//! `stage` fields. Enable the `metrics` feature to increment the `msi_dataplane_op_total`
//! counter for every attempt and outcome, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
	/// Probe, challenge, and authenticated retry.
	Authenticate,
	/// Identity URL rewrite of an outgoing request.
	InjectIdentityUrl,
	/// Client certificate token exchange.
	ExchangeToken,
	/// Credential file reload.
	Reload,
	/// User-assigned identity credential retrieval.
	GetCredentials,
}
impl OpKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpKind::Authenticate => "authenticate",
			OpKind::InjectIdentityUrl => "inject_identity_url",
			OpKind::ExchangeToken => "exchange_token",
			OpKind::Reload => "reload",
			OpKind::GetCredentials => "get_credentials",
		}
	}
}
impl Display for OpKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller or logged.
	Failure,
	/// Work intentionally not performed, such as a stale reload.
	Skipped,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
			OpOutcome::Skipped => "skipped",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Records success or failure for a finished operation.
pub fn record_result<T, E>(kind: OpKind, result: &Result<T, E>) {
	match result {
		Ok(_) => record_op_outcome(kind, OpOutcome::Success),
		Err(_) => record_op_outcome(kind, OpOutcome::Failure),
	}
}
