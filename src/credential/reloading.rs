//! File-backed credential kept fresh by a background reload loop.
//!
//! [`ReloadingCredential`] loads a [`UserAssignedIdentityCredentials`] record from disk, builds
//! a token credential from it, and then reloads the file whenever it changes or the backstop
//! interval elapses. A reload only replaces the current credential when the record's
//! `not_before` is strictly newer than the one in use, so a timer tick racing a file write
//! can never bring back an older certificate.
//!
//! Reload failures are logged and the previous credential stays in service; only the
//! initial load can fail construction.

// std
use std::path::{Path, PathBuf};
// crates.io
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{
	runtime::Handle,
	sync::mpsc::{self, UnboundedReceiver},
	time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	cloud::Cloud,
	credential::{
		CertificateCredentialFactory, ClientCertificateCredentialFactory, TokenCredential,
		TokenFuture, TokenRequestOptions, UserAssignedIdentityCredentials,
	},
	error::{ConfigError, CredentialError},
	http::ReqwestHttpClient,
	obs::{self, OpKind, OpOutcome, OpSpan},
};

/// Interval between unconditional reloads when no file event arrives.
pub const DEFAULT_BACKSTOP_INTERVAL: Duration = Duration::hours(6);
/// Largest backstop interval [`ReloadingCredentialBuilder::start`] accepts.
pub const MAX_BACKSTOP_INTERVAL: Duration = Duration::days(365);

type WatchEvents = UnboundedReceiver<notify::Result<Event>>;

/// Lifecycle of the background reload loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReloaderState {
	/// File events and the backstop timer both trigger reloads.
	Watching,
	/// The file watcher could not be established; only the backstop timer reloads.
	Degraded,
	/// The loop has exited and the credential no longer changes.
	Stopped,
}

/// Configures and starts a [`ReloadingCredential`].
pub struct ReloadingCredentialBuilder {
	path: PathBuf,
	cloud: Cloud,
	backstop_interval: Duration,
	factory: Option<Arc<dyn CertificateCredentialFactory>>,
	http_client: Option<ReqwestHttpClient>,
	watch_file: bool,
}
impl ReloadingCredentialBuilder {
	/// Sets the cloud passed to the credential factory.
	pub fn cloud(mut self, cloud: Cloud) -> Self {
		self.cloud = cloud;

		self
	}

	/// Overrides [`DEFAULT_BACKSTOP_INTERVAL`].
	pub fn backstop_interval(mut self, interval: Duration) -> Self {
		self.backstop_interval = interval;

		self
	}

	/// Replaces the default [`ClientCertificateCredentialFactory`].
	pub fn factory(mut self, factory: Arc<dyn CertificateCredentialFactory>) -> Self {
		self.factory = Some(factory);

		self
	}

	/// HTTP client handed to the default factory.
	pub fn http_client(mut self, http_client: ReqwestHttpClient) -> Self {
		self.http_client = Some(http_client);

		self
	}

	#[cfg(test)]
	fn without_watcher(mut self) -> Self {
		self.watch_file = false;

		self
	}

	/// Loads the credential file and spawns the reload loop on the current Tokio runtime.
	///
	/// The loop runs until `cancel` fires. Fails when the backstop interval is not positive
	/// or exceeds [`MAX_BACKSTOP_INTERVAL`], when no runtime is available, or when the
	/// initial load fails.
	pub fn start(self, cancel: CancellationToken) -> Result<ReloadingCredential> {
		if !self.backstop_interval.is_positive() {
			return Err(ConfigError::NonPositiveBackstop.into());
		}
		if self.backstop_interval > MAX_BACKSTOP_INTERVAL {
			return Err(ConfigError::BackstopOutOfRange { max: MAX_BACKSTOP_INTERVAL }.into());
		}

		let runtime = Handle::try_current().map_err(|_| ConfigError::MissingRuntime)?;
		let factory = self.factory.unwrap_or_else(|| {
			Arc::new(ClientCertificateCredentialFactory::new(self.http_client.unwrap_or_default()))
		});
		let record = read_record_blocking(&self.path)?;
		let not_before = record.not_before()?;
		let credential = factory.build(&record, self.cloud)?;
		let watched = if self.watch_file {
			watch(&self.path)
		} else {
			Err(notify::Error::generic("file watching is disabled"))
		};
		let (watcher, events, state) = match watched {
			Ok((watcher, events)) => (Some(watcher), Some(events), ReloaderState::Watching),
			Err(e) => {
				tracing::warn!(
					path = %self.path.display(),
					error = %e,
					"Credential file watcher unavailable; relying on the backstop timer."
				);

				(None, None, ReloaderState::Degraded)
			},
		};
		let shared = Arc::new(Shared {
			path: self.path,
			cloud: self.cloud,
			factory,
			current: RwLock::new(Loaded { not_before, credential }),
			state: Mutex::new(state),
		});

		tracing::info!(
			path = %shared.path.display(),
			not_before = %not_before,
			state = ?state,
			"Loaded credential file."
		);

		runtime.spawn(run(shared.clone(), watcher, events, self.backstop_interval, cancel));

		Ok(ReloadingCredential { shared })
	}
}
impl Debug for ReloadingCredentialBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReloadingCredentialBuilder")
			.field("path", &self.path)
			.field("cloud", &self.cloud)
			.field("backstop_interval", &self.backstop_interval)
			.field("custom_factory", &self.factory.is_some())
			.finish()
	}
}

/// Token credential whose certificate is reloaded from a file in the background.
///
/// Clones share the same current credential and loop.
#[derive(Clone)]
pub struct ReloadingCredential {
	shared: Arc<Shared>,
}
impl ReloadingCredential {
	/// Starts configuring a credential backed by the record at `path`.
	pub fn builder(path: impl Into<PathBuf>) -> ReloadingCredentialBuilder {
		ReloadingCredentialBuilder {
			path: path.into(),
			cloud: Cloud::default(),
			backstop_interval: DEFAULT_BACKSTOP_INTERVAL,
			factory: None,
			http_client: None,
			watch_file: true,
		}
	}

	/// Current state of the reload loop.
	pub fn state(&self) -> ReloaderState {
		*self.shared.state.lock()
	}

	/// `not_before` of the credential currently in service.
	pub fn not_before(&self) -> OffsetDateTime {
		self.shared.current.read().not_before
	}

	/// Reads the file once and applies it if newer; returns whether the credential changed.
	pub async fn reload(&self) -> Result<bool, CredentialError> {
		self.shared.reload().await
	}
}
impl Debug for ReloadingCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ReloadingCredential")
			.field("path", &self.shared.path)
			.field("not_before", &self.not_before())
			.field("state", &self.state())
			.finish()
	}
}
impl TokenCredential for ReloadingCredential {
	fn get_token<'a>(&'a self, options: &'a TokenRequestOptions) -> TokenFuture<'a> {
		let credential = self.shared.current.read().credential.clone();

		Box::pin(async move { credential.get_token(options).await })
	}
}

struct Loaded {
	not_before: OffsetDateTime,
	credential: Arc<dyn TokenCredential>,
}

struct Shared {
	path: PathBuf,
	cloud: Cloud,
	factory: Arc<dyn CertificateCredentialFactory>,
	current: RwLock<Loaded>,
	state: Mutex<ReloaderState>,
}
impl Shared {
	async fn reload(&self) -> Result<bool, CredentialError> {
		let bytes = tokio::fs::read(&self.path)
			.await
			.map_err(|source| CredentialError::Read { path: self.path.clone(), source })?;
		let record = UserAssignedIdentityCredentials::from_json_slice(&bytes)?;

		self.apply(&record)
	}

	fn apply(&self, record: &UserAssignedIdentityCredentials) -> Result<bool, CredentialError> {
		let not_before = record.not_before()?;

		if not_before <= self.current.read().not_before {
			return Ok(false);
		}

		let credential = self.factory.build(record, self.cloud)?;
		let mut current = self.current.write();

		if not_before <= current.not_before {
			return Ok(false);
		}

		*current = Loaded { not_before, credential };

		Ok(true)
	}

	async fn refresh(&self, trigger: &'static str) {
		const KIND: OpKind = OpKind::Reload;

		let span = OpSpan::new(KIND, trigger);

		span.instrument(async {
			obs::record_op_outcome(KIND, OpOutcome::Attempt);

			match self.reload().await {
				Ok(true) => {
					obs::record_op_outcome(KIND, OpOutcome::Success);
					tracing::info!(
						path = %self.path.display(),
						not_before = %self.current.read().not_before,
						"Reloaded credential file."
					);
				},
				Ok(false) => {
					obs::record_op_outcome(KIND, OpOutcome::Skipped);
					tracing::debug!(
						path = %self.path.display(),
						"Credential file is not newer than the current credential."
					);
				},
				Err(e) => {
					obs::record_op_outcome(KIND, OpOutcome::Failure);
					tracing::warn!(
						path = %self.path.display(),
						error = %e,
						"Failed to reload credential file; keeping the current credential."
					);
				},
			}
		})
		.await
	}

	fn concerns_file(&self, event: &Event) -> bool {
		matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
			&& event.paths.iter().any(|path| path.file_name() == self.path.file_name())
	}
}

async fn run(
	shared: Arc<Shared>,
	watcher: Option<RecommendedWatcher>,
	mut events: Option<WatchEvents>,
	backstop_interval: Duration,
	cancel: CancellationToken,
) {
	let period = backstop_interval.unsigned_abs();
	let mut backstop = tokio::time::interval_at(Instant::now() + period, period);

	backstop.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		tokio::select! {
			_ = cancel.cancelled() => break,
			event = next_event(&mut events) => match event {
				Some(Ok(event)) =>
					if shared.concerns_file(&event) {
						shared.refresh("watch").await;
					},
				Some(Err(e)) => tracing::warn!(error = %e, "Credential file watcher reported an error."),
				None => {
					tracing::warn!("Credential file watcher closed.");

					break;
				},
			},
			_ = backstop.tick() => shared.refresh("backstop").await,
		}
	}

	drop(watcher);

	*shared.state.lock() = ReloaderState::Stopped;

	tracing::debug!(path = %shared.path.display(), "Credential reload loop stopped.");
}

async fn next_event(events: &mut Option<WatchEvents>) -> Option<notify::Result<Event>> {
	match events {
		Some(events) => events.recv().await,
		None => std::future::pending().await,
	}
}

fn watch(path: &Path) -> notify::Result<(RecommendedWatcher, WatchEvents)> {
	let (tx, rx) = mpsc::unbounded_channel();
	let mut watcher = notify::recommended_watcher(move |event| {
		let _ = tx.send(event);
	})?;
	// Editors and atomic writers replace the file, so the directory is watched instead.
	let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));

	watcher.watch(dir, RecursiveMode::NonRecursive)?;

	Ok((watcher, rx))
}

fn read_record_blocking(path: &Path) -> Result<UserAssignedIdentityCredentials, CredentialError> {
	let bytes = std::fs::read(path)
		.map_err(|source| CredentialError::Read { path: path.to_path_buf(), source })?;

	UserAssignedIdentityCredentials::from_json_slice(&bytes)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{MarkerFactory, credential_file_json};

	fn shared(not_before: OffsetDateTime, factory: Arc<MarkerFactory>) -> Shared {
		Shared {
			path: PathBuf::from("unused.json"),
			cloud: Cloud::AzurePublic,
			factory: factory.clone(),
			current: RwLock::new(Loaded {
				not_before,
				credential: factory
					.build(&UserAssignedIdentityCredentials::default(), Cloud::AzurePublic)
					.expect("Marker factory should build."),
			}),
			state: Mutex::new(ReloaderState::Watching),
		}
	}

	fn record(client_id: &str, not_before: &str) -> UserAssignedIdentityCredentials {
		UserAssignedIdentityCredentials::from_json_slice(
			credential_file_json(client_id, not_before).as_bytes(),
		)
		.expect("Record should parse.")
	}

	#[test]
	fn only_strictly_newer_records_are_applied() {
		let factory = Arc::new(MarkerFactory::default());
		let current = OffsetDateTime::from_unix_timestamp(1_714_557_600).expect("Valid timestamp.");
		let shared = shared(current, factory.clone());

		assert!(!shared.apply(&record("older", "2024-05-01T09:00:00Z")).expect("Apply should succeed."));
		assert!(!shared.apply(&record("equal", "2024-05-01T10:00:00Z")).expect("Apply should succeed."));
		assert_eq!(factory.built(), 1);
		assert!(shared.apply(&record("newer", "2024-05-01T11:00:00Z")).expect("Apply should succeed."));
		assert_eq!(factory.built(), 2);
		assert_eq!(shared.current.read().not_before, current + Duration::hours(1));
	}

	#[test]
	fn build_failures_keep_the_current_credential() {
		let factory = Arc::new(MarkerFactory::default());
		let current = OffsetDateTime::from_unix_timestamp(1_714_557_600).expect("Valid timestamp.");
		let shared = shared(current, factory.clone());

		factory.fail_builds(true);

		assert!(shared.apply(&record("newer", "2024-05-01T11:00:00Z")).is_err());
		assert_eq!(shared.current.read().not_before, current);
	}

	#[test]
	fn events_for_other_files_are_ignored() {
		let shared = shared(OffsetDateTime::UNIX_EPOCH, Arc::new(MarkerFactory::default()));
		let event = |kind, path: &str| Event::new(kind).add_path(PathBuf::from(path));

		assert!(shared.concerns_file(&event(
			EventKind::Modify(notify::event::ModifyKind::Any),
			"/var/run/unused.json"
		)));
		assert!(!shared.concerns_file(&event(
			EventKind::Modify(notify::event::ModifyKind::Any),
			"/var/run/other.json"
		)));
		assert!(!shared.concerns_file(&event(
			EventKind::Remove(notify::event::RemoveKind::Any),
			"/var/run/unused.json"
		)));
	}

	#[tokio::test]
	async fn non_positive_backstop_is_rejected() {
		let err = ReloadingCredential::builder("unused.json")
			.backstop_interval(Duration::ZERO)
			.start(CancellationToken::new())
			.expect_err("Zero backstop should be rejected.");

		assert!(matches!(err, Error::Config(ConfigError::NonPositiveBackstop)));
	}

	#[test]
	fn oversized_backstop_is_rejected() {
		for interval in [MAX_BACKSTOP_INTERVAL + Duration::SECOND, Duration::MAX] {
			let err = ReloadingCredential::builder("unused.json")
				.backstop_interval(interval)
				.start(CancellationToken::new())
				.expect_err("Oversized backstop should be rejected.");

			assert!(matches!(err, Error::Config(ConfigError::BackstopOutOfRange { .. })));
		}
	}

	#[tokio::test(start_paused = true)]
	async fn backstop_reloads_without_a_watcher() {
		let dir = tempfile::tempdir().expect("Temporary directory should be created.");
		let path = dir.path().join("credential.json");

		std::fs::write(&path, credential_file_json("first", "2024-05-01T10:00:00Z"))
			.expect("Credential file should be written.");

		let factory = Arc::new(MarkerFactory::default());
		let cancel = CancellationToken::new();
		let credential = ReloadingCredential::builder(&path)
			.backstop_interval(Duration::hours(1))
			.factory(factory.clone())
			.without_watcher()
			.start(cancel.clone())
			.expect("Reloader should start.");
		let initial = credential.not_before();

		assert_eq!(credential.state(), ReloaderState::Degraded);

		std::fs::write(&path, credential_file_json("second", "2024-05-01T11:00:00Z"))
			.expect("Credential file should be rewritten.");
		tokio::task::yield_now().await;

		assert_eq!(credential.not_before(), initial);

		let started = tokio::time::Instant::now();

		for _ in 0..240 {
			if credential.not_before() != initial {
				break;
			}

			tokio::time::sleep(std::time::Duration::from_secs(30)).await;
		}

		assert_eq!(credential.not_before(), initial + Duration::hours(1));
		assert!(started.elapsed() >= std::time::Duration::from_secs(3_600));
		assert_eq!(factory.built(), 2);

		cancel.cancel();

		for _ in 0..100 {
			if credential.state() == ReloaderState::Stopped {
				break;
			}

			tokio::task::yield_now().await;
		}

		assert_eq!(credential.state(), ReloaderState::Stopped);
	}

	#[tokio::test]
	async fn missing_file_fails_construction() {
		let err = ReloadingCredential::builder("/nonexistent/credential.json")
			.factory(Arc::new(MarkerFactory::default()))
			.start(CancellationToken::new())
			.expect_err("Missing file should fail construction.");

		assert!(matches!(err, Error::Credential(CredentialError::Read { .. })));
	}
}
