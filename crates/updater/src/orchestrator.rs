//! The update state machine.
//!
//! ```text
//! idle → checking → no-update | error | delta-evaluating
//! delta-evaluating → delta-downloading → delta-verifying → ready | fallback-to-full
//! fallback-to-full → full-downloading → downloaded
//! ready | downloaded → applying → terminated
//! ```
//!
//! Every failure on the delta path ends in `fallback-to-full`, handing the
//! release to the native engine's full installer.

use crate::applier::{DetachedSpawner, PatchApplier, ProcessSpawner};
use crate::config::{ApplyFailurePolicy, UpdaterConfig};
use crate::context::AppContext;
use crate::download::{DownloadProgress, Downloader, ResumableDownloader};
use crate::engine::{EngineEvent, HostApp, PendingUpdate, ProcessHost, StatusSurface, UpdateEngine};
use crate::error::{Result, UpdaterError};
use crate::events::{EventDispatcher, ProgressReport, UpdateInfo, UpdaterEvent};
use crate::feed::{FeedDescriptor, FeedProviderKind, FeedResolver};
use crate::integrity;
use crate::manifest::{manifest_file_name, DeltaManifest};
use crate::state::{UpdateAttemptRecord, UpdateStateStore};
use parking_lot::Mutex;
use reqwest::{Client, Url};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Observable state of the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Idle,
    Checking,
    NoUpdate,
    Error,
    DeltaEvaluating,
    DeltaDownloading,
    DeltaVerifying,
    Ready,
    FallbackToFull,
    FullDownloading,
    Downloaded,
    Applying,
    Terminated,
}

/// Why the delta path was abandoned for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    NoFeed,
    ManifestUnavailable(String),
    NoDeltaForVersion,
    InvalidArtifactPath,
    DownloadFailed(String),
    IntegrityMismatch { expected: String, actual: String },
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFeed => write!(f, "no feed url"),
            Self::ManifestUnavailable(err) => write!(f, "delta manifest unavailable: {err}"),
            Self::NoDeltaForVersion => write!(f, "no delta for the running version"),
            Self::InvalidArtifactPath => write!(f, "delta path outside the cache"),
            Self::DownloadFailed(err) => write!(f, "delta download failed: {err}"),
            Self::IntegrityMismatch { expected, actual } => {
                write!(f, "delta hash mismatch (expected {expected}, got {actual})")
            }
        }
    }
}

/// Result of one [`DeltaUpdater::do_smart_download`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmartDownloadOutcome {
    /// A verified delta is pending.
    Ready(PendingUpdate),
    /// The full-update download was requested instead.
    FellBack(FallbackReason),
    /// Another smart download was already running.
    AlreadyInFlight,
    Cancelled,
}

/// How a check cycle ended, as reported by [`DeltaUpdater::boot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoUpdate,
    UpdateReady(UpdateInfo),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuitMode {
    /// The user confirmed the install.
    Confirmed,
    /// The process is exiting for another reason.
    Unconditional,
}

/// Builder for [`DeltaUpdater`].
pub struct DeltaUpdaterBuilder {
    context: AppContext,
    engine: Arc<dyn UpdateEngine>,
    config: Option<UpdaterConfig>,
    feed_resolver: Option<Arc<dyn FeedResolver>>,
    feed_url: Option<Url>,
    downloader: Option<Arc<dyn Downloader>>,
    spawner: Option<Arc<dyn ProcessSpawner>>,
    host: Option<Arc<dyn HostApp>>,
    surface: Option<Arc<dyn StatusSurface>>,
    client: Option<Client>,
}

impl DeltaUpdaterBuilder {
    pub fn config(mut self, config: UpdaterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Strategy used to discover the feed; overrides `config.feed`.
    pub fn feed_resolver(mut self, resolver: Arc<dyn FeedResolver>) -> Self {
        self.feed_resolver = Some(resolver);
        self
    }

    /// Use a fixed feed and skip discovery.
    pub fn feed_url(mut self, url: Url) -> Self {
        self.feed_url = Some(url);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn host(mut self, host: Arc<dyn HostApp>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn status_surface(mut self, surface: Arc<dyn StatusSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    /// Client used for manifest requests.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<DeltaUpdater> {
        let config = self
            .config
            .unwrap_or_else(|| UpdaterConfig::for_app(&self.context.app_name));

        let feed_resolver = match self.feed_resolver {
            Some(resolver) => Some(resolver),
            None => config.feed.clone().map(|feed| feed.into_resolver()).transpose()?,
        };
        let explicit_feed = self
            .feed_url
            .map(|url| FeedDescriptor::new(FeedProviderKind::Generic, url));

        let client = match self.client {
            Some(client) => client,
            None => Client::builder().user_agent(config.user_agent.clone()).build()?,
        };
        let downloader: Arc<dyn Downloader> = match self.downloader {
            Some(downloader) => downloader,
            None => Arc::new(
                ResumableDownloader::builder()
                    .max_redirects(config.max_redirects)
                    .user_agent(config.user_agent.clone())
                    .build()?,
            ),
        };
        let spawner = self
            .spawner
            .unwrap_or_else(|| Arc::new(DetachedSpawner));
        let host = self.host.unwrap_or_else(|| Arc::new(ProcessHost));

        let applier = PatchApplier::new(
            &self.context,
            config.resources_dir.clone(),
            config.tools_dir(),
            self.engine.clone(),
            spawner,
        );
        let state = UpdateStateStore::new(config.state_file.clone());
        let (phase, _) = watch::channel(UpdatePhase::Idle);
        let (busy, _) = watch::channel(false);

        Ok(DeltaUpdater {
            inner: Arc::new(Inner {
                context: self.context,
                config,
                engine: self.engine,
                feed_resolver,
                has_explicit_feed: explicit_feed.is_some(),
                feed: Mutex::new(explicit_feed),
                client,
                downloader,
                applier,
                state,
                events: EventDispatcher::new(),
                host,
                surface: self.surface,
                pending: Mutex::new(None),
                prior_attempt: Mutex::new(None),
                in_flight: Mutex::new(None),
                busy,
                phase,
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }
}

struct Inner {
    context: AppContext,
    config: UpdaterConfig,
    engine: Arc<dyn UpdateEngine>,
    feed_resolver: Option<Arc<dyn FeedResolver>>,
    has_explicit_feed: bool,
    feed: Mutex<Option<FeedDescriptor>>,
    client: Client,
    downloader: Arc<dyn Downloader>,
    applier: PatchApplier,
    state: UpdateStateStore,
    events: EventDispatcher,
    host: Arc<dyn HostApp>,
    surface: Option<Arc<dyn StatusSurface>>,
    pending: Mutex<Option<PendingUpdate>>,
    /// Attempt record found at boot, before this process wrote any.
    prior_attempt: Mutex<Option<UpdateAttemptRecord>>,
    /// Target version and cancel handle of the running smart download.
    in_flight: Mutex<Option<(String, CancellationToken)>>,
    busy: watch::Sender<bool>,
    phase: watch::Sender<UpdatePhase>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Holds the single-flight slot until dropped.
struct Flight<'a> {
    inner: &'a Inner,
    cancel: CancellationToken,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        *self.inner.in_flight.lock() = None;
        self.inner.busy.send_replace(false);
    }
}

/// Delta-first updater driving a native [`UpdateEngine`].
#[derive(Clone)]
pub struct DeltaUpdater {
    inner: Arc<Inner>,
}

impl DeltaUpdater {
    pub fn builder(context: AppContext, engine: Arc<dyn UpdateEngine>) -> DeltaUpdaterBuilder {
        DeltaUpdaterBuilder {
            context,
            engine,
            config: None,
            feed_resolver: None,
            feed_url: None,
            downloader: None,
            spawner: None,
            host: None,
            surface: None,
            client: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdaterEvent> {
        self.inner.events.subscribe()
    }

    pub fn phase(&self) -> UpdatePhase {
        *self.inner.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<UpdatePhase> {
        self.inner.phase.subscribe()
    }

    pub fn pending_update(&self) -> Option<PendingUpdate> {
        self.inner.pending.lock().clone()
    }

    pub fn feed(&self) -> Option<FeedDescriptor> {
        self.inner.feed.lock().clone()
    }

    pub fn context(&self) -> &AppContext {
        &self.inner.context
    }

    /// Wire up the engine, start polling and run the first check.
    ///
    /// Resolves when that first cycle ends with no update, an error, or an
    /// update ready to install.
    pub async fn boot(&self) -> CycleOutcome {
        let inner = &self.inner;
        tracing::info!(
            target: "updater",
            app = %inner.context.app_name,
            version = %inner.context.version,
            platform = %inner.context.platform,
            channel = %inner.context.channel(),
            "booting updater"
        );

        if !inner.context.platform.engine_self_managed() {
            let prior = self.read_attempt().await;
            if let Some(record) = &prior {
                tracing::debug!(
                    target: "updater",
                    attempted = %record.attempted_version,
                    at = %record.time_human,
                    "found previous update attempt"
                );
            }
            *inner.prior_attempt.lock() = prior;

            if let Some(feed) = self.feed() {
                self.apply_feed(feed);
            } else if let Some(resolver) = &inner.feed_resolver {
                match resolver.resolve().await {
                    Some(feed) => self.apply_feed(feed),
                    None => tracing::warn!(
                        target: "updater",
                        provider = %resolver.kind(),
                        "feed resolution failed, relying on the engine's own feed"
                    ),
                }
            }
        }

        let engine_events = inner.engine.subscribe();
        let outcome_events = self.subscribe();

        let listener = tokio::spawn(self.clone().listen(engine_events));
        let poller = tokio::spawn(self.clone().poll());
        inner.tasks.lock().extend([listener, poller]);

        self.check_for_updates().await;
        wait_for_cycle_end(outcome_events).await
    }

    /// Run one check cycle. Failures are reported as `error` events.
    pub async fn check_for_updates(&self) {
        let inner = &self.inner;
        if inner.pending.lock().is_some() {
            tracing::debug!(target: "updater", "update already pending, skipping check");
            return;
        }

        if !inner.context.platform.engine_self_managed() && !inner.has_explicit_feed {
            if let Some(resolver) = inner.feed_resolver.as_ref().filter(|r| r.per_release()) {
                match resolver.resolve().await {
                    Some(feed) => self.apply_feed(feed),
                    None => {
                        self.report_error(&format!(
                            "unable to resolve {} feed url",
                            resolver.kind()
                        ));
                        return;
                    }
                }
            }
        }

        self.set_phase(UpdatePhase::Checking);
        inner.events.emit(UpdaterEvent::CheckingForUpdate);
        if let Err(err) = inner.engine.check_for_updates().await {
            self.report_error(&err.to_string());
        }
    }

    /// Try to satisfy the release `version` with a delta, falling back to the
    /// engine's full download on any failure.
    pub async fn do_smart_download(
        &self,
        version: &str,
        release_date: Option<&str>,
    ) -> SmartDownloadOutcome {
        let inner = &self.inner;
        let Some(flight) = self.begin_flight(version) else {
            return SmartDownloadOutcome::AlreadyInFlight;
        };
        let info = UpdateInfo::new(version, release_date.map(str::to_owned));
        self.set_phase(UpdatePhase::DeltaEvaluating);

        let Some(feed) = self.current_feed().await else {
            return self.fall_back(FallbackReason::NoFeed).await;
        };

        let channel = inner.context.channel().delta_channel();
        let manifest_name = manifest_file_name(&channel, inner.context.platform);
        let manifest = match self.fetch_manifest(&feed, &manifest_name, &flight.cancel).await {
            Ok(manifest) => manifest,
            Err(UpdaterError::Cancelled) => return self.cancelled(),
            Err(err) => {
                return self
                    .fall_back(FallbackReason::ManifestUnavailable(err.to_string()))
                    .await
            }
        };

        let current = inner.context.version_string();
        let Some(entry) = manifest.entry_for(&current, version, release_date) else {
            return self.fall_back(FallbackReason::NoDeltaForVersion).await;
        };
        let info = UpdateInfo::new(version, entry.release_date.clone().or(info.release_date));

        let local = match entry.local_path(&inner.config.cache_dir) {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!(target: "updater", %err, "rejecting manifest entry");
                return self.fall_back(FallbackReason::InvalidArtifactPath).await;
            }
        };

        if integrity::matches(&local, &entry.sha256).await {
            tracing::info!(target: "updater", path = %local.display(), "delta already cached");
            return self.delta_ready(local, &info);
        }

        self.set_phase(UpdatePhase::DeltaDownloading);
        let downloaded = self
            .download_delta(&feed, &entry.relative_path, &local, &flight.cancel)
            .await;
        if let Err(err) = downloaded {
            return match err {
                UpdaterError::Cancelled => self.cancelled(),
                err => self.fall_back(FallbackReason::DownloadFailed(err.to_string())).await,
            };
        }

        self.set_phase(UpdatePhase::DeltaVerifying);
        if let Err(err) = integrity::verify(&local, &entry.sha256).await {
            if let Err(err) = tokio::fs::remove_file(&local).await {
                tracing::warn!(
                    target: "updater",
                    path = %local.display(),
                    %err,
                    "cannot remove corrupt delta"
                );
            }
            let reason = match err {
                UpdaterError::IntegrityMismatch { expected, actual } => {
                    FallbackReason::IntegrityMismatch { expected, actual }
                }
                err => FallbackReason::DownloadFailed(err.to_string()),
            };
            return self.fall_back(reason).await;
        }

        drop(flight);
        self.delta_ready(local, &info)
    }

    /// Install the pending update now and quit.
    ///
    /// Does nothing when no update is pending.
    pub async fn quit_and_install(&self) {
        let Some(update) = self.inner.pending.lock().take() else {
            tracing::debug!(target: "updater", "quit and install requested with nothing pending");
            return;
        };

        self.settle_in_flight().await;
        self.inner.host.prepare_for_quit();
        // Let handlers already queued for the closing windows run first.
        tokio::task::yield_now().await;
        self.apply(update, QuitMode::Confirmed).await;
    }

    /// Called when the process is about to exit without a confirmed install.
    ///
    /// A pending update is applied inline so a finished download is not lost.
    pub async fn on_before_quit(&self) {
        let Some(update) = self.inner.pending.lock().take() else {
            return;
        };

        tracing::info!(
            target: "updater",
            version = %update.target_version,
            is_delta = update.is_delta,
            "applying pending update on exit"
        );
        self.settle_in_flight().await;
        self.apply(update, QuitMode::Unconditional).await;
    }

    /// Stop polling and listening, cancel any running download and wait for it.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.settle_in_flight().await;

        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn listen(self, mut events: broadcast::Receiver<EngineEvent>) {
        loop {
            let event = tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(event) => self.handle_engine_event(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(target: "updater", skipped, "engine events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn poll(self) {
        let period = self.inner.config.poll_interval();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = ticker.tick() => self.check_for_updates().await,
            }
        }
    }

    async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::UpdateAvailable(info) => {
                // Runs on its own task so the listener keeps draining events.
                let this = self.clone();
                tokio::spawn(async move { this.on_update_available(info).await });
            }
            EngineEvent::UpdateNotAvailable => {
                tracing::info!(target: "updater", "no update available");
                self.set_phase(UpdatePhase::NoUpdate);
                self.inner.events.emit(UpdaterEvent::UpdateNotAvailable);
            }
            EngineEvent::UpdateDownloaded(info) => self.on_full_downloaded(info).await,
            EngineEvent::Error(message) => self.report_error(&message),
        }
    }

    async fn on_update_available(&self, info: UpdateInfo) {
        let inner = &self.inner;
        tracing::info!(target: "updater", version = %info.version, "update available");
        inner.events.emit(UpdaterEvent::UpdateAvailable(info.clone()));

        if inner.pending.lock().is_some() {
            tracing::debug!(target: "updater", "update already pending");
            return;
        }

        let platform = inner.context.platform;
        if platform.engine_self_managed() || !platform.supports_delta() {
            self.request_full_update().await;
            return;
        }

        let prior = inner.prior_attempt.lock().clone();
        if let Some(record) = prior {
            if record.app_version == inner.context.version_string() {
                tracing::warn!(
                    target: "updater",
                    attempted = %record.attempted_version,
                    was_delta = record.is_delta,
                    "previous update attempt did not take effect, using full installer"
                );
                self.request_full_update().await;
                return;
            }
        }

        let outcome = self
            .do_smart_download(&info.version, info.release_date.as_deref())
            .await;
        tracing::debug!(target: "updater", ?outcome, "smart download finished");
    }

    async fn on_full_downloaded(&self, info: UpdateInfo) {
        if self.inner.context.platform.engine_self_managed() {
            // The native pipeline owns installation; no pending state is kept.
            tracing::info!(
                target: "updater",
                version = %info.version,
                "installing engine-managed update"
            );
            self.set_phase(UpdatePhase::Applying);
            self.inner.events.emit(UpdaterEvent::UpdateDownloaded(info));
            if let Err(err) = self.inner.applier.apply_full(true).await {
                self.report_error(&err.to_string());
            }
            return;
        }

        self.on_update_ready(PendingUpdate::full(&info));
    }

    fn on_update_ready(&self, update: PendingUpdate) {
        let inner = &self.inner;
        {
            let mut pending = inner.pending.lock();
            if pending.is_some() {
                tracing::debug!(
                    target: "updater",
                    version = %update.target_version,
                    "update already pending"
                );
                return;
            }
            *pending = Some(update.clone());
        }

        tracing::info!(
            target: "updater",
            version = %update.target_version,
            is_delta = update.is_delta,
            "update ready to install"
        );
        self.set_phase(if update.is_delta {
            UpdatePhase::Ready
        } else {
            UpdatePhase::Downloaded
        });
        inner.events.emit(UpdaterEvent::UpdateDownloaded(update.info()));

        match &inner.surface {
            Some(surface) => surface.signal_ready(&update),
            None => inner.host.notify_update_ready(&update),
        }
    }

    fn delta_ready(&self, artifact: PathBuf, info: &UpdateInfo) -> SmartDownloadOutcome {
        let update = PendingUpdate::delta(artifact, info);
        self.on_update_ready(update.clone());
        SmartDownloadOutcome::Ready(update)
    }

    async fn fall_back(&self, reason: FallbackReason) -> SmartDownloadOutcome {
        tracing::warn!(target: "updater", %reason, "falling back to full update");
        self.set_phase(UpdatePhase::FallbackToFull);
        self.inner
            .events
            .emit(UpdaterEvent::DeltaFallback(reason.to_string()));
        self.request_full_update().await;
        SmartDownloadOutcome::FellBack(reason)
    }

    fn cancelled(&self) -> SmartDownloadOutcome {
        tracing::info!(target: "updater", "smart download cancelled");
        self.set_phase(UpdatePhase::Idle);
        SmartDownloadOutcome::Cancelled
    }

    async fn request_full_update(&self) {
        self.set_phase(UpdatePhase::FullDownloading);
        if let Err(err) = self.inner.engine.download_update().await {
            self.report_error(&err.to_string());
        }
    }

    async fn fetch_manifest(
        &self,
        feed: &FeedDescriptor,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<DeltaManifest> {
        let url = feed.resolve(name)?;
        tracing::debug!(target: "updater", %url, "fetching delta manifest");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdaterError::Cancelled),
            response = self.inner.client.get(url).send() => response?,
        };
        let status = response.status();
        if !status.is_success() {
            return Err(UpdaterError::Network {
                status: status.as_u16(),
            });
        }

        let manifest = DeltaManifest::from_slice(&response.bytes().await?)?;
        tracing::debug!(target: "updater", entries = manifest.len(), "delta manifest loaded");
        Ok(manifest)
    }

    async fn download_delta(
        &self,
        feed: &FeedDescriptor,
        relative_path: &str,
        local: &std::path::Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = feed.resolve(relative_path)?;
        tracing::info!(target: "updater", %url, path = %local.display(), "downloading delta");

        let events = self.inner.events.clone();
        let on_progress = move |progress: &DownloadProgress| {
            events.emit(UpdaterEvent::DownloadProgress(ProgressReport::from(progress)));
        };
        self.inner
            .downloader
            .download_file(&url, local, &on_progress, cancel)
            .await
    }

    async fn apply(&self, update: PendingUpdate, mode: QuitMode) {
        let inner = &self.inner;
        self.set_phase(UpdatePhase::Applying);

        if !inner.context.platform.engine_self_managed() {
            let record = UpdateAttemptRecord::new(
                update.is_delta,
                update.target_version.clone(),
                inner.context.version_string(),
            );
            if let Err(err) = self.write_attempt(record).await {
                tracing::warn!(target: "updater", %err, "cannot record update attempt");
            }
        }

        let result = if update.is_delta {
            match &update.artifact_path {
                Some(artifact) => inner.applier.apply_delta(artifact).await,
                None => Err(UpdaterError::PatchApply("delta update without artifact".into())),
            }
        } else {
            inner.applier.apply_full(mode == QuitMode::Confirmed).await
        };

        match result {
            Ok(()) => {
                tracing::info!(
                    target: "updater",
                    version = %update.target_version,
                    is_delta = update.is_delta,
                    "update handed off"
                );
                self.set_phase(UpdatePhase::Terminated);
                // Unconditional quits are already on their way out.
                if update.is_delta && mode == QuitMode::Confirmed {
                    inner.host.exit();
                }
            }
            Err(err) => {
                // Nothing was started, so a later relaunch at this version is
                // not a failed attempt.
                if !inner.context.platform.engine_self_managed() {
                    if let Err(err) = self.clear_attempt().await {
                        tracing::warn!(target: "updater", %err, "cannot clear update attempt");
                    }
                }
                self.handle_apply_failure(&err);
            }
        }
    }

    async fn read_attempt(&self) -> Option<UpdateAttemptRecord> {
        let store = self.inner.state.clone();
        match tokio::task::spawn_blocking(move || store.read()).await {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(target: "updater", %err, "update state read task failed");
                None
            }
        }
    }

    async fn write_attempt(&self, record: UpdateAttemptRecord) -> Result<()> {
        let store = self.inner.state.clone();
        tokio::task::spawn_blocking(move || store.write(&record))
            .await
            .map_err(|err| UpdaterError::Other(format!("task join error: {err}")))?
    }

    async fn clear_attempt(&self) -> Result<()> {
        let store = self.inner.state.clone();
        tokio::task::spawn_blocking(move || store.clear())
            .await
            .map_err(|err| UpdaterError::Other(format!("task join error: {err}")))?
    }

    fn handle_apply_failure(&self, err: &UpdaterError) {
        let message = err.to_string();
        tracing::error!(target: "updater", error = %message, "update hand-off failed");
        self.report_error(&message);
        if self.inner.config.apply_failure_policy == ApplyFailurePolicy::NotifyUser {
            self.inner.host.notify_apply_failed(&message);
        }
    }

    async fn current_feed(&self) -> Option<FeedDescriptor> {
        if let Some(feed) = self.feed() {
            return Some(feed);
        }
        self.inner
            .engine
            .base_url()
            .await
            .map(|url| FeedDescriptor::new(FeedProviderKind::Generic, url))
    }

    fn apply_feed(&self, feed: FeedDescriptor) {
        tracing::info!(
            target: "updater",
            provider = %feed.provider,
            url = %feed.base_url,
            "using feed"
        );
        if let Err(err) = self.inner.engine.set_feed_url(&feed.base_url) {
            tracing::warn!(target: "updater", %err, "engine rejected feed url");
        }
        *self.inner.feed.lock() = Some(feed);
    }

    fn begin_flight(&self, version: &str) -> Option<Flight<'_>> {
        let inner = &*self.inner;
        let mut slot = inner.in_flight.lock();
        if let Some((running, _)) = slot.as_ref() {
            tracing::debug!(
                target: "updater",
                running = %running,
                requested = %version,
                "smart download already in flight"
            );
            return None;
        }

        let cancel = inner.shutdown.child_token();
        *slot = Some((version.to_owned(), cancel.clone()));
        inner.busy.send_replace(true);
        Some(Flight { inner, cancel })
    }

    /// Cancel the running smart download, if any, and wait until it has
    /// cleaned up.
    async fn settle_in_flight(&self) {
        if let Some((version, cancel)) = self.inner.in_flight.lock().as_ref() {
            tracing::info!(target: "updater", %version, "cancelling in-flight download");
            cancel.cancel();
        }
        let mut busy = self.inner.busy.subscribe();
        let _ = busy.wait_for(|busy| !*busy).await;
    }

    fn report_error(&self, message: &str) {
        tracing::error!(target: "updater", error = %message, "update error");
        self.set_phase(UpdatePhase::Error);
        self.inner
            .events
            .emit(UpdaterEvent::Error(message.to_owned()));
    }

    fn set_phase(&self, phase: UpdatePhase) {
        let previous = self.inner.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(target: "updater", from = ?previous, to = ?phase, "phase change");
        }
    }
}

async fn wait_for_cycle_end(mut events: broadcast::Receiver<UpdaterEvent>) -> CycleOutcome {
    loop {
        match events.recv().await {
            Ok(UpdaterEvent::UpdateNotAvailable) => return CycleOutcome::NoUpdate,
            Ok(UpdaterEvent::UpdateDownloaded(info)) => return CycleOutcome::UpdateReady(info),
            Ok(UpdaterEvent::Error(message)) => return CycleOutcome::Error(message),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => {
                return CycleOutcome::Error("updater event channel closed".into())
            }
        }
    }
}
