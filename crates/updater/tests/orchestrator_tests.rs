use async_trait::async_trait;
use delta_updater::{
    AppContext, ApplyFailurePolicy, CycleOutcome, DeltaUpdater, DeltaUpdaterBuilder, Downloader,
    EngineEvent, FallbackReason, GitHubReleaseFeed, HostApp, PendingUpdate, Platform,
    ProcessSpawner, ProgressFn, Result, ResumableDownloader, SmartDownloadOutcome,
    UpdateAttemptRecord, UpdateEngine, UpdateInfo, UpdatePhase, UpdateStateStore, UpdaterConfig,
    UpdaterError, UpdaterEvent, DELTA_INSTALLER_ARGS,
};
use parking_lot::Mutex;
use reqwest::Url;
use semver::Version;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RUNNING: &str = "1.1.0";
const TARGET: &str = "1.2.0";
const MANIFEST: &str = "/stable-delta-win.json";
const DELTA: &[u8] = b"binary delta payload for 1.1.0 -> 1.2.0";

/// Engine double that answers checks with a scripted event.
struct MockEngine {
    events: broadcast::Sender<EngineEvent>,
    check_reply: Option<EngineEvent>,
    checks: AtomicUsize,
    downloads: AtomicUsize,
    installs: Mutex<Vec<(bool, bool)>>,
    feed_urls: Mutex<Vec<Url>>,
}

impl MockEngine {
    fn new(check_reply: Option<EngineEvent>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            events,
            check_reply,
            checks: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            installs: Mutex::new(Vec::new()),
            feed_urls: Mutex::new(Vec::new()),
        })
    }

    fn offering_update() -> Arc<Self> {
        Self::new(Some(EngineEvent::UpdateAvailable(release())))
    }
}

#[async_trait]
impl UpdateEngine for MockEngine {
    async fn check_for_updates(&self) -> Result<()> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if let Some(event) = self.check_reply.clone() {
            let _ = self.events.send(event);
        }
        Ok(())
    }

    fn set_feed_url(&self, url: &Url) -> Result<()> {
        self.feed_urls.lock().push(url.clone());
        Ok(())
    }

    async fn download_update(&self) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(EngineEvent::UpdateDownloaded(release()));
        Ok(())
    }

    async fn quit_and_install(&self, silent: bool, force_run_after: bool) -> Result<()> {
        self.installs.lock().push((silent, force_run_after));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn base_url(&self) -> Option<Url> {
        None
    }
}

#[derive(Default)]
struct RecordingHost {
    prepared: AtomicUsize,
    exits: AtomicUsize,
    ready: Mutex<Vec<PendingUpdate>>,
    failures: Mutex<Vec<String>>,
}

impl HostApp for RecordingHost {
    fn prepare_for_quit(&self) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_update_ready(&self, update: &PendingUpdate) {
        self.ready.lock().push(update.clone());
    }

    fn notify_apply_failed(&self, message: &str) {
        self.failures.lock().push(message.to_owned());
    }
}

#[derive(Default)]
struct RecordingSpawner {
    calls: Mutex<Vec<(PathBuf, Vec<OsString>)>>,
    fail: bool,
}

impl ProcessSpawner for RecordingSpawner {
    fn spawn_detached(&self, program: &Path, args: &[OsString]) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::NotFound, "installer missing"));
        }
        self.calls.lock().push((program.to_path_buf(), args.to_vec()));
        Ok(())
    }
}

/// Holds every download until released or cancelled.
struct GatedDownloader {
    entered: Notify,
    release: Notify,
    inner: ResumableDownloader,
}

impl GatedDownloader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
            inner: ResumableDownloader::builder().build().unwrap(),
        })
    }
}

#[async_trait]
impl Downloader for GatedDownloader {
    async fn download_file(
        &self,
        url: &Url,
        destination: &Path,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.entered.notify_one();
        tokio::select! {
            _ = self.release.notified() => {}
            _ = cancel.cancelled() => return Err(UpdaterError::Cancelled),
        }
        self.inner
            .download_file(url, destination, on_progress, cancel)
            .await
    }
}

struct Harness {
    dir: TempDir,
    server: MockServer,
    engine: Arc<MockEngine>,
    host: Arc<RecordingHost>,
    spawner: Arc<RecordingSpawner>,
}

impl Harness {
    async fn new(engine: Arc<MockEngine>) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            server: MockServer::start().await,
            engine,
            host: Arc::new(RecordingHost::default()),
            spawner: Arc::new(RecordingSpawner::default()),
        }
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    fn state_store(&self) -> UpdateStateStore {
        UpdateStateStore::new(self.dir.path().join("data").join("update-attempt.json"))
    }

    fn config(&self) -> UpdaterConfig {
        UpdaterConfig::for_app("Demo")
            .cache_dir(self.cache_dir())
            .state_file(self.state_store().path())
            .resources_dir(self.dir.path().join("resources"))
            .poll_interval_secs(3600)
    }

    fn builder(&self, platform: Platform) -> DeltaUpdaterBuilder {
        DeltaUpdater::builder(
            AppContext::new("Demo", Version::parse(RUNNING).unwrap(), platform),
            self.engine.clone(),
        )
        .config(self.config())
        .feed_url(Url::parse(&self.server.uri()).unwrap())
        .spawner(self.spawner.clone())
        .host(self.host.clone())
    }

    fn updater(&self) -> DeltaUpdater {
        self.builder(Platform::Windows).build().unwrap()
    }

    async fn serve_manifest(&self, body: serde_json::Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(MANIFEST))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(times)
            .mount(&self.server)
            .await;
    }

    async fn serve_delta(&self, body: &[u8], times: u64) {
        Mock::given(method("GET"))
            .and(path("/delta.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .expect(times)
            .mount(&self.server)
            .await;
    }
}

fn release() -> UpdateInfo {
    UpdateInfo::new(TARGET, Some("2024-03-01T12:30:00.000Z".into()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn delta_manifest() -> serde_json::Value {
    json!({ RUNNING: { "path": "delta.bin", "sha256": sha256_hex(DELTA) } })
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

async fn wait_until(condition: impl Fn() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

#[tokio::test]
async fn test_delta_is_downloaded_verified_and_announced() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(DELTA, 1).await;
    let updater = harness.updater();

    let outcome = updater.do_smart_download(TARGET, None).await;

    let expected = harness.cache_dir().join("delta.bin");
    let update = match outcome {
        SmartDownloadOutcome::Ready(update) => update,
        other => panic!("expected a ready delta, got {other:?}"),
    };
    assert!(update.is_delta);
    assert_eq!(update.artifact_path.as_deref(), Some(expected.as_path()));
    assert_eq!(update.target_version, TARGET);
    assert_eq!(std::fs::read(&expected).unwrap(), DELTA);

    assert_eq!(updater.pending_update(), Some(update.clone()));
    assert_eq!(updater.phase(), UpdatePhase::Ready);
    assert_eq!(*harness.host.ready.lock(), vec![update]);
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cached_delta_skips_the_network() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(DELTA, 0).await;
    std::fs::create_dir_all(harness.cache_dir()).unwrap();
    std::fs::write(harness.cache_dir().join("delta.bin"), DELTA).unwrap();

    let outcome = harness.updater().do_smart_download(TARGET, None).await;

    assert!(matches!(outcome, SmartDownloadOutcome::Ready(_)));
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stale_cache_is_downloaded_again() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(DELTA, 1).await;
    std::fs::create_dir_all(harness.cache_dir()).unwrap();
    std::fs::write(harness.cache_dir().join("delta.bin"), b"left over from 1.1.5").unwrap();

    let outcome = harness.updater().do_smart_download(TARGET, None).await;

    assert!(matches!(outcome, SmartDownloadOutcome::Ready(_)));
    assert_eq!(
        std::fs::read(harness.cache_dir().join("delta.bin")).unwrap(),
        DELTA
    );
}

#[tokio::test]
async fn test_missing_manifest_falls_back_once() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    Mock::given(method("GET"))
        .and(path(MANIFEST))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&harness.server)
        .await;
    harness.serve_delta(DELTA, 0).await;
    let updater = harness.updater();
    let mut events = updater.subscribe();

    let outcome = updater.do_smart_download(TARGET, None).await;

    assert!(matches!(
        outcome,
        SmartDownloadOutcome::FellBack(FallbackReason::ManifestUnavailable(_))
    ));
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 1);
    assert!(updater.pending_update().is_none());

    let mut fallbacks = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let UpdaterEvent::DeltaFallback(reason) = event {
            fallbacks.push(reason);
        }
    }
    assert_eq!(fallbacks.len(), 1);
    assert!(fallbacks[0].contains("manifest"));
}

#[tokio::test]
async fn test_no_entry_for_running_version_falls_back_without_download() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness
        .serve_manifest(
            json!({ "1.0.0": { "path": "delta.bin", "sha256": sha256_hex(DELTA) } }),
            1,
        )
        .await;
    harness.serve_delta(DELTA, 0).await;

    let outcome = harness.updater().do_smart_download(TARGET, None).await;

    assert_eq!(
        outcome,
        SmartDownloadOutcome::FellBack(FallbackReason::NoDeltaForVersion)
    );
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_escaping_artifact_path_falls_back() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness
        .serve_manifest(
            json!({ RUNNING: { "path": "../outside.bin", "sha256": sha256_hex(DELTA) } }),
            1,
        )
        .await;

    let outcome = harness.updater().do_smart_download(TARGET, None).await;

    assert_eq!(
        outcome,
        SmartDownloadOutcome::FellBack(FallbackReason::InvalidArtifactPath)
    );
    assert!(!harness.dir.path().join("outside.bin").exists());
}

#[tokio::test]
async fn test_corrupt_download_is_removed_and_falls_back() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(b"truncated", 1).await;

    let outcome = harness.updater().do_smart_download(TARGET, None).await;

    match outcome {
        SmartDownloadOutcome::FellBack(FallbackReason::IntegrityMismatch { expected, actual }) => {
            assert_eq!(expected, sha256_hex(DELTA));
            assert_eq!(actual, sha256_hex(b"truncated"));
        }
        other => panic!("expected an integrity fallback, got {other:?}"),
    }
    assert!(!harness.cache_dir().join("delta.bin").exists());
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_progress_is_reported_while_downloading() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(DELTA, 1).await;
    let updater = harness.updater();
    let mut events = updater.subscribe();

    updater.do_smart_download(TARGET, None).await;

    let mut reports = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let UpdaterEvent::DownloadProgress(report) = event {
            reports.push(report);
        }
    }
    let last = reports.last().expect("no progress reported");
    assert_eq!(last.percentage, Some(100.0));
    assert_eq!(last.total_human, last.transferred_human);
}

#[tokio::test]
async fn test_overlapping_smart_downloads_are_single_flight() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 2).await;
    harness.serve_delta(DELTA, 1).await;
    let gate = GatedDownloader::new();
    let updater = harness
        .builder(Platform::Windows)
        .downloader(gate.clone())
        .build()
        .unwrap();

    let first = tokio::spawn({
        let updater = updater.clone();
        async move { updater.do_smart_download(TARGET, None).await }
    });
    within(gate.entered.notified()).await;

    assert_eq!(
        updater.do_smart_download(TARGET, None).await,
        SmartDownloadOutcome::AlreadyInFlight
    );

    gate.release.notify_one();
    let outcome = within(first).await.unwrap();
    assert!(matches!(outcome, SmartDownloadOutcome::Ready(_)));

    // The slot is free again; the cached artefact satisfies a second run.
    let again = updater.do_smart_download(TARGET, None).await;
    assert!(matches!(again, SmartDownloadOutcome::Ready(_)));
    assert_eq!(harness.host.ready.lock().len(), 1);
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_download() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    let gate = GatedDownloader::new();
    let updater = harness
        .builder(Platform::Windows)
        .downloader(gate.clone())
        .build()
        .unwrap();

    let running = tokio::spawn({
        let updater = updater.clone();
        async move { updater.do_smart_download(TARGET, None).await }
    });
    within(gate.entered.notified()).await;

    within(updater.shutdown()).await;

    assert_eq!(within(running).await.unwrap(), SmartDownloadOutcome::Cancelled);
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 0);
    assert!(updater.pending_update().is_none());
}

#[tokio::test]
async fn test_quit_and_install_hands_off_delta_once() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(DELTA, 1).await;
    let updater = harness.updater();
    updater.do_smart_download(TARGET, None).await;

    updater.quit_and_install().await;
    updater.on_before_quit().await;

    let calls = harness.spawner.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, harness.cache_dir().join("delta.bin"));
    let expected: Vec<OsString> = DELTA_INSTALLER_ARGS.iter().map(OsString::from).collect();
    assert_eq!(calls[0].1, expected);

    assert_eq!(harness.host.prepared.load(Ordering::SeqCst), 1);
    assert_eq!(harness.host.exits.load(Ordering::SeqCst), 1);
    assert_eq!(updater.phase(), UpdatePhase::Terminated);
    assert!(updater.pending_update().is_none());

    let record = harness.state_store().read().unwrap();
    assert!(record.is_delta);
    assert_eq!(record.attempted_version, TARGET);
    assert_eq!(record.app_version, RUNNING);
}

#[tokio::test]
async fn test_unconditional_quit_applies_pending_delta() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(DELTA, 1).await;
    let updater = harness.updater();
    updater.do_smart_download(TARGET, None).await;

    updater.on_before_quit().await;
    updater.quit_and_install().await;

    assert_eq!(harness.spawner.calls.lock().len(), 1);
    assert_eq!(harness.host.prepared.load(Ordering::SeqCst), 0);
    assert_eq!(harness.host.exits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_quit_without_pending_update_does_nothing() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    let updater = harness.updater();

    updater.quit_and_install().await;
    updater.on_before_quit().await;

    assert!(harness.spawner.calls.lock().is_empty());
    assert!(harness.engine.installs.lock().is_empty());
    assert_eq!(harness.host.prepared.load(Ordering::SeqCst), 0);
    assert!(harness.state_store().read().is_none());
}

#[tokio::test]
async fn test_failed_hand_off_notifies_user_when_configured() {
    let mut harness = Harness::new(MockEngine::offering_update()).await;
    harness.spawner = Arc::new(RecordingSpawner {
        fail: true,
        ..Default::default()
    });
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(DELTA, 1).await;
    let updater = harness
        .builder(Platform::Windows)
        .config(
            harness
                .config()
                .apply_failure_policy(ApplyFailurePolicy::NotifyUser),
        )
        .build()
        .unwrap();
    updater.do_smart_download(TARGET, None).await;
    let mut events = updater.subscribe();

    updater.quit_and_install().await;

    assert_eq!(harness.host.failures.lock().len(), 1);
    assert_eq!(harness.host.exits.load(Ordering::SeqCst), 0);
    assert_eq!(updater.phase(), UpdatePhase::Error);
    assert!(matches!(events.try_recv(), Ok(UpdaterEvent::Error(_))));
}

#[tokio::test]
async fn test_failed_hand_off_retries_delta_from_cache() {
    let mut harness = Harness::new(MockEngine::offering_update()).await;
    harness.spawner = Arc::new(RecordingSpawner {
        fail: true,
        ..Default::default()
    });
    harness.serve_manifest(delta_manifest(), 2).await;
    harness.serve_delta(DELTA, 1).await;
    let updater = harness.updater();
    updater.do_smart_download(TARGET, None).await;

    updater.quit_and_install().await;

    assert_eq!(updater.phase(), UpdatePhase::Error);
    assert!(harness.state_store().read().is_none());
    assert!(harness.host.failures.lock().is_empty());

    let outcome = within(updater.boot()).await;

    assert_eq!(outcome, CycleOutcome::UpdateReady(release()));
    assert!(updater.pending_update().unwrap().is_delta);
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 0);
    updater.shutdown().await;
}

#[tokio::test]
async fn test_boot_reports_no_update() {
    let harness = Harness::new(MockEngine::new(Some(EngineEvent::UpdateNotAvailable))).await;
    let updater = harness.updater();

    let outcome = within(updater.boot()).await;

    assert_eq!(outcome, CycleOutcome::NoUpdate);
    assert_eq!(updater.phase(), UpdatePhase::NoUpdate);
    assert_eq!(harness.engine.checks.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.engine.feed_urls.lock()[0].as_str(),
        format!("{}/", harness.server.uri())
    );
    updater.shutdown().await;
}

#[tokio::test]
async fn test_boot_falls_back_to_full_update_and_installs_through_engine() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    Mock::given(method("GET"))
        .and(path(MANIFEST))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&harness.server)
        .await;
    let updater = harness.updater();

    let outcome = within(updater.boot()).await;

    assert_eq!(outcome, CycleOutcome::UpdateReady(release()));
    let pending = updater.pending_update().unwrap();
    assert!(!pending.is_delta);
    assert_eq!(updater.phase(), UpdatePhase::Downloaded);

    updater.quit_and_install().await;

    assert_eq!(*harness.engine.installs.lock(), vec![(true, true)]);
    assert!(harness.spawner.calls.lock().is_empty());
    assert_eq!(harness.host.exits.load(Ordering::SeqCst), 0);
    assert!(!harness.state_store().read().unwrap().is_delta);
    updater.shutdown().await;
}

#[tokio::test]
async fn test_previous_attempt_at_running_version_forces_full_update() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness
        .state_store()
        .write(&UpdateAttemptRecord::new(true, TARGET, RUNNING))
        .unwrap();
    harness.serve_manifest(delta_manifest(), 0).await;
    harness.serve_delta(DELTA, 0).await;
    let updater = harness.updater();

    let outcome = within(updater.boot()).await;

    assert_eq!(outcome, CycleOutcome::UpdateReady(release()));
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 1);
    assert!(!updater.pending_update().unwrap().is_delta);
    updater.shutdown().await;
}

#[tokio::test]
async fn test_boot_delivers_delta_end_to_end() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 1).await;
    harness.serve_delta(DELTA, 1).await;
    let updater = harness.updater();
    let mut events = updater.subscribe();

    let outcome = within(updater.boot()).await;

    assert_eq!(outcome, CycleOutcome::UpdateReady(release()));
    assert!(updater.pending_update().unwrap().is_delta);
    assert_eq!(harness.engine.downloads.load(Ordering::SeqCst), 0);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        if !matches!(event, UpdaterEvent::DownloadProgress(_)) {
            names.push(event.name());
        }
    }
    assert_eq!(
        names,
        vec!["checking-for-update", "update-available", "update-downloaded"]
    );
    updater.shutdown().await;
}

#[tokio::test]
async fn test_self_managed_platform_installs_immediately() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    harness.serve_manifest(delta_manifest(), 0).await;
    let updater = harness.builder(Platform::Linux).build().unwrap();

    let outcome = within(updater.boot()).await;

    assert_eq!(outcome, CycleOutcome::UpdateReady(release()));
    let engine = harness.engine.clone();
    wait_until(move || !engine.installs.lock().is_empty()).await;
    assert_eq!(*harness.engine.installs.lock(), vec![(true, true)]);
    assert!(harness.engine.feed_urls.lock().is_empty());
    assert!(updater.pending_update().is_none());
    assert!(harness.state_store().read().is_none());
    updater.shutdown().await;
}

#[tokio::test]
async fn test_unresolvable_release_feed_reports_error_without_checking() {
    let harness = Harness::new(MockEngine::offering_update()).await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/desk/releases/latest"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&harness.server)
        .await;
    let feed = GitHubReleaseFeed::builder("acme", "desk")
        .api_base(Url::parse(&harness.server.uri()).unwrap())
        .build()
        .unwrap();
    let updater = DeltaUpdater::builder(
        AppContext::new("Demo", Version::parse(RUNNING).unwrap(), Platform::MacOs),
        harness.engine.clone(),
    )
    .config(harness.config())
    .feed_resolver(Arc::new(feed))
    .host(harness.host.clone())
    .spawner(harness.spawner.clone())
    .build()
    .unwrap();
    let mut events = updater.subscribe();

    updater.check_for_updates().await;

    assert!(matches!(events.try_recv(), Ok(UpdaterEvent::Error(_))));
    assert_eq!(updater.phase(), UpdatePhase::Error);
    assert_eq!(harness.engine.checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_release_feed_is_resolved_before_each_check() {
    let harness = Harness::new(MockEngine::new(Some(EngineEvent::UpdateNotAvailable))).await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/desk/releases/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tag_name": "v1.2.0" })))
        .expect(2)
        .mount(&harness.server)
        .await;
    let base = Url::parse(&harness.server.uri()).unwrap();
    let feed = GitHubReleaseFeed::builder("acme", "desk")
        .api_base(base.clone())
        .download_base(base)
        .build()
        .unwrap();
    let updater = DeltaUpdater::builder(
        AppContext::new("Demo", Version::parse(RUNNING).unwrap(), Platform::MacOs),
        harness.engine.clone(),
    )
    .config(harness.config())
    .feed_resolver(Arc::new(feed))
    .host(harness.host.clone())
    .build()
    .unwrap();

    updater.check_for_updates().await;
    updater.check_for_updates().await;

    let expected = format!("{}/acme/desk/releases/download/v1.2.0/", harness.server.uri());
    assert_eq!(updater.feed().unwrap().base_url.as_str(), expected);
    assert_eq!(harness.engine.feed_urls.lock().len(), 2);
    assert_eq!(harness.engine.checks.load(Ordering::SeqCst), 2);
}
