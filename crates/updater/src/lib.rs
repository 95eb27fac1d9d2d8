//! Delta-first self-update orchestration.
//!
//! The crate sits on top of a platform's native update engine. When the
//! engine reports a new release, the updater looks for a binary delta from the
//! running version in the feed's delta manifest, downloads it into a local
//! cache, verifies its SHA-256 and hands it to a detached patch process on
//! quit. Anything that goes wrong on that path falls back to the engine's own
//! full download, so a release is never stuck behind a broken delta.
//!
//! ```ignore
//! use delta_updater::{AppContext, DeltaUpdater, UpdaterConfig};
//!
//! # use std::sync::Arc;
//! # async fn demo(engine: Arc<dyn delta_updater::UpdateEngine>) -> delta_updater::Result<()> {
//! let context = AppContext::current("Acme Desk", env!("CARGO_PKG_VERSION"))?;
//! let updater = DeltaUpdater::builder(context, engine)
//!     .config(UpdaterConfig::for_app("Acme Desk"))
//!     .build()?;
//!
//! match updater.boot().await {
//!     delta_updater::CycleOutcome::UpdateReady(info) => {
//!         println!("{} is ready, restart to install", info.version);
//!     }
//!     outcome => println!("check finished: {outcome:?}"),
//! }
//! # Ok(())
//! # }
//! ```

mod applier;
mod config;
mod context;
mod download;
mod engine;
mod error;
mod events;
mod feed;
pub mod integrity;
mod manifest;
mod orchestrator;
mod state;

pub use applier::{
    BundledTools, DetachedSpawner, PatchApplier, ProcessSpawner, DELTA_INSTALLER_ARGS,
    HPATCHZ_BINARY, PATCH_AGENT_BINARY,
};
pub use config::{ApplyFailurePolicy, FeedConfig, UpdaterConfig, DEFAULT_POLL_INTERVAL_SECS};
pub use context::{AppContext, Platform, UpdateChannel};
pub use download::{
    humanize_bytes, DownloadProgress, Downloader, ProgressFn, ResumableDownloader,
    ResumableDownloaderBuilder, DEFAULT_MAX_REDIRECTS,
};
pub use engine::{EngineEvent, HostApp, PendingUpdate, ProcessHost, StatusSurface, UpdateEngine};
pub use error::{Result, UpdaterError};
pub use events::{EventDispatcher, ProgressReport, UpdateInfo, UpdaterEvent};
pub use feed::{
    normalize_base_url, url_from_base, FeedDescriptor, FeedProviderKind, FeedResolver,
    GenericFeed, GitHubReleaseFeed, GitHubReleaseFeedBuilder, S3Feed,
};
pub use manifest::{manifest_file_name, DeltaArtifact, DeltaManifest, DeltaManifestEntry};
pub use orchestrator::{
    CycleOutcome, DeltaUpdater, DeltaUpdaterBuilder, FallbackReason, SmartDownloadOutcome,
    UpdatePhase,
};
pub use state::{UpdateAttemptRecord, UpdateStateStore, STATE_FILE_NAME};
