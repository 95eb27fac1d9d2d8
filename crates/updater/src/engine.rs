//! Contracts of the collaborators the orchestrator drives but does not own.

use crate::error::Result;
use crate::events::UpdateInfo;
use async_trait::async_trait;
use reqwest::Url;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Notifications published by the native update engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    UpdateAvailable(UpdateInfo),
    UpdateNotAvailable,
    /// A full update finished downloading.
    UpdateDownloaded(UpdateInfo),
    Error(String),
}

/// The platform's own check/download/install machinery.
#[async_trait]
pub trait UpdateEngine: Send + Sync {
    /// Start one check. The outcome arrives as an [`EngineEvent`].
    async fn check_for_updates(&self) -> Result<()>;

    fn set_feed_url(&self, url: &Url) -> Result<()>;

    /// Download the full update for the release last reported as available.
    async fn download_update(&self) -> Result<()>;

    /// Install the downloaded full update and quit.
    async fn quit_and_install(&self, silent: bool, force_run_after: bool) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Base URL of the provider the engine is using, if it knows one.
    async fn base_url(&self) -> Option<Url>;
}

/// What a pending update will install once applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpdate {
    pub is_delta: bool,
    /// Downloaded delta artefact; `None` for full updates owned by the engine.
    pub artifact_path: Option<PathBuf>,
    pub target_version: String,
    pub release_date: Option<String>,
}

impl PendingUpdate {
    pub fn delta(artifact_path: PathBuf, info: &UpdateInfo) -> Self {
        Self {
            is_delta: true,
            artifact_path: Some(artifact_path),
            target_version: info.version.clone(),
            release_date: info.release_date.clone(),
        }
    }

    pub fn full(info: &UpdateInfo) -> Self {
        Self {
            is_delta: false,
            artifact_path: None,
            target_version: info.version.clone(),
            release_date: info.release_date.clone(),
        }
    }

    pub fn info(&self) -> UpdateInfo {
        UpdateInfo::new(self.target_version.clone(), self.release_date.clone())
    }
}

/// Process-level hooks of the host application.
pub trait HostApp: Send + Sync {
    /// Drop listeners that would veto or intercept shutdown and close all
    /// windows other than the updater's own surface.
    fn prepare_for_quit(&self);

    /// Terminate the process after a patch has been handed off.
    fn exit(&self);

    /// Passive notification asking the user to confirm the install.
    fn notify_update_ready(&self, update: &PendingUpdate);

    /// Surface a failed patch hand-off to the user.
    fn notify_apply_failed(&self, message: &str);
}

/// Optional progress/status window owned by the host.
pub trait StatusSurface: Send + Sync {
    fn signal_ready(&self, update: &PendingUpdate);
}

/// Headless [`HostApp`]: logs notifications and exits the process directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessHost;

impl HostApp for ProcessHost {
    fn prepare_for_quit(&self) {}

    fn exit(&self) {
        tracing::info!(target: "updater", "exiting for update");
        std::process::exit(0);
    }

    fn notify_update_ready(&self, update: &PendingUpdate) {
        tracing::info!(
            target: "updater",
            version = %update.target_version,
            is_delta = update.is_delta,
            "update ready, restart to install"
        );
    }

    fn notify_apply_failed(&self, message: &str) {
        tracing::error!(target: "updater", error = %message, "update could not be installed");
    }
}
