//! Events surfaced to subscribers and the UI bridge.

use crate::download::{humanize_bytes, DownloadProgress};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const EVENT_BUFFER: usize = 64;

/// Release information reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: String,
    #[serde(default)]
    pub release_date: Option<String>,
}

impl UpdateInfo {
    pub fn new(version: impl Into<String>, release_date: Option<String>) -> Self {
        Self {
            version: version.into(),
            release_date,
        }
    }
}

/// Download progress formatted for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    /// Rounded to two decimals; `None` while the total is unknown.
    pub percentage: Option<f64>,
    pub transferred_human: String,
    pub total_human: String,
}

impl From<&DownloadProgress> for ProgressReport {
    fn from(progress: &DownloadProgress) -> Self {
        Self {
            percentage: progress
                .percentage
                .map(|pct| (pct * 100.0).round() / 100.0),
            transferred_human: humanize_bytes(progress.transferred_bytes),
            total_human: progress
                .total_bytes
                .map(humanize_bytes)
                .unwrap_or_else(|| "unknown".to_owned()),
        }
    }
}

/// Everything the updater reports while it works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum UpdaterEvent {
    CheckingForUpdate,
    UpdateAvailable(UpdateInfo),
    DownloadProgress(ProgressReport),
    UpdateNotAvailable,
    UpdateDownloaded(UpdateInfo),
    /// The delta path was abandoned for a full update. The cycle continues.
    DeltaFallback(String),
    Error(String),
}

impl UpdaterEvent {
    /// Channel name used on the UI bridge.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckingForUpdate => "checking-for-update",
            Self::UpdateAvailable(_) => "update-available",
            Self::DownloadProgress(_) => "download-progress",
            Self::UpdateNotAvailable => "update-not-available",
            Self::UpdateDownloaded(_) => "update-downloaded",
            Self::DeltaFallback(_) => "delta-fallback",
            Self::Error(_) => "error",
        }
    }
}

/// Fan-out of [`UpdaterEvent`]s to any number of subscribers.
///
/// Slow subscribers miss old events instead of blocking the updater.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<UpdaterEvent>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdaterEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: UpdaterEvent) {
        tracing::trace!(target: "updater", event = event.name(), "emit");
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
