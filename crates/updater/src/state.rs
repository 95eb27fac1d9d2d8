//! Persistence of the last update attempt.
//!
//! A single JSON record is overwritten right before an install or patch is
//! started. If the app comes back up still running the version recorded as
//! `appVersion`, that attempt failed silently and the next one goes straight
//! to the full installer.

use crate::error::{Result, UpdaterError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File name used by [`UpdateStateStore::in_dir`].
pub const STATE_FILE_NAME: &str = "update-attempt.json";

/// Record of the most recent install or patch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAttemptRecord {
    pub is_delta: bool,
    pub attempted_version: String,
    /// Version that was running when the attempt was made.
    pub app_version: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub time_human: String,
}

impl UpdateAttemptRecord {
    /// Record stamped with the current time.
    pub fn new(
        is_delta: bool,
        attempted_version: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self::at(is_delta, attempted_version, app_version, Utc::now())
    }

    pub fn at(
        is_delta: bool,
        attempted_version: impl Into<String>,
        app_version: impl Into<String>,
        when: DateTime<Utc>,
    ) -> Self {
        Self {
            is_delta,
            attempted_version: attempted_version.into(),
            app_version: app_version.into(),
            timestamp: when.timestamp_millis(),
            time_human: when.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

/// Reads and overwrites the attempt record at a fixed per-install path.
#[derive(Debug, Clone)]
pub struct UpdateStateStore {
    path: PathBuf,
}

impl UpdateStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store keeping its record as [`STATE_FILE_NAME`] inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(STATE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the stored record.
    pub fn write(&self, record: &UpdateAttemptRecord) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| UpdaterError::Persistence("state path has no parent".into()))?;
        fs::create_dir_all(parent).map_err(|err| {
            UpdaterError::Persistence(format!("cannot create {}: {err}", parent.display()))
        })?;

        let json = serde_json::to_vec_pretty(record)
            .map_err(|err| UpdaterError::Persistence(format!("cannot serialize record: {err}")))?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(&json)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| {
            UpdaterError::Persistence(format!(
                "cannot write {}: {}",
                self.path.display(),
                err.error
            ))
        })?;

        tracing::debug!(
            target: "updater",
            path = %self.path.display(),
            attempted = %record.attempted_version,
            is_delta = record.is_delta,
            "update attempt recorded"
        );
        Ok(())
    }

    /// The stored record, or `None` when it is absent or unreadable.
    pub fn read(&self) -> Option<UpdateAttemptRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(
                    target: "updater",
                    path = %self.path.display(),
                    %err,
                    "cannot read update state"
                );
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(
                    target: "updater",
                    path = %self.path.display(),
                    %err,
                    "ignoring corrupt update state"
                );
                None
            }
        }
    }

    /// Remove the stored record, ignoring a missing file.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(UpdaterError::Persistence(format!(
                "cannot remove {}: {err}",
                self.path.display()
            ))),
        }
    }
}
