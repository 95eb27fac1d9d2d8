//! Delta manifest documents published next to each release.
//!
//! Schema version 1: a JSON object keyed by the version a client is currently
//! running. Each value names the delta artefact (relative to the feed base)
//! that upgrades that version to the release, and its SHA-256:
//!
//! ```json
//! {
//!   "1.2.0": { "path": "deltas/1.2.0-to-1.3.0.exe", "sha256": "9f86d0…" },
//!   "1.2.1": {
//!     "path": "deltas/1.2.1-to-1.3.0.exe",
//!     "sha256": "60303a…",
//!     "releaseDate": "2024-03-01"
//!   }
//! }
//! ```

use crate::context::{Platform, UpdateChannel};
use crate::error::{Result, UpdaterError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// File name of the manifest for a channel and platform, e.g. `stable-delta-win.json`.
pub fn manifest_file_name(channel: &UpdateChannel, platform: Platform) -> String {
    format!("{channel}-delta-{}.json", platform.manifest_tag())
}

/// Raw manifest value for one source version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeltaArtifact {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

/// Parsed manifest document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct DeltaManifest {
    entries: BTreeMap<String, DeltaArtifact>,
}

impl DeltaManifest {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn insert(&mut self, from_version: impl Into<String>, artifact: DeltaArtifact) {
        self.entries.insert(from_version.into(), artifact);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Usable entry for `current_version`, or `None` when the entry is absent
    /// or lacks a path or hash.
    pub fn entry_for(
        &self,
        current_version: &str,
        target_version: &str,
        release_date: Option<&str>,
    ) -> Option<DeltaManifestEntry> {
        let artifact = self.entries.get(current_version)?;
        let path = artifact.path.as_deref().map(str::trim).filter(|p| !p.is_empty())?;
        let sha256 = artifact
            .sha256
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())?;

        Some(DeltaManifestEntry {
            target_version: target_version.to_owned(),
            relative_path: path.to_owned(),
            sha256: sha256.to_ascii_lowercase(),
            release_date: artifact
                .release_date
                .clone()
                .or_else(|| release_date.map(str::to_owned)),
        })
    }
}

/// A validated delta that upgrades the running version to `target_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaManifestEntry {
    pub target_version: String,
    /// Relative to the feed base and to the local cache root.
    pub relative_path: String,
    /// Lowercase hex SHA-256.
    pub sha256: String,
    pub release_date: Option<String>,
}

impl DeltaManifestEntry {
    /// Deterministic location of this artefact under `cache_root`.
    ///
    /// Absolute paths and `..` components are rejected.
    pub fn local_path(&self, cache_root: &Path) -> Result<PathBuf> {
        let relative = Path::new(&self.relative_path);
        let mut path = cache_root.to_path_buf();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(UpdaterError::InvalidArtifactPath(relative.to_path_buf()))
                }
            }
        }
        if path == cache_root {
            return Err(UpdaterError::InvalidArtifactPath(relative.to_path_buf()));
        }
        Ok(path)
    }
}
