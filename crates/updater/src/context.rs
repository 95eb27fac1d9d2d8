//! Immutable description of the running application.

use crate::error::Result;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating system family the updater is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Delta artefacts are silently runnable installers.
    Windows,
    /// Deltas are applied by the bundled patch agent.
    MacOs,
    /// The native engine downloads and installs by itself.
    Linux,
}

impl Platform {
    /// Platform of the current build target.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Suffix used in delta manifest file names.
    pub fn manifest_tag(self) -> &'static str {
        match self {
            Platform::Windows => "win",
            Platform::MacOs => "mac",
            Platform::Linux => "linux",
        }
    }

    /// Whether delta artefacts can be applied here at all.
    pub fn supports_delta(self) -> bool {
        matches!(self, Platform::Windows | Platform::MacOs)
    }

    /// The native engine discovers feeds, downloads and installs on its own,
    /// so the updater neither resolves feeds nor keeps attempt records.
    pub fn engine_self_managed(self) -> bool {
        matches!(self, Platform::Linux)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_tag())
    }
}

/// Release stream derived from the pre-release tag of a version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateChannel {
    Latest,
    Stable,
    Beta,
    Alpha,
    Other(String),
}

impl UpdateChannel {
    /// `1.2.0` is `latest`, `1.2.0-beta.3` is `beta`.
    pub fn from_version(version: &Version) -> Self {
        if version.pre.is_empty() {
            return UpdateChannel::Latest;
        }
        let tag = version.pre.as_str().split('.').next().unwrap_or_default();
        match tag {
            "latest" => UpdateChannel::Latest,
            "stable" => UpdateChannel::Stable,
            "beta" => UpdateChannel::Beta,
            "alpha" => UpdateChannel::Alpha,
            other => UpdateChannel::Other(other.to_owned()),
        }
    }

    /// Delta manifests are published per stable/beta/alpha stream, never for `latest`.
    pub fn delta_channel(&self) -> UpdateChannel {
        match self {
            UpdateChannel::Latest => UpdateChannel::Stable,
            other => other.clone(),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            UpdateChannel::Latest => "latest",
            UpdateChannel::Stable => "stable",
            UpdateChannel::Beta => "beta",
            UpdateChannel::Alpha => "alpha",
            UpdateChannel::Other(tag) => tag,
        }
    }
}

impl fmt::Display for UpdateChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the running application, handed to the orchestrator once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
    /// Product name, used for cache paths and by the patch agent.
    pub app_name: String,
    /// Version of the running build.
    pub version: Version,
    /// Platform the updater is running on.
    pub platform: Platform,
}

impl AppContext {
    pub fn new(app_name: impl Into<String>, version: Version, platform: Platform) -> Self {
        Self {
            app_name: app_name.into(),
            version,
            platform,
        }
    }

    /// Context for the current build target, parsing `version` as semver.
    pub fn current(app_name: impl Into<String>, version: &str) -> Result<Self> {
        Ok(Self::new(app_name, Version::parse(version)?, Platform::current()))
    }

    pub fn channel(&self) -> UpdateChannel {
        UpdateChannel::from_version(&self.version)
    }

    /// Version string used as the manifest key and in attempt records.
    pub fn version_string(&self) -> String {
        self.version.to_string()
    }
}
