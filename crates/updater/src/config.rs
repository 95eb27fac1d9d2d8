//! Configuration for the updater.

use crate::download::DEFAULT_MAX_REDIRECTS;
use crate::error::Result;
use crate::feed::{FeedResolver, GenericFeed, GitHubReleaseFeed, S3Feed};
use crate::state::STATE_FILE_NAME;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Fifteen minutes between background checks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15 * 60;

/// What happens when a patch hand-off cannot be started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyFailurePolicy {
    /// Log and emit an error event; the next poll offers the update again.
    #[default]
    RetryNextPoll,
    /// Additionally tell the user right away through the host.
    NotifyUser,
}

/// Where the feed base URL comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum FeedConfig {
    GitHub {
        owner: String,
        repo: String,
    },
    Generic {
        url: String,
    },
    S3 {
        bucket: String,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        path: Option<String>,
    },
}

impl FeedConfig {
    pub fn into_resolver(self) -> Result<Arc<dyn FeedResolver>> {
        let resolver: Arc<dyn FeedResolver> = match self {
            FeedConfig::GitHub { owner, repo } => {
                Arc::new(GitHubReleaseFeed::builder(owner, repo).build()?)
            }
            FeedConfig::Generic { url } => Arc::new(GenericFeed::new(Url::parse(&url)?)),
            FeedConfig::S3 {
                bucket,
                region,
                path,
            } => Arc::new(S3Feed {
                bucket,
                region,
                path,
            }),
        };
        Ok(resolver)
    }
}

/// Configuration for the updater.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Root of the delta artefact cache.
    pub cache_dir: PathBuf,
    /// Location of the last-attempt record.
    pub state_file: PathBuf,
    /// Directory holding the bundled patch agent and `hpatchz`.
    pub resources_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub max_redirects: usize,
    pub user_agent: String,
    pub apply_failure_policy: ApplyFailurePolicy,
    /// `None` leaves feed discovery to the native engine.
    pub feed: Option<FeedConfig>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self::for_app("app")
    }
}

impl UpdaterConfig {
    /// Defaults rooted in the platform cache and data directories for `app_name`.
    pub fn for_app(app_name: &str) -> Self {
        let slug = app_name.to_lowercase().replace(char::is_whitespace, "-");
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(format!("{slug}-updater"));
        let state_file = dirs::data_dir()
            .unwrap_or_else(|| cache_dir.clone())
            .join(&slug)
            .join(STATE_FILE_NAME);
        let resources_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            cache_dir,
            state_file,
            resources_dir,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: format!("{slug}-updater/{}", env!("CARGO_PKG_VERSION")),
            apply_failure_policy: ApplyFailurePolicy::default(),
            feed: None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Writable directory the bundled helpers are copied into.
    pub fn tools_dir(&self) -> PathBuf {
        self.cache_dir.join("tools")
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_file = path.into();
        self
    }

    pub fn resources_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resources_dir = dir.into();
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn apply_failure_policy(mut self, policy: ApplyFailurePolicy) -> Self {
        self.apply_failure_policy = policy;
        self
    }

    pub fn feed(mut self, feed: FeedConfig) -> Self {
        self.feed = Some(feed);
        self
    }
}
