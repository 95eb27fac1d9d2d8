//! Feed base URL discovery strategies.

use crate::error::{Result, UpdaterError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;

const GITHUB_API: &str = "https://api.github.com/";
const GITHUB_WEB: &str = "https://github.com/";

/// Which discovery strategy produced a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedProviderKind {
    GitHub,
    Generic,
    S3,
}

impl fmt::Display for FeedProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHub => write!(f, "github"),
            Self::Generic => write!(f, "generic"),
            Self::S3 => write!(f, "s3"),
        }
    }
}

/// A resolved feed location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescriptor {
    pub provider: FeedProviderKind,
    /// Always ends with `/`.
    pub base_url: Url,
}

impl FeedDescriptor {
    pub fn new(provider: FeedProviderKind, base_url: Url) -> Self {
        Self {
            provider,
            base_url: normalize_base_url(base_url),
        }
    }

    /// Resolve a feed-relative path such as `delta.bin` against the base.
    pub fn resolve(&self, relative: &str) -> Result<Url> {
        url_from_base(&self.base_url, relative)
    }
}

/// Append a trailing `/` to the path so relative joins stay inside it.
pub fn normalize_base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Join `relative` onto an already normalized base URL.
pub fn url_from_base(base: &Url, relative: &str) -> Result<Url> {
    base.join(relative.trim_start_matches('/'))
        .map_err(|err| UpdaterError::validation(format!("invalid feed path {relative}: {err}")))
}

/// Single idempotent lookup of a feed base URL.
#[async_trait]
pub trait FeedResolver: Send + Sync {
    fn kind(&self) -> FeedProviderKind;

    /// Whether the base URL changes with every release and must be looked up
    /// again before each check.
    fn per_release(&self) -> bool {
        false
    }

    /// Resolve the feed, or `None` when the provider cannot be reached or
    /// is misconfigured.
    async fn resolve(&self) -> Option<FeedDescriptor>;
}

/// Builder for [`GitHubReleaseFeed`].
#[derive(Default)]
pub struct GitHubReleaseFeedBuilder {
    owner: String,
    repo: String,
    api_base: Option<Url>,
    download_base: Option<Url>,
    client: Option<Client>,
}

impl GitHubReleaseFeedBuilder {
    /// Override the API root (e.g. a GitHub Enterprise host).
    pub fn api_base(mut self, url: Url) -> Self {
        self.api_base = Some(url);
        self
    }

    /// Override the root that release downloads are served from.
    pub fn download_base(mut self, url: Url) -> Self {
        self.download_base = Some(url);
        self
    }

    /// Provide a custom reqwest client instance.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> Result<GitHubReleaseFeed> {
        let api_base = match self.api_base {
            Some(url) => normalize_base_url(url),
            None => Url::parse(GITHUB_API)?,
        };
        let download_base = match self.download_base {
            Some(url) => normalize_base_url(url),
            None => Url::parse(GITHUB_WEB)?,
        };
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(concat!("delta-updater/", env!("CARGO_PKG_VERSION")))
                .build()?,
        };

        Ok(GitHubReleaseFeed {
            owner: self.owner,
            repo: self.repo,
            api_base,
            download_base,
            client,
        })
    }
}

/// Feed rooted at the download folder of the latest published GitHub release.
#[derive(Clone)]
pub struct GitHubReleaseFeed {
    owner: String,
    repo: String,
    api_base: Url,
    download_base: Url,
    client: Client,
}

#[derive(Deserialize)]
struct LatestRelease {
    tag_name: Option<String>,
}

impl GitHubReleaseFeed {
    pub fn builder(owner: impl Into<String>, repo: impl Into<String>) -> GitHubReleaseFeedBuilder {
        GitHubReleaseFeedBuilder {
            owner: owner.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }

    async fn latest_tag(&self) -> Result<Option<String>> {
        let url = self
            .api_base
            .join(&format!("repos/{}/{}/releases/latest", self.owner, self.repo))?;
        let release: LatestRelease = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(release.tag_name.filter(|tag| !tag.is_empty()))
    }
}

#[async_trait]
impl FeedResolver for GitHubReleaseFeed {
    fn kind(&self) -> FeedProviderKind {
        FeedProviderKind::GitHub
    }

    fn per_release(&self) -> bool {
        true
    }

    async fn resolve(&self) -> Option<FeedDescriptor> {
        let tag = match self.latest_tag().await {
            Ok(Some(tag)) => tag,
            Ok(None) => {
                tracing::warn!(
                    target: "updater",
                    owner = %self.owner,
                    repo = %self.repo,
                    "latest release has no tag"
                );
                return None;
            }
            Err(err) => {
                tracing::warn!(
                    target: "updater",
                    owner = %self.owner,
                    repo = %self.repo,
                    %err,
                    "failed to query latest release"
                );
                return None;
            }
        };

        let slug = format!("{}/{}/releases/download/{}/", self.owner, self.repo, tag);
        match self.download_base.join(&slug) {
            Ok(url) => Some(FeedDescriptor::new(FeedProviderKind::GitHub, url)),
            Err(err) => {
                tracing::warn!(target: "updater", %tag, %err, "cannot build release download url");
                None
            }
        }
    }
}

/// Static feed URL.
#[derive(Debug, Clone)]
pub struct GenericFeed {
    url: Url,
}

impl GenericFeed {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl FeedResolver for GenericFeed {
    fn kind(&self) -> FeedProviderKind {
        FeedProviderKind::Generic
    }

    async fn resolve(&self) -> Option<FeedDescriptor> {
        Some(FeedDescriptor::new(
            FeedProviderKind::Generic,
            self.url.clone(),
        ))
    }
}

/// Feed living in an S3 bucket, optionally under a key prefix.
#[derive(Debug, Clone, Default)]
pub struct S3Feed {
    pub bucket: String,
    pub region: Option<String>,
    pub path: Option<String>,
}

impl S3Feed {
    fn url(&self) -> Option<Url> {
        if self.bucket.is_empty() {
            return None;
        }
        let region = self
            .region
            .as_deref()
            .filter(|region| !region.is_empty())
            .map(|region| format!("{region}."))
            .unwrap_or_default();
        let path = self.path.as_deref().unwrap_or_default().trim_start_matches('/');
        let raw = format!("https://{}.s3.{region}amazonaws.com/{path}", self.bucket);
        match Url::parse(&raw) {
            Ok(url) => Some(url),
            Err(err) => {
                tracing::warn!(target: "updater", bucket = %self.bucket, %err, "invalid s3 feed");
                None
            }
        }
    }
}

#[async_trait]
impl FeedResolver for S3Feed {
    fn kind(&self) -> FeedProviderKind {
        FeedProviderKind::S3
    }

    async fn resolve(&self) -> Option<FeedDescriptor> {
        self.url()
            .map(|url| FeedDescriptor::new(FeedProviderKind::S3, url))
    }
}
