//! Streaming fetch-to-file with redirect handling and progress reporting.

use crate::error::{Result, UpdaterError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::LOCATION;
use reqwest::{redirect, Client, Response, StatusCode, Url};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Default bound on the length of a redirect chain.
pub const DEFAULT_MAX_REDIRECTS: usize = 5;

const UNITS: [&str; 6] = ["bytes", "KB", "MB", "GB", "TB", "PB"];

/// Snapshot handed to progress callbacks after every received chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub transferred_bytes: u64,
    /// `None` when the server sent no `Content-Length`.
    pub total_bytes: Option<u64>,
    /// `None` whenever the total is unknown or zero.
    pub percentage: Option<f64>,
}

impl DownloadProgress {
    pub fn new(transferred_bytes: u64, total_bytes: Option<u64>) -> Self {
        let percentage = total_bytes
            .filter(|total| *total > 0)
            .map(|total| transferred_bytes as f64 * 100.0 / total as f64);
        Self {
            transferred_bytes,
            total_bytes,
            percentage,
        }
    }
}

/// Callback invoked with each progress snapshot.
pub type ProgressFn = dyn Fn(&DownloadProgress) + Send + Sync;

/// Abstraction over fetching an artefact into a local file.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `destination`, reporting progress per chunk.
    ///
    /// On failure or cancellation no partial file is left at `destination`.
    async fn download_file(
        &self,
        url: &Url,
        destination: &Path,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Builder for [`ResumableDownloader`].
#[derive(Default)]
pub struct ResumableDownloaderBuilder {
    max_redirects: Option<usize>,
    user_agent: Option<String>,
}

impl ResumableDownloaderBuilder {
    /// Maximum number of redirects followed before giving up.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = Some(max);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn build(self) -> Result<ResumableDownloader> {
        // Redirects are followed by hand so the chain length can be bounded
        // and reported as a distinct error.
        let mut builder = Client::builder().redirect(redirect::Policy::none());
        if let Some(user_agent) = self.user_agent {
            builder = builder.user_agent(user_agent);
        }

        Ok(ResumableDownloader {
            client: builder.build()?,
            max_redirects: self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
        })
    }
}

/// HTTP(S) downloader streaming response bodies straight to disk.
#[derive(Clone)]
pub struct ResumableDownloader {
    client: Client,
    max_redirects: usize,
}

impl ResumableDownloader {
    pub fn builder() -> ResumableDownloaderBuilder {
        ResumableDownloaderBuilder::default()
    }

    async fn fetch(&self, url: &Url, cancel: &CancellationToken) -> Result<Response> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UpdaterError::Cancelled),
            response = self.client.get(url.clone()).send() => Ok(response?),
        }
    }
}

#[async_trait]
impl Downloader for ResumableDownloader {
    async fn download_file(
        &self,
        url: &Url,
        destination: &Path,
        on_progress: &ProgressFn,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut current = url.clone();

        for _ in 0..=self.max_redirects {
            let response = self.fetch(&current, cancel).await?;
            let status = response.status();

            match status {
                StatusCode::OK => {
                    let total = response.content_length();
                    tracing::debug!(
                        target: "updater",
                        url = %current,
                        total = ?total,
                        "streaming download"
                    );
                    return stream_to_file(
                        response.bytes_stream(),
                        destination,
                        total,
                        on_progress,
                        cancel,
                    )
                    .await;
                }
                StatusCode::MOVED_PERMANENTLY
                | StatusCode::FOUND
                | StatusCode::SEE_OTHER
                | StatusCode::TEMPORARY_REDIRECT
                | StatusCode::PERMANENT_REDIRECT => {
                    let location = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|value| value.to_str().ok())
                        .ok_or(UpdaterError::MissingRedirectLocation)?;
                    let next = current.join(location)?;
                    tracing::debug!(
                        target: "updater",
                        from = %current,
                        to = %next,
                        status = status.as_u16(),
                        "following redirect"
                    );
                    current = next;
                }
                other => {
                    return Err(UpdaterError::Network {
                        status: other.as_u16(),
                    })
                }
            }
        }

        Err(UpdaterError::RedirectLoop {
            max: self.max_redirects,
        })
    }
}

/// Write `body` into a fresh file at `destination`, removing it on any failure.
async fn stream_to_file<S>(
    body: S,
    destination: &Path,
    total: Option<u64>,
    on_progress: &ProgressFn,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    let mut file = File::create(destination).await?;

    let outcome = write_body(body, &mut file, total, on_progress, cancel).await;
    if let Err(err) = outcome {
        drop(file);
        if let Err(remove_err) = tokio::fs::remove_file(destination).await {
            tracing::warn!(
                target: "updater",
                path = %destination.display(),
                %remove_err,
                "failed to remove partial download"
            );
        }
        return Err(err);
    }

    Ok(())
}

async fn write_body<S>(
    body: S,
    file: &mut File,
    total: Option<u64>,
    on_progress: &ProgressFn,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: Stream<Item = reqwest::Result<Bytes>>,
{
    futures::pin_mut!(body);
    let mut transferred = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(UpdaterError::Cancelled),
            next = body.next() => next,
        };

        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        transferred += chunk.len() as u64;
        on_progress(&DownloadProgress::new(transferred, total));
    }

    file.flush().await?;
    Ok(())
}

/// Render a byte count with the largest unit that keeps the value below 1024.
///
/// Values below 10 in any unit above bytes keep one decimal place.
pub fn humanize_bytes(bytes: u64) -> String {
    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit > 0 && value < 10.0 {
        format!("{value:.1} {}", UNITS[unit])
    } else {
        format!("{value:.0} {}", UNITS[unit])
    }
}
