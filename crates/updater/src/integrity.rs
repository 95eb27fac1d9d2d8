//! SHA-256 verification of downloaded artefacts.

use crate::error::{Result, UpdaterError};
use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Hex encoded SHA-256 of the file at `path`, or `None` if it does not exist.
///
/// The file is streamed in fixed-size chunks so large artefacts never have to
/// fit in memory.
pub async fn compute_hash(path: &Path) -> io::Result<Option<String>> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(Some(hex::encode(hasher.finalize())))
}

/// Check the file at `path` against `expected_hex`.
///
/// A missing file is reported with `actual` set to `missing`.
pub async fn verify(path: &Path, expected_hex: &str) -> Result<()> {
    let expected = expected_hex.trim().to_ascii_lowercase();
    let actual = compute_hash(path)
        .await?
        .unwrap_or_else(|| "missing".to_owned());

    if actual != expected {
        return Err(UpdaterError::IntegrityMismatch { expected, actual });
    }
    Ok(())
}

/// Whether the file at `path` hashes to `expected_hex`.
///
/// Unreadable and missing files are reported as a mismatch.
pub async fn matches(path: &Path, expected_hex: &str) -> bool {
    match compute_hash(path).await {
        Ok(Some(actual)) => actual.eq_ignore_ascii_case(expected_hex.trim()),
        Ok(None) => false,
        Err(err) => {
            tracing::debug!(target: "updater", path = %path.display(), %err, "hashing failed");
            false
        }
    }
}
