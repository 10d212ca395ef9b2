//! Content-addressed on-disk store for button images pushed by the plugin.
//!
//! Existence of `<dir>/<id>` is the entire cache state: no metadata, no
//! expiry, no eviction. Content is treated as immutable per id, so a hit never
//! refetches even if the remote bytes changed.

use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::anyhow;

pub struct ImageCache {
    dir: PathBuf,
}

fn validate_id(id: &str) -> Result<(), anyhow::Error> {
    let path = Path::new(id);
    let mut components = path.components();
    let valid = matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    );
    if !valid || id.starts_with('.') {
        return Err(anyhow!("invalid image id {:?}", id));
    }
    Ok(())
}

impl ImageCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Deterministic path for an image id.
    pub fn path_for(&self, id: &str) -> Result<PathBuf, anyhow::Error> {
        validate_id(id)?;
        Ok(self.dir.join(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.path_for(id).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Return the cache path for `id`, fetching and persisting the content on
    /// a miss. On a hit `fetch` is never polled.
    ///
    /// The write goes to a sibling `.part` file first and is renamed into
    /// place, so a failed fetch leaves no partial file at the final path.
    /// Concurrent calls for the same id may both fetch; the last rename wins,
    /// which is harmless since content is immutable per id.
    pub async fn ensure<F>(&self, id: &str, fetch: F) -> Result<PathBuf, anyhow::Error>
    where
        F: Future<Output = Result<Vec<u8>, anyhow::Error>>,
    {
        let path = self.path_for(id)?;
        if path.is_file() {
            return Ok(path);
        }

        let bytes = fetch.await?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let part = self.dir.join(format!("{id}.part"));
        tokio::fs::write(&part, &bytes).await?;
        tokio::fs::rename(&part, &path).await?;

        Ok(path)
    }
}

/// Fetch raw bytes over HTTP, for `setImage` payload URLs.
pub async fn fetch_url(url: &str) -> Result<Vec<u8>, anyhow::Error> {
    let response = reqwest::get(url).await?;
    if !response.status().is_success() {
        return Err(anyhow!("image fetch failed with status {}", response.status()));
    }
    Ok(response.bytes().await?.to_vec())
}
