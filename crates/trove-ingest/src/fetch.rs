//! Remote fetch
//!
//! Downloads land in a staging directory under a random name; the
//! orchestrator moves them into the data directory once the destination is
//! known. Failures are returned to the caller, which decides whether to
//! retry. Nothing here retries on its own.

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

pub const USER_AGENT: &str = concat!("trove-ingest/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait Fetch: Send + Sync {
    /// Download `url` to a local file and return its path
    async fn fetch(&self, url: &Url) -> Result<PathBuf>;
}

pub struct HttpFetcher {
    client: Client,
    staging_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(staging_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            staging_dir: staging_dir.into(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<PathBuf> {
        let response = self.client.get(url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {}", status),
            });
        }

        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let path = self
            .staging_dir
            .join(format!("{}.download", uuid::Uuid::new_v4().simple()));

        let mut file = tokio::fs::File::create(&path).await?;
        let mut downloaded = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(e.into());
                },
            };
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(path = %path.display(), "Staged download");
        info!(url = %url, bytes = downloaded, "Downloaded");
        Ok(path)
    }
}
