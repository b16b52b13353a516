//! Collaborator seams of the orchestrator
//!
//! - [`SiteAdapter`]: host-specific ingestion. An adapter registered for a
//!   hostname receives the raw URL and owns every entity created beneath that
//!   host's node; it may use [`Ingestor::store_file`] to download and dispatch.
//! - [`RawArchive`]: invoked for every stored file before dispatch. Only a
//!   no-op implementation exists.

use crate::error::Result;
use crate::graph::EntityId;
use crate::orchestrator::Ingestor;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use url::Url;

#[async_trait]
pub trait SiteAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Ingest `url`, creating entities under `host`; returns the number of
    /// files downloaded
    async fn ingest(&self, ingestor: &Ingestor, url: &Url, host: EntityId) -> Result<usize>;
}

/// Site adapters keyed by normalized hostname
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SiteAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, host: impl Into<String>, adapter: Arc<dyn SiteAdapter>) {
        self.adapters.insert(host.into(), adapter);
    }

    pub fn get(&self, host: &str) -> Option<Arc<dyn SiteAdapter>> {
        self.adapters.get(host).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut hosts: Vec<_> = self
            .adapters
            .iter()
            .map(|(host, adapter)| format!("{}={}", host, adapter.name()))
            .collect();
        hosts.sort();
        f.debug_struct("AdapterRegistry").field("adapters", &hosts).finish()
    }
}

/// Archival of raw downloaded bytes
pub trait RawArchive: Send + Sync {
    fn archive(&self, path: &Path, entity: EntityId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopArchive;

impl RawArchive for NoopArchive {
    fn archive(&self, _path: &Path, _entity: EntityId) -> Result<()> {
        Ok(())
    }
}
