//! Ingestion orchestrator
//!
//! `ingest(url)` resolves the URL's place in the graph
//! (`root -> host -> url`), obtains the candidate files either from a site
//! adapter or from the generic fallback for the URL's protocol, stores and
//! dispatches every candidate that is not already in the graph, and appends
//! a changelog entry to the URL entity.
//!
//! Per-candidate failures are logged and counted; they never abort the run.
//! Cancellation is checked between candidates only.

use crate::adapter::{AdapterRegistry, NoopArchive, RawArchive};
use crate::config::IngestConfig;
use crate::dialect::DialectRegistry;
use crate::dispatch::Dispatcher;
use crate::error::{IngestError, Result};
use crate::fetch::{Fetch, HttpFetcher};
use crate::graph::{keys, EntityGraph, EntityId};
use crate::scrape::{HtmlLinkScraper, LinkScraper};
use crate::signature;
use crate::store::Store;
use chrono::Utc;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use trove_common::checksum::sha256_hex;
use trove_common::types::ChangelogEntry;
use url::Url;
use walkdir::WalkDir;

const STAGING_DIR: &str = ".staging";
const QUERY_DIGEST_LEN: usize = 12;

/// Summary of one `ingest` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub url: String,
    pub host: String,
    pub downloads: usize,
    /// Candidates already present in the graph
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub elapsed_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local(PathBuf),
    Remote(Url),
}

/// A file to store under the host's data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Entity name: the link URL or the local path
    pub name: String,
    pub source: Source,
    /// Destination relative to `<data_dir>/<host>`
    pub relative: PathBuf,
}

impl Candidate {
    pub fn local(path: &Path, root: &Path) -> Self {
        let relative = path
            .strip_prefix(root)
            .ok()
            .filter(|r| !r.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .or_else(|| path.file_name().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("file"));

        Self {
            name: path.display().to_string(),
            source: Source::Local(path.to_path_buf()),
            relative: sanitize(&relative),
        }
    }

    /// Destination from the URL path; a query or fragment adds a directory
    /// named by a digest of the full URL, so `page.php?id=1` and
    /// `page.php?id=2` are stored apart
    pub fn remote(url: Url) -> Self {
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let mut relative = if segments.is_empty() {
            PathBuf::from("index")
        } else {
            sanitize(&segments.iter().collect::<PathBuf>())
        };

        if url.query().is_some() || url.fragment().is_some() {
            let digest = sha256_hex(url.as_str());
            let file = relative
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("index"));
            relative.set_file_name(format!("q-{}", &digest[..QUERY_DIGEST_LEN]));
            relative.push(file);
        }

        Self {
            name: url.to_string(),
            source: Source::Remote(url),
            relative,
        }
    }
}

/// Drop every component that is not a plain name
fn sanitize(path: &Path) -> PathBuf {
    let clean: PathBuf = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if clean.as_os_str().is_empty() {
        PathBuf::from("index")
    } else {
        clean
    }
}

/// Parse user input as a URL; bare hosts default to `http`, absolute paths
/// become `file` URLs
pub fn parse_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if Path::new(raw).is_absolute() {
        return Url::from_file_path(raw).map_err(|_| IngestError::Fetch {
            url: raw.to_string(),
            reason: "not a valid file path".to_string(),
        });
    }

    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Url::parse(&format!("http://{}", raw))?),
        Err(e) => Err(e.into()),
    }
}

/// Hostname namespace of `url`: lowercase, without `www.`, `localhost` if empty
pub fn normalize_host(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        "localhost".to_string()
    } else {
        host.to_string()
    }
}

pub struct Ingestor {
    config: IngestConfig,
    graph: EntityGraph,
    dispatcher: Arc<Dispatcher>,
    fetcher: Arc<dyn Fetch>,
    scraper: Arc<dyn LinkScraper>,
    adapters: AdapterRegistry,
    archive: Arc<dyn RawArchive>,
    cancel: CancellationToken,
}

impl Ingestor {
    pub fn new(
        config: IngestConfig,
        graph: EntityGraph,
        dispatcher: Dispatcher,
        fetcher: Arc<dyn Fetch>,
        scraper: Arc<dyn LinkScraper>,
    ) -> Self {
        Self {
            config,
            graph,
            dispatcher: Arc::new(dispatcher),
            fetcher,
            scraper,
            adapters: AdapterRegistry::default(),
            archive: Arc::new(NoopArchive),
            cancel: CancellationToken::new(),
        }
    }

    /// Open the configured store and wire up the default collaborators
    pub fn from_config(config: IngestConfig) -> Result<Self> {
        let store = Store::open(&config.database_path)?;
        Self::with_graph(config, EntityGraph::new(store))
    }

    /// Default collaborators over an existing graph
    pub fn with_graph(config: IngestConfig, graph: EntityGraph) -> Result<Self> {
        let classifier = signature::from_config(&config)?;
        let dialects = DialectRegistry::from_config(&config);
        let dispatcher = Dispatcher::with_default_rules(classifier, graph.clone(), dialects, &config)?;
        let fetcher = HttpFetcher::new(config.data_dir.join(STAGING_DIR), config.fetch_timeout())?;
        let scraper = HtmlLinkScraper::new(config.fetch_timeout())?;

        info!(
            database = %config.database_path.display(),
            data_dir = %config.data_dir.display(),
            classifier = ?config.classifier,
            "Ingestor ready"
        );

        Ok(Self::new(config, graph, dispatcher, Arc::new(fetcher), Arc::new(scraper)))
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_archive(mut self, archive: Arc<dyn RawArchive>) -> Self {
        self.archive = archive;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ingest everything reachable from `url`
    ///
    /// Fails only if the URL cannot be parsed or its entities cannot be
    /// created; every later failure is logged and counted in the report.
    #[instrument(skip(self))]
    pub async fn ingest(&self, url: &str) -> Result<IngestReport> {
        let start = Utc::now();
        let url = parse_url(url)?;
        let host = normalize_host(&url);

        let root = self.graph.get_or_create(&self.config.root_entity)?;
        let host_entity = self.graph.get_or_create_child(&host, root)?;
        self.graph.set_fact(host_entity, keys::REPO, host.as_str())?;
        let url_entity = self.graph.get_or_create_child(url.as_str(), host_entity)?;
        self.graph.set_fact(url_entity, keys::URL, url.as_str())?;
        self.graph.set_fact(url_entity, keys::REPO, host.as_str())?;

        let mut report = IngestReport {
            url: url.to_string(),
            host: host.clone(),
            ..Default::default()
        };

        if let Some(adapter) = self.adapters.get(&host) {
            info!(adapter = adapter.name(), host = %host, "Delegating to site adapter");
            match adapter.ingest(self, &url, host_entity).await {
                Ok(downloads) => report.downloads += downloads,
                Err(e) => {
                    error!(adapter = adapter.name(), url = %url, error = %e, "Site adapter failed");
                    report.failed += 1;
                },
            }
        } else {
            match self.candidates(&url).await {
                Ok(candidates) => {
                    self.process_candidates(url_entity, &host, candidates, &mut report).await
                },
                Err(e) => {
                    error!(url = %url, error = %e, "Failed to list candidates");
                    report.failed += 1;
                },
            }
        }

        let finish = Utc::now();
        let entry = ChangelogEntry::new(start, finish, report.downloads);
        report.elapsed_ms = entry.elapsed_ms;
        if let Err(e) = self.record_changelog(url_entity, &entry) {
            error!(url = %url, error = %e, "Failed to record changelog");
        }

        info!(
            url = %url,
            host = %host,
            downloads = report.downloads,
            skipped = report.skipped,
            failed = report.failed,
            elapsed_ms = report.elapsed_ms,
            "Ingestion finished"
        );
        Ok(report)
    }

    fn record_changelog(&self, entity: EntityId, entry: &ChangelogEntry) -> Result<()> {
        self.graph
            .append_fact(entity, keys::CHANGELOG, serde_json::to_string(entry)?)
    }

    /// Generic candidate discovery by protocol
    async fn candidates(&self, url: &Url) -> Result<Vec<Candidate>> {
        match url.scheme() {
            "file" => {
                let path = url.to_file_path().map_err(|_| IngestError::Fetch {
                    url: url.to_string(),
                    reason: "not a local path".to_string(),
                })?;
                local_candidates(&path)
            },
            "ftp" => {
                warn!(url = %url, "FTP sources are not supported");
                Ok(Vec::new())
            },
            _ => {
                let links = self.scraper.links(url, &self.config.link_extensions).await?;
                debug!(url = %url, links = links.len(), "Found data links");
                Ok(links.into_iter().map(|link| Candidate::remote(link.url)).collect())
            },
        }
    }

    async fn process_candidates(
        &self,
        parent: EntityId,
        host: &str,
        candidates: Vec<Candidate>,
        report: &mut IngestReport,
    ) {
        for candidate in candidates {
            if self.cancel.is_cancelled() {
                warn!(url = %report.url, "Ingestion cancelled, remaining candidates left for the next run");
                report.cancelled = true;
                break;
            }

            match self.graph.find(&candidate.name) {
                Ok(Some(_)) => {
                    info!(entity = %candidate.name, "Already ingested, skipping");
                    report.skipped += 1;
                    continue;
                },
                Ok(None) => {},
                Err(e) => {
                    error!(entity = %candidate.name, error = %e, "Entity lookup failed");
                    report.failed += 1;
                    continue;
                },
            }

            match self.store_file(&candidate, parent, host).await {
                Ok(_) => report.downloads += 1,
                Err(e) => {
                    error!(entity = %candidate.name, error = %e, "Failed to ingest file");
                    report.failed += 1;
                },
            }
        }
    }

    /// Place `candidate` under `<data_dir>/<host>`, register it as a child of
    /// `parent` and dispatch it
    pub async fn store_file(&self, candidate: &Candidate, parent: EntityId, host: &str) -> Result<EntityId> {
        let dest = self.config.data_dir.join(host).join(&candidate.relative);
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        match &candidate.source {
            Source::Local(path) => {
                tokio::fs::copy(path, &dest).await?;
            },
            Source::Remote(url) => {
                let staged = self.fetcher.fetch(url).await?;
                move_file(&staged, &dest).await?;
            },
        }

        let filename = dest.display().to_string();
        let entity = self.graph.get_or_create_child(&candidate.name, parent)?;
        self.graph.set_fact(entity, keys::FILENAME, filename.as_str())?;
        self.graph.set_fact(entity, keys::REPO, host)?;
        debug!(entity = %candidate.name, parent = %parent, path = %filename, "Stored file");

        self.archive.archive(&dest, entity)?;
        let signature = self.dispatcher.dispatch(&dest, entity).await?;
        info!(entity = %candidate.name, signature = %signature, "Dispatched file");

        Ok(entity)
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}

fn local_candidates(path: &Path) -> Result<Vec<Candidate>> {
    if path.is_file() {
        let root = path.parent().unwrap_or(path);
        return Ok(vec![Candidate::local(path, root)]);
    }

    let mut candidates = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| IngestError::Io(e.into()))?;
        if entry.file_type().is_file() {
            candidates.push(Candidate::local(entry.path(), path));
        }
    }
    Ok(candidates)
}

/// Rename, falling back to copy + remove across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
