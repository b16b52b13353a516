//! Trove Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Content-sniffing ingestion of downloaded files into an entity graph.
//!
//! # Pipeline
//!
//! - **Orchestrator**: resolves a URL to `root -> host -> url` entities and
//!   collects candidate files (site adapter, local walk or link scrape)
//! - **Dispatcher**: classifies each file by content and routes it to the
//!   first matching handler, expanding archives through a work stack
//! - **Handlers**: archive expansion (zip, gzip/tgz, tar) and delimited-text
//!   schema synthesis into per-file SQLite tables
//! - **Entity graph**: every URL, file and dataset as a named node with typed
//!   facts, persisted in SQLite
//!
//! # Example
//!
//! ```no_run
//! use trove_ingest::{IngestConfig, Ingestor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ingestor = Ingestor::from_config(IngestConfig::from_env()?)?;
//!     let report = ingestor.ingest("http://data.gov/raw/994").await?;
//!     println!("{} new files", report.downloads);
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod dialect;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod handlers;
pub mod orchestrator;
pub mod scrape;
pub mod signature;
pub mod store;
pub mod tables;

pub use config::IngestConfig;
pub use dispatch::{Dispatcher, PendingFile, SignatureHandler};
pub use error::{IngestError, Result};
pub use graph::{EntityGraph, EntityId, FactValue};
pub use orchestrator::{IngestReport, Ingestor};
pub use store::Store;
