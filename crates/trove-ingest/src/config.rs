//! Ingestion configuration
//!
//! Loaded from `TROVE_*` environment variables (after `.env` has been read
//! by the binary). Invalid values are configuration errors and abort startup.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_PATH: &str = "./trove.db";
pub const DEFAULT_ROOT_ENTITY: &str = "trove";
pub const DEFAULT_DISPATCH_WORKERS: usize = 4;
pub const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_ARCHIVE_DEPTH: usize = 32;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LINK_EXTENSIONS: &str = "csv,zip,exe,xls,txt,rss,xml,json,gz,tgz,tar";
pub const DEFAULT_REPO_DIALECTS: &str = "opensecrets.org=opensecrets";

/// Signature classifier backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierBackend {
    #[default]
    Builtin,
    FileCommand,
}

impl std::str::FromStr for ClassifierBackend {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "builtin" | "magic" => Ok(ClassifierBackend::Builtin),
            "file-command" | "file" => Ok(ClassifierBackend::FileCommand),
            other => Err(IngestError::config(format!(
                "Invalid TROVE_CLASSIFIER: {}. Must be 'builtin' or 'file-command'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database_path: PathBuf,
    /// Root directory for downloaded and extracted files, namespaced by host
    pub data_dir: PathBuf,
    /// Name of the single root entity of the graph
    pub root_entity: String,
    pub classifier: ClassifierBackend,
    /// Upper bound on archive members dispatched concurrently
    pub dispatch_workers: usize,
    pub extract_timeout_secs: u64,
    /// Archives nested deeper than this are recorded but not expanded
    pub max_archive_depth: usize,
    pub fetch_timeout_secs: u64,
    /// File extensions the generic link scrape treats as data
    pub link_extensions: Vec<String>,
    /// Repository namespace -> dialect name
    pub repo_dialects: BTreeMap<String, String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            data_dir: default_data_dir(),
            root_entity: DEFAULT_ROOT_ENTITY.to_string(),
            classifier: ClassifierBackend::default(),
            dispatch_workers: DEFAULT_DISPATCH_WORKERS,
            extract_timeout_secs: DEFAULT_EXTRACT_TIMEOUT_SECS,
            max_archive_depth: DEFAULT_MAX_ARCHIVE_DEPTH,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            link_extensions: parse_list(DEFAULT_LINK_EXTENSIONS),
            repo_dialects: parse_pairs(DEFAULT_REPO_DIALECTS).unwrap_or_default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::temp_dir().join("trove-data")
}

impl IngestConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            database_path: lookup("TROVE_DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            data_dir: lookup("TROVE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            root_entity: lookup("TROVE_ROOT_ENTITY").unwrap_or(defaults.root_entity),
            classifier: lookup("TROVE_CLASSIFIER")
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or(defaults.classifier),
            dispatch_workers: parse_number(&lookup, "TROVE_DISPATCH_WORKERS")?
                .unwrap_or(defaults.dispatch_workers),
            extract_timeout_secs: parse_number(&lookup, "TROVE_EXTRACT_TIMEOUT_SECS")?
                .unwrap_or(defaults.extract_timeout_secs),
            max_archive_depth: parse_number(&lookup, "TROVE_MAX_ARCHIVE_DEPTH")?
                .unwrap_or(defaults.max_archive_depth),
            fetch_timeout_secs: parse_number(&lookup, "TROVE_FETCH_TIMEOUT_SECS")?
                .unwrap_or(defaults.fetch_timeout_secs),
            link_extensions: lookup("TROVE_LINK_EXTENSIONS")
                .map(|s| parse_list(&s))
                .unwrap_or(defaults.link_extensions),
            repo_dialects: lookup("TROVE_REPO_DIALECTS")
                .map(|s| parse_pairs(&s))
                .transpose()?
                .unwrap_or(defaults.repo_dialects),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_entity.trim().is_empty() {
            return Err(IngestError::config("TROVE_ROOT_ENTITY cannot be empty"));
        }
        if self.dispatch_workers == 0 {
            return Err(IngestError::config("TROVE_DISPATCH_WORKERS must be greater than 0"));
        }
        if self.extract_timeout_secs == 0 {
            return Err(IngestError::config("TROVE_EXTRACT_TIMEOUT_SECS must be greater than 0"));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(IngestError::config("TROVE_FETCH_TIMEOUT_SECS must be greater than 0"));
        }
        if self.max_archive_depth == 0 {
            return Err(IngestError::config("TROVE_MAX_ARCHIVE_DEPTH must be greater than 0"));
        }
        Ok(())
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| IngestError::config(format!("{} must be a number, got: {}", key, raw)))
        })
        .transpose()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse `key=value,key=value`
fn parse_pairs(raw: &str) -> Result<BTreeMap<String, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                IngestError::config(format!("Invalid TROVE_REPO_DIALECTS entry: {}", pair))
            })?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
