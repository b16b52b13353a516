//! Delimited-text dialects
//!
//! Most sources are plain comma-separated files. Some repositories use their
//! own conventions (OpenSecrets bulk data quotes fields with `|`), so the
//! dialect is chosen from the `repo` fact of the file's ancestors.

use crate::config::IngestConfig;
use std::collections::BTreeMap;
use tracing::warn;

pub const DEFAULT_DIALECT: &str = "excel";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub name: String,
    pub delimiter: u8,
    pub quote: u8,
    pub quoting: bool,
    pub double_quote: bool,
    pub escape: Option<u8>,
}

impl Dialect {
    pub fn excel() -> Self {
        Self {
            name: "excel".to_string(),
            delimiter: b',',
            quote: b'"',
            quoting: true,
            double_quote: true,
            escape: None,
        }
    }

    pub fn excel_tab() -> Self {
        Self {
            name: "excel-tab".to_string(),
            delimiter: b'\t',
            ..Self::excel()
        }
    }

    pub fn opensecrets() -> Self {
        Self {
            name: "opensecrets".to_string(),
            quote: b'|',
            ..Self::excel()
        }
    }

    /// A CSV reader configured for this dialect; every record is read as
    /// data, including the header
    pub fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .quote(self.quote)
            .quoting(self.quoting)
            .double_quote(self.double_quote)
            .escape(self.escape);
        builder
    }
}

/// Named dialects plus the repository -> dialect mapping
#[derive(Debug, Clone)]
pub struct DialectRegistry {
    dialects: BTreeMap<String, Dialect>,
    repos: BTreeMap<String, String>,
    default: Dialect,
}

impl Default for DialectRegistry {
    fn default() -> Self {
        let dialects = [Dialect::excel(), Dialect::excel_tab(), Dialect::opensecrets()]
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        Self {
            dialects,
            repos: BTreeMap::new(),
            default: Dialect::excel(),
        }
    }
}

impl DialectRegistry {
    pub fn from_config(config: &IngestConfig) -> Self {
        let mut registry = Self::default();
        for (repo, dialect) in &config.repo_dialects {
            registry.map_repo(repo.clone(), dialect.clone());
        }
        registry
    }

    pub fn register(&mut self, dialect: Dialect) {
        self.dialects.insert(dialect.name.clone(), dialect);
    }

    pub fn map_repo(&mut self, repo: impl Into<String>, dialect: impl Into<String>) {
        self.repos.insert(repo.into(), dialect.into());
    }

    /// Dialect for files from `repo`; unknown repositories and unknown
    /// dialect names fall back to the default
    pub fn resolve(&self, repo: Option<&str>) -> &Dialect {
        let Some(name) = repo.and_then(|r| self.repos.get(r)) else {
            return &self.default;
        };

        match self.dialects.get(name) {
            Some(dialect) => dialect,
            None => {
                warn!(
                    repo = repo.unwrap_or_default(),
                    dialect = %name,
                    fallback = DEFAULT_DIALECT,
                    "Unknown dialect, using default"
                );
                &self.default
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_repo() {
        let registry = DialectRegistry::from_config(&IngestConfig::default());
        let dialect = registry.resolve(Some("opensecrets.org"));

        assert_eq!(dialect.name, "opensecrets");
        assert_eq!(dialect.quote, b'|');
        assert_eq!(dialect.delimiter, b',');
    }

    #[test]
    fn test_resolve_falls_back() {
        let mut registry = DialectRegistry::default();
        registry.map_repo("data.gov", "fixed-width");

        assert_eq!(registry.resolve(None).name, DEFAULT_DIALECT);
        assert_eq!(registry.resolve(Some("unknown.org")).name, DEFAULT_DIALECT);
        assert_eq!(registry.resolve(Some("data.gov")).name, DEFAULT_DIALECT);
    }

    #[test]
    fn test_opensecrets_quoting() {
        let data = "|id|,|name|\n|1|,|Smith, John|\n";
        let mut reader = Dialect::opensecrets().reader_builder().from_reader(data.as_bytes());
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();

        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][1], "Smith, John");
    }
}
