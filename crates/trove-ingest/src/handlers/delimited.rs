//! Delimited-text schema synthesis
//!
//! The first record of the file becomes the header. A table with positional
//! columns `col_0..col_n` is created under a fresh opaque name and every
//! following record is loaded into it, padded or truncated to the header
//! width. Table creation and the row load share one transaction, committed
//! once at the end.
//!
//! Each entity owns at most one table. A file whose content hash matches the
//! last load is skipped; changed content with the same header is reloaded
//! into the existing table; a changed header is refused and the existing
//! table is left as it was.

use crate::dialect::{Dialect, DialectRegistry};
use crate::dispatch::{PendingFile, SignatureHandler};
use crate::error::{IngestError, Result};
use crate::graph::{keys, queries, EntityGraph, EntityId, FactValue};
use crate::tables::{self, RowWriter, TableDef};
use async_trait::async_trait;
use csv::ByteRecord;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trove_common::checksum::compute_file_checksum;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisOutcome {
    /// A new table was created and populated
    Loaded { table: String, rows: u64 },
    /// The entity's existing table was cleared and repopulated
    Reloaded { table: String, rows: u64 },
    /// Content unchanged since the last load
    Skipped { table: String },
    Failed { reason: String },
}

impl SynthesisOutcome {
    pub fn table(&self) -> Option<&str> {
        match self {
            Self::Loaded { table, .. } | Self::Reloaded { table, .. } | Self::Skipped { table } => {
                Some(table)
            },
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TableSynthesizer {
    graph: EntityGraph,
    dialects: Arc<DialectRegistry>,
}

impl TableSynthesizer {
    pub fn new(graph: EntityGraph, dialects: DialectRegistry) -> Self {
        Self {
            graph,
            dialects: Arc::new(dialects),
        }
    }

    /// Synthesize and populate the table for `entity`
    ///
    /// Never returns an error: failures are logged against the entity and
    /// reported as [`SynthesisOutcome::Failed`].
    pub fn synthesize(&self, entity: EntityId) -> SynthesisOutcome {
        match self.try_synthesize(entity) {
            Ok(outcome) => outcome,
            Err(e) => {
                let name = self.graph.name(entity).unwrap_or_else(|_| entity.to_string());
                error!(entity = %name, error = %e, "Failed to load delimited text");
                SynthesisOutcome::Failed {
                    reason: e.to_string(),
                }
            },
        }
    }

    fn try_synthesize(&self, entity: EntityId) -> Result<SynthesisOutcome> {
        let name = self.graph.name(entity)?;
        let repo = self.graph.fact_from_ancestors(entity, keys::REPO)?;
        let dialect = self.dialects.resolve(repo.as_ref().and_then(FactValue::as_text));

        let path = match self.graph.fact(entity, keys::FILENAME)? {
            Some(FactValue::Text(path)) => PathBuf::from(path),
            _ => return Err(IngestError::missing_fact(&name, keys::FILENAME)),
        };
        let digest = compute_file_checksum(&path)?;

        self.graph.store().with_conn(|conn| {
            let tx = conn.transaction()?;
            let outcome = load(&tx, entity, &name, &path, dialect, &digest)?;
            tx.commit()?;
            Ok(outcome)
        })
    }
}

/// Table currently owned by an entity
struct OwnedTable {
    def: TableDef,
    column_names: Vec<String>,
    content_sha256: Option<String>,
}

fn owned_table(conn: &Connection, entity: EntityId) -> Result<Option<OwnedTable>> {
    let text = |key: &str| -> Result<Option<String>> {
        Ok(queries::get_fact(conn, entity, key)?.and_then(|v| v.as_text().map(str::to_string)))
    };
    let list = |key: &str| -> Result<Vec<String>> {
        Ok(queries::get_fact(conn, entity, key)?
            .and_then(|v| v.as_list().map(<[String]>::to_vec))
            .unwrap_or_default())
    };

    let Some(name) = text(keys::TABLE_NAME)? else {
        return Ok(None);
    };
    if !tables::exists(conn, &name)? {
        return Ok(None);
    }

    Ok(Some(OwnedTable {
        def: TableDef {
            name,
            columns: list(keys::COLUMNS)?,
        },
        column_names: list(keys::COLUMN_NAMES)?,
        content_sha256: text(keys::CONTENT_SHA256)?,
    }))
}

fn load(
    conn: &Connection,
    entity: EntityId,
    name: &str,
    path: &Path,
    dialect: &Dialect,
    digest: &str,
) -> Result<SynthesisOutcome> {
    let existing = owned_table(conn, entity)?;

    if let Some(owned) = &existing {
        if owned.content_sha256.as_deref() == Some(digest) {
            info!(entity = %name, table = %owned.def.name, "Content unchanged, skipping load");
            return Ok(SynthesisOutcome::Skipped {
                table: owned.def.name.clone(),
            });
        }
    }

    let mut reader = dialect.reader_builder().from_path(path)?;
    let mut records = reader.byte_records();
    let header = match records.next() {
        Some(record) => decode_header(&record?),
        None => return Err(IngestError::synthesis("no header record")),
    };
    if header.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestError::synthesis("header record is blank"));
    }

    let (def, reloaded) = match existing {
        Some(owned) if owned.column_names == header => {
            tables::clear(conn, &owned.def.name)?;
            (owned.def, true)
        },
        Some(owned) => {
            return Err(IngestError::synthesis(format!(
                "header changed for table {} (was {:?}, now {:?})",
                owned.def.name, owned.column_names, header
            )));
        },
        None => {
            let def = TableDef::generate(header.len());
            queries::set_fact(conn, entity, keys::TABLE_NAME, &FactValue::from(def.name.as_str()))?;
            queries::set_fact(conn, entity, keys::COLUMN_NAMES, &FactValue::from(header.clone()))?;
            queries::set_fact(conn, entity, keys::COLUMNS, &FactValue::from(def.columns.clone()))?;
            tables::create(conn, &def)?;
            debug!(entity = %name, table = %def.name, columns = def.columns.len(), "Created table");
            (def, false)
        },
    };

    // Byte records from a flexible reader: the only read failure left is I/O
    let mut rows = 0u64;
    {
        let mut writer = RowWriter::new(conn, &def)?;
        for record in records {
            writer.insert(decode(&record?))?;
            rows += 1;
        }
    }

    queries::set_fact(conn, entity, keys::CONTENT_SHA256, &FactValue::from(digest))?;
    queries::set_fact(conn, entity, keys::ROW_COUNT, &FactValue::from(rows as f64))?;

    info!(
        entity = %name,
        table = %def.name,
        rows = rows,
        reloaded = reloaded,
        "Loaded delimited text"
    );

    Ok(if reloaded {
        SynthesisOutcome::Reloaded { table: def.name, rows }
    } else {
        SynthesisOutcome::Loaded { table: def.name, rows }
    })
}

fn decode(record: &ByteRecord) -> Vec<String> {
    record
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect()
}

fn decode_header(record: &ByteRecord) -> Vec<String> {
    let mut header = decode(record);
    if let Some(first) = header.first_mut() {
        if let Some(stripped) = first.strip_prefix('\u{feff}') {
            *first = stripped.to_string();
        }
    }
    header
}

/// Dispatch handler for text signatures
pub struct DelimitedHandler {
    graph: EntityGraph,
    synthesizer: TableSynthesizer,
}

impl DelimitedHandler {
    pub fn new(graph: EntityGraph, dialects: DialectRegistry) -> Self {
        Self {
            synthesizer: TableSynthesizer::new(graph.clone(), dialects),
            graph,
        }
    }
}

#[async_trait]
impl SignatureHandler for DelimitedHandler {
    fn name(&self) -> &'static str {
        "delimited"
    }

    async fn handle(&self, file: &Path, entity: EntityId) -> Result<Vec<PendingFile>> {
        if self.graph.fact(entity, keys::FILENAME)?.is_none() {
            self.graph
                .set_fact(entity, keys::FILENAME, file.display().to_string())?;
        }

        let synthesizer = self.synthesizer.clone();
        let outcome = tokio::task::spawn_blocking(move || synthesizer.synthesize(entity)).await?;

        match outcome {
            SynthesisOutcome::Failed { reason } => Err(IngestError::Synthesis(reason)),
            _ => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::Store;
    use crate::tables::TableRegistry;
    use pretty_assertions::assert_eq;

    struct Fixture {
        dir: tempfile::TempDir,
        graph: EntityGraph,
        synthesizer: TableSynthesizer,
    }

    impl Fixture {
        fn new() -> Self {
            let graph = EntityGraph::new(Store::open_in_memory().unwrap());
            Self {
                dir: tempfile::tempdir().unwrap(),
                synthesizer: TableSynthesizer::new(graph.clone(), DialectRegistry::default()),
                graph,
            }
        }

        fn file(&self, name: &str, content: &str) -> EntityId {
            let path = self.dir.path().join(name);
            std::fs::write(&path, content).unwrap();
            let entity = self.graph.get_or_create(&path.display().to_string()).unwrap();
            self.graph
                .set_fact(entity, keys::FILENAME, path.display().to_string())
                .unwrap();
            entity
        }

        fn rows(&self, entity: EntityId) -> Vec<Vec<String>> {
            let registry = TableRegistry::from_graph(&self.graph);
            let table = registry.for_entity(entity).unwrap().unwrap();
            registry.rows(&table).unwrap()
        }
    }

    fn row(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_header_and_rows() {
        let fx = Fixture::new();
        let entity = fx.file("rows.csv", "a,b,c\n1,2,3\n4,5,6\n7,8,9\n10,11,12\n13,14,15\n");

        let outcome = fx.synthesizer.synthesize(entity);
        assert!(matches!(outcome, SynthesisOutcome::Loaded { rows: 5, .. }));

        let entity_facts = fx.graph.entity(entity).unwrap();
        assert_eq!(
            entity_facts.fact(keys::COLUMN_NAMES).and_then(FactValue::as_list),
            Some(&row(&["a", "b", "c"])[..])
        );
        assert_eq!(
            entity_facts.fact(keys::COLUMNS).and_then(FactValue::as_list),
            Some(&row(&["col_0", "col_1", "col_2"])[..])
        );
        assert_eq!(entity_facts.fact(keys::ROW_COUNT), Some(&FactValue::Number(5.0)));
        assert_eq!(fx.rows(entity).len(), 5);
    }

    #[test]
    fn test_ragged_rows_padded_and_truncated() {
        let fx = Fixture::new();
        let entity = fx.file("ragged.csv", "a,b,c\n1,2\n4,5,6,extra\n");

        fx.synthesizer.synthesize(entity);

        assert_eq!(fx.rows(entity), vec![row(&["1", "2", ""]), row(&["4", "5", "6"])]);
    }

    #[test]
    fn test_malformed_records_are_still_loaded() {
        let fx = Fixture::new();
        let entity = fx.file("odd.csv", "");
        let path = fx.dir.path().join("odd.csv");
        std::fs::write(&path, b"a,b\n\xff\xfe,1\n\"open quote,2\n").unwrap();

        let outcome = fx.synthesizer.synthesize(entity);

        assert!(matches!(outcome, SynthesisOutcome::Loaded { rows: 2, .. }));
        assert_eq!(fx.rows(entity)[0], row(&["\u{fffd}\u{fffd}", "1"]));
    }

    #[test]
    fn test_unchanged_content_is_skipped() {
        let fx = Fixture::new();
        let entity = fx.file("rows.csv", "name,value\nfoo,1\nbar,2\n");

        let first = fx.synthesizer.synthesize(entity);
        let second = fx.synthesizer.synthesize(entity);

        assert_eq!(second, SynthesisOutcome::Skipped { table: first.table().unwrap().to_string() });
        assert_eq!(TableRegistry::from_graph(&fx.graph).table_names().unwrap().len(), 1);
        assert_eq!(fx.rows(entity).len(), 2);
    }

    #[test]
    fn test_changed_content_reloads_same_table() {
        let fx = Fixture::new();
        let entity = fx.file("rows.csv", "name,value\nfoo,1\nbar,2\n");
        let first = fx.synthesizer.synthesize(entity);

        fx.file("rows.csv", "name,value\nbaz,3\n");
        let second = fx.synthesizer.synthesize(entity);

        assert_eq!(
            second,
            SynthesisOutcome::Reloaded {
                table: first.table().unwrap().to_string(),
                rows: 1
            }
        );
        assert_eq!(fx.rows(entity), vec![row(&["baz", "3"])]);
    }

    #[test]
    fn test_changed_header_keeps_existing_table() {
        let fx = Fixture::new();
        let entity = fx.file("rows.csv", "name,value\nfoo,1\n");
        fx.synthesizer.synthesize(entity);

        fx.file("rows.csv", "name,value,unit\nfoo,1,kg\n");
        let outcome = fx.synthesizer.synthesize(entity);

        assert!(matches!(outcome, SynthesisOutcome::Failed { .. }));
        assert_eq!(fx.rows(entity), vec![row(&["foo", "1"])]);
    }

    #[test]
    fn test_blank_file_fails_without_table() {
        let fx = Fixture::new();
        let entity = fx.file("blank.csv", "\n\n\n");

        let outcome = fx.synthesizer.synthesize(entity);

        assert!(matches!(outcome, SynthesisOutcome::Failed { .. }));
        assert!(fx.graph.fact(entity, keys::TABLE_NAME).unwrap().is_none());
        assert!(TableRegistry::from_graph(&fx.graph).table_names().unwrap().is_empty());
    }

    #[test]
    fn test_repo_dialect_from_ancestor() {
        let fx = Fixture::new();
        let host = fx.graph.get_or_create("opensecrets.org").unwrap();
        fx.graph.set_fact(host, keys::REPO, "opensecrets.org").unwrap();
        let entity = fx.file("lob.txt", "|id|,|name|\n|1|,|Smith, John|\n");
        fx.graph.attach(entity, host).unwrap();

        let synthesizer = TableSynthesizer::new(
            fx.graph.clone(),
            DialectRegistry::from_config(&crate::config::IngestConfig::default()),
        );
        synthesizer.synthesize(entity);

        assert_eq!(fx.rows(entity), vec![row(&["1", "Smith, John"])]);
    }
}
