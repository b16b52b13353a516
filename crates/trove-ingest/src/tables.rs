//! Synthesized dataset tables
//!
//! Tables whose shape is only known at ingestion time. Each one belongs to a
//! single entity, which records the opaque table name, the internal column
//! identifiers and the human-readable headers as facts:
//!
//! | column      | type                          |
//! |-------------|-------------------------------|
//! | `id`        | INTEGER PRIMARY KEY           |
//! | `graveyard` | TEXT (scratch)                |
//! | `flag`      | BOOLEAN, default false        |
//! | `col_0..n`  | TEXT, one per header field    |

use crate::error::{IngestError, Result};
use crate::graph::{keys, queries, EntityGraph, EntityId, FactValue};
use crate::store::Store;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Statement};

/// Prefix of generated dataset table names
pub const TABLE_PREFIX: &str = "ds_";

/// Shape of a dataset table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableDef {
    /// A table with a fresh opaque name and positional columns for `width` fields
    pub fn generate(width: usize) -> Self {
        Self {
            name: format!("{}{}", TABLE_PREFIX, uuid::Uuid::new_v4().simple()),
            columns: column_ids(width),
        }
    }
}

/// Internal column identifiers; never derived from header text
pub fn column_ids(width: usize) -> Vec<String> {
    (0..width).map(|i| format!("col_{}", i)).collect()
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn create(conn: &Connection, def: &TableDef) -> Result<()> {
    let mut columns = vec![
        "id INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        "graveyard TEXT".to_string(),
        "flag BOOLEAN NOT NULL DEFAULT 0".to_string(),
    ];
    columns.extend(def.columns.iter().map(|c| format!("{} TEXT", quote_ident(c))));

    conn.execute(
        &format!("CREATE TABLE {} ({})", quote_ident(&def.name), columns.join(", ")),
        [],
    )?;
    Ok(())
}

pub(crate) fn exists(conn: &Connection, name: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub(crate) fn clear(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(&format!("DELETE FROM {}", quote_ident(name)), [])?;
    Ok(())
}

pub(crate) fn row_count(conn: &Connection, name: &str) -> Result<u64> {
    let count: i64 =
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote_ident(name)), [], |row| row.get(0))?;
    Ok(count as u64)
}

pub(crate) fn rows(conn: &Connection, def: &TableDef) -> Result<Vec<Vec<String>>> {
    let select = def.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY id",
        select,
        quote_ident(&def.name)
    ))?;

    let width = def.columns.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Option<String>>(i).map(Option::unwrap_or_default))
                .collect::<rusqlite::Result<Vec<String>>>()
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Prepared insert for one table; fields are mapped positionally onto `col_*`
pub(crate) struct RowWriter<'c> {
    stmt: Statement<'c>,
    width: usize,
}

impl<'c> RowWriter<'c> {
    pub(crate) fn new(conn: &'c Connection, def: &TableDef) -> Result<Self> {
        let columns = def.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
        let placeholders = (1..=def.columns.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>();
        let stmt = conn.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&def.name),
            columns,
            placeholders.join(", ")
        ))?;

        Ok(Self {
            stmt,
            width: def.columns.len(),
        })
    }

    /// Insert one record; short records are padded with empty strings and long
    /// ones truncated to the table width
    pub(crate) fn insert(&mut self, mut fields: Vec<String>) -> Result<()> {
        fields.resize(self.width, String::new());
        self.stmt.execute(params_from_iter(fields.iter()))?;
        Ok(())
    }
}

/// A dataset table together with the entity that owns it
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedTable {
    pub entity: EntityId,
    pub entity_name: String,
    pub def: TableDef,
    pub column_names: Vec<String>,
}

impl SynthesizedTable {
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Render a row as the owning entity's name followed by `header: value` lines
    pub fn describe_row(&self, row: &[String]) -> String {
        let mut out = self.entity_name.clone();
        for (header, value) in self.column_names.iter().zip(row) {
            out.push_str(&format!("\n * {}: {}", header, value));
        }
        out
    }
}

/// Read access to synthesized tables
#[derive(Clone, Debug)]
pub struct TableRegistry {
    store: Store,
}

impl TableRegistry {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn from_graph(graph: &EntityGraph) -> Self {
        Self::new(graph.store().clone())
    }

    /// The table owned by `entity`, if one has been synthesized and still exists
    pub fn for_entity(&self, entity: EntityId) -> Result<Option<SynthesizedTable>> {
        self.store.with_conn(|conn| {
            let Some(name) = queries::get_fact(conn, entity, keys::TABLE_NAME)? else {
                return Ok(None);
            };
            let name = text_fact(&name, keys::TABLE_NAME)?.to_string();
            if !exists(conn, &name)? {
                return Ok(None);
            }

            let columns = list_fact(conn, entity, keys::COLUMNS)?;
            let column_names = list_fact(conn, entity, keys::COLUMN_NAMES)?;

            Ok(Some(SynthesizedTable {
                entity,
                entity_name: queries::name_of(conn, entity)?,
                def: TableDef { name, columns },
                column_names,
            }))
        })
    }

    pub fn row_count(&self, table: &SynthesizedTable) -> Result<u64> {
        self.store.with_conn(|conn| row_count(conn, table.name()))
    }

    pub fn rows(&self, table: &SynthesizedTable) -> Result<Vec<Vec<String>>> {
        self.store.with_conn(|conn| rows(conn, &table.def))
    }

    /// Names of every dataset table in the store
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1 ORDER BY name",
            )?;
            let names = stmt
                .query_map(params![format!("{}%", TABLE_PREFIX)], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }
}

fn text_fact<'a>(value: &'a FactValue, key: &str) -> Result<&'a str> {
    value.as_text().ok_or_else(|| IngestError::FactType {
        key: key.to_string(),
        expected: "text",
        actual: value.kind(),
    })
}

fn list_fact(conn: &Connection, entity: EntityId, key: &str) -> Result<Vec<String>> {
    match queries::get_fact(conn, entity, key)? {
        Some(FactValue::List(items)) => Ok(items),
        Some(other) => Err(IngestError::FactType {
            key: key.to_string(),
            expected: "list",
            actual: other.kind(),
        }),
        None => Err(IngestError::missing_fact(queries::name_of(conn, entity)?, key)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generated_names_are_unique_and_positional() {
        let a = TableDef::generate(3);
        let b = TableDef::generate(3);

        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with(TABLE_PREFIX));
        assert_eq!(a.columns, vec!["col_0", "col_1", "col_2"]);
    }

    #[test]
    fn test_create_insert_and_read_back() {
        let conn = Connection::open_in_memory().unwrap();
        let def = TableDef::generate(2);
        create(&conn, &def).unwrap();
        assert!(exists(&conn, &def.name).unwrap());

        {
            let mut writer = RowWriter::new(&conn, &def).unwrap();
            writer.insert(vec!["foo".into(), "1".into()]).unwrap();
            writer.insert(vec!["short".into()]).unwrap();
            writer.insert(vec!["long".into(), "2".into(), "dropped".into()]).unwrap();
        }

        assert_eq!(row_count(&conn, &def.name).unwrap(), 3);
        assert_eq!(
            rows(&conn, &def).unwrap(),
            vec![
                vec!["foo".to_string(), "1".to_string()],
                vec!["short".to_string(), String::new()],
                vec!["long".to_string(), "2".to_string()],
            ]
        );

        let flag: bool = conn
            .query_row(&format!("SELECT flag FROM {} LIMIT 1", quote_ident(&def.name)), [], |r| r.get(0))
            .unwrap();
        assert!(!flag);

        clear(&conn, &def.name).unwrap();
        assert_eq!(row_count(&conn, &def.name).unwrap(), 0);
    }

    #[test]
    fn test_describe_row_pairs_headers() {
        let table = SynthesizedTable {
            entity: EntityId(1),
            entity_name: "http://data.gov/download/994/csv".to_string(),
            def: TableDef::generate(2),
            column_names: vec!["Name".to_string(), "Country".to_string()],
        };

        assert_eq!(
            table.describe_row(&["A. ROSENTHAL (PTY) LTD.".to_string(), "ZA".to_string()]),
            "http://data.gov/download/994/csv\n * Name: A. ROSENTHAL (PTY) LTD.\n * Country: ZA"
        );
    }
}
