//! SQLite schema for the entity graph and fact store
//!
//! Synthesized dataset tables are not declared here; they are created at
//! ingestion time by [`crate::tables`].

use crate::error::Result;
use rusqlite::Connection;

/// Initialize the fixed-schema tables
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            parent_id INTEGER REFERENCES entities(id),

            -- Order among the parent's children, assigned on attach
            position INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS facts (
            entity_id INTEGER NOT NULL REFERENCES entities(id),
            key TEXT NOT NULL,
            value TEXT NOT NULL,  -- JSON encoded FactValue
            updated_at TEXT NOT NULL,
            PRIMARY KEY (entity_id, key)
        );

        CREATE INDEX IF NOT EXISTS idx_entities_parent ON entities(parent_id, position);
        CREATE INDEX IF NOT EXISTS idx_facts_key ON facts(key);
        "#,
    )?;

    Ok(())
}
