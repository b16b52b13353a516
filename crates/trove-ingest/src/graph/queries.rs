//! Statement-level graph operations
//!
//! These take a bare `&Connection` so they can run either under the store
//! lock ([`super::EntityGraph`]) or inside a caller's transaction (the
//! delimited-text populator).

use super::fact::FactValue;
use super::{Entity, EntityId};
use crate::error::{IngestError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

pub(crate) fn find(conn: &Connection, name: &str) -> Result<Option<EntityId>> {
    Ok(conn
        .query_row("SELECT id FROM entities WHERE name = ?1", params![name], |row| {
            row.get(0).map(EntityId)
        })
        .optional()?)
}

/// Lookup-or-insert; the UNIQUE constraint on `name` makes this a compare-and-insert
pub(crate) fn get_or_create(conn: &Connection, name: &str) -> Result<(EntityId, bool)> {
    let inserted = conn.execute(
        "INSERT INTO entities (name, created_at) VALUES (?1, ?2) ON CONFLICT(name) DO NOTHING",
        params![name, Utc::now().to_rfc3339()],
    )?;

    let id = find(conn, name)?.ok_or_else(|| IngestError::EntityNotFound(name.to_string()))?;
    Ok((id, inserted == 1))
}

pub(crate) fn name_of(conn: &Connection, id: EntityId) -> Result<String> {
    conn.query_row("SELECT name FROM entities WHERE id = ?1", params![id.0], |row| row.get(0))
        .optional()?
        .ok_or_else(|| IngestError::EntityNotFound(id.to_string()))
}

pub(crate) fn parent_of(conn: &Connection, id: EntityId) -> Result<Option<EntityId>> {
    let parent: Option<Option<i64>> = conn
        .query_row("SELECT parent_id FROM entities WHERE id = ?1", params![id.0], |row| row.get(0))
        .optional()?;

    match parent {
        Some(parent) => Ok(parent.map(EntityId)),
        None => Err(IngestError::EntityNotFound(id.to_string())),
    }
}

/// Set `child`'s parent, refusing any edge that would close a cycle
pub(crate) fn attach(conn: &Connection, child: EntityId, parent: EntityId) -> Result<()> {
    if parent_of(conn, child)? == Some(parent) {
        return Ok(());
    }

    let mut cursor = Some(parent);
    while let Some(current) = cursor {
        if current == child {
            return Err(IngestError::Cycle {
                child: name_of(conn, child)?,
                parent: name_of(conn, parent)?,
            });
        }
        cursor = parent_of(conn, current)?;
    }

    conn.execute(
        r#"
        UPDATE entities
        SET parent_id = ?1,
            position = (SELECT COALESCE(MAX(position), 0) + 1 FROM entities WHERE parent_id = ?1)
        WHERE id = ?2
        "#,
        params![parent.0, child.0],
    )?;

    Ok(())
}

pub(crate) fn children(conn: &Connection, parent: EntityId) -> Result<Vec<EntityId>> {
    let mut stmt =
        conn.prepare("SELECT id FROM entities WHERE parent_id = ?1 ORDER BY position, id")?;
    let ids = stmt
        .query_map(params![parent.0], |row| row.get(0).map(EntityId))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(crate) fn roots(conn: &Connection) -> Result<Vec<EntityId>> {
    let mut stmt = conn.prepare("SELECT id FROM entities WHERE parent_id IS NULL ORDER BY id")?;
    let ids = stmt
        .query_map([], |row| row.get(0).map(EntityId))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub(crate) fn get_fact(conn: &Connection, id: EntityId, key: &str) -> Result<Option<FactValue>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM facts WHERE entity_id = ?1 AND key = ?2",
            params![id.0, key],
            |row| row.get(0),
        )
        .optional()?;

    raw.map(|json| serde_json::from_str(&json).map_err(IngestError::from))
        .transpose()
}

pub(crate) fn set_fact(conn: &Connection, id: EntityId, key: &str, value: &FactValue) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO facts (entity_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(entity_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        params![id.0, key, serde_json::to_string(value)?, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub(crate) fn append_fact(conn: &Connection, id: EntityId, key: &str, item: String) -> Result<()> {
    let list = match get_fact(conn, id, key)? {
        None => vec![item],
        Some(FactValue::List(mut items)) => {
            items.push(item);
            items
        },
        Some(other) => {
            return Err(IngestError::FactType {
                key: key.to_string(),
                expected: "list",
                actual: other.kind(),
            })
        },
    };

    set_fact(conn, id, key, &FactValue::List(list))
}

pub(crate) fn facts(conn: &Connection, id: EntityId) -> Result<BTreeMap<String, FactValue>> {
    let mut stmt = conn.prepare("SELECT key, value FROM facts WHERE entity_id = ?1")?;
    let rows = stmt
        .query_map(params![id.0], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(key, json)| Ok((key, serde_json::from_str(&json)?)))
        .collect()
}

/// First value of `key` on the entity itself or the nearest ancestor holding it
pub(crate) fn fact_from_ancestors(
    conn: &Connection,
    id: EntityId,
    key: &str,
) -> Result<Option<FactValue>> {
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        if let Some(value) = get_fact(conn, current, key)? {
            return Ok(Some(value));
        }
        cursor = parent_of(conn, current)?;
    }
    Ok(None)
}

pub(crate) fn load(conn: &Connection, id: EntityId) -> Result<Entity> {
    Ok(Entity {
        id,
        name: name_of(conn, id)?,
        parent: parent_of(conn, id)?,
        facts: facts(conn, id)?,
    })
}
