//! Entity graph and fact store
//!
//! A forest of uniquely named entities. Each entity has at most one parent,
//! an ordered list of children, and an open bag of typed facts. Entities are
//! never deleted: the graph doubles as the audit history of every URL, file
//! and dataset the pipeline has touched.
//!
//! ```text
//! Entity(trove)
//! └─ Entity(data.gov)                               repo
//!    └─ Entity(http://data.gov/raw/994)             url, changelog
//!       └─ Entity(http://data.gov/download/994.zip) filename, signature, format
//!          └─ Entity(/data/data.gov/download/994.zip.d/rows.csv)
//!                                                      table_name, column_names, columns
//! ```

pub mod fact;
pub(crate) mod queries;

pub use fact::{keys, FactValue};

use crate::error::Result;
use crate::store::Store;
use std::collections::BTreeMap;
use tracing::debug;

/// Row id of an entity in the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub(crate) i64);

impl EntityId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Snapshot of an entity and its facts
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub parent: Option<EntityId>,
    pub facts: BTreeMap<String, FactValue>,
}

impl Entity {
    pub fn fact(&self, key: &str) -> Option<&FactValue> {
        self.facts.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.facts.get(key).and_then(FactValue::as_text)
    }
}

/// Handle to the entity graph; cheap to clone
#[derive(Clone, Debug)]
pub struct EntityGraph {
    store: Store,
}

impl EntityGraph {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn find(&self, name: &str) -> Result<Option<EntityId>> {
        self.store.with_conn(|conn| queries::find(conn, name))
    }

    /// Return the entity named `name`, creating it as a root if absent
    pub fn get_or_create(&self, name: &str) -> Result<EntityId> {
        self.store.with_conn(|conn| {
            let (id, created) = queries::get_or_create(conn, name)?;
            if created {
                debug!(entity = %name, "Created entity");
            }
            Ok(id)
        })
    }

    /// Lookup-or-insert `name` and attach it under `parent` in one step
    pub fn get_or_create_child(&self, name: &str, parent: EntityId) -> Result<EntityId> {
        self.store.with_conn(|conn| {
            let tx = conn.transaction()?;
            let (id, created) = queries::get_or_create(&tx, name)?;
            queries::attach(&tx, id, parent)?;
            tx.commit()?;
            if created {
                debug!(entity = %name, parent = %parent, "Created entity");
            }
            Ok(id)
        })
    }

    pub fn attach(&self, child: EntityId, parent: EntityId) -> Result<()> {
        self.store.with_conn(|conn| queries::attach(conn, child, parent))
    }

    pub fn entity(&self, id: EntityId) -> Result<Entity> {
        self.store.with_conn(|conn| queries::load(conn, id))
    }

    pub fn name(&self, id: EntityId) -> Result<String> {
        self.store.with_conn(|conn| queries::name_of(conn, id))
    }

    pub fn parent(&self, id: EntityId) -> Result<Option<EntityId>> {
        self.store.with_conn(|conn| queries::parent_of(conn, id))
    }

    /// Children in attach order
    pub fn children(&self, id: EntityId) -> Result<Vec<EntityId>> {
        self.store.with_conn(|conn| queries::children(conn, id))
    }

    pub fn child_at(&self, id: EntityId, index: usize) -> Result<Option<EntityId>> {
        Ok(self.children(id)?.get(index).copied())
    }

    pub fn roots(&self) -> Result<Vec<EntityId>> {
        self.store.with_conn(|conn| queries::roots(conn))
    }

    pub fn fact(&self, id: EntityId, key: &str) -> Result<Option<FactValue>> {
        self.store.with_conn(|conn| queries::get_fact(conn, id, key))
    }

    pub fn set_fact(&self, id: EntityId, key: &str, value: impl Into<FactValue>) -> Result<()> {
        let value = value.into();
        self.store.with_conn(|conn| queries::set_fact(conn, id, key, &value))
    }

    /// Append to a list-valued fact, creating the list on first use
    pub fn append_fact(&self, id: EntityId, key: &str, item: impl Into<String>) -> Result<()> {
        let item = item.into();
        self.store.with_conn(|conn| queries::append_fact(conn, id, key, item))
    }

    pub fn fact_from_ancestors(&self, id: EntityId, key: &str) -> Result<Option<FactValue>> {
        self.store.with_conn(|conn| queries::fact_from_ancestors(conn, id, key))
    }

    /// Indented listing of `root` and its descendants, one entity per line,
    /// optionally followed by its facts
    pub fn render_tree(&self, root: EntityId, with_facts: bool) -> Result<String> {
        let mut out = String::new();
        let mut stack = vec![(root, 0usize)];

        while let Some((id, depth)) = stack.pop() {
            let entity = self.entity(id)?;
            let indent = "  ".repeat(depth);
            out.push_str(&format!("{}{}\n", indent, entity.name));
            if with_facts {
                for (key, value) in &entity.facts {
                    out.push_str(&format!("{}  - {}: {}\n", indent, key, value));
                }
            }

            let children = self.children(id)?;
            stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }

        Ok(out)
    }
}
