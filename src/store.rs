//! Local persistence tables.
//!
//! The store is a set of insertion-ordered tables, one per entity kind,
//! keyed by entity id. It has no native referential integrity or constraint
//! enforcement; the integrity guard compensates at write time. Iteration
//! order is creation order, which is also the order used by `skip`/`first`
//! pagination.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{Example, Image, Label, LabelClass, Project};

/// One insertion-ordered table of entities keyed by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table<T> {
    rows: IndexMap<String, T>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: IndexMap::new(),
        }
    }
}

impl<T: Clone> Table<T> {
    /// Insert a row under the given id. Re-inserting an existing id
    /// replaces the row in place, keeping its original position.
    pub fn insert(&mut self, id: String, row: T) {
        self.rows.insert(id, row);
    }

    /// Look up a row by id.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.rows.get(id)
    }

    /// Remove a row by id, returning it. Preserves the order of the
    /// remaining rows.
    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.rows.shift_remove(id)
    }

    /// Whether a row exists for the id.
    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Iterate rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Apply `skip`/`first` pagination to an already-filtered row iterator,
/// preserving its order.
pub fn paginate<'a, T: Clone + 'a>(
    rows: impl Iterator<Item = &'a T>,
    skip: Option<usize>,
    first: Option<usize>,
) -> Vec<T> {
    let skipped = rows.skip(skip.unwrap_or(0));
    match first {
        Some(first) => skipped.take(first).cloned().collect(),
        None => skipped.cloned().collect(),
    }
}

/// The five entity tables backing the repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalStore {
    pub projects: Table<Project>,
    pub images: Table<Image>,
    pub label_classes: Table<LabelClass>,
    pub labels: Table<Label>,
    pub examples: Table<Example>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}
