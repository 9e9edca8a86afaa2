//! Referential integrity guard.
//!
//! The local store has no constraint checks, so every mutation that embeds a
//! foreign key resolves it here before any write is attempted. A failed
//! lookup reports the entity kind and id so callers can render an exact
//! message without re-deriving it.

use crate::error::{Error, Result};
use crate::model::{EntityKind, Image, Label, LabelClass, Project};
use crate::store::LocalStore;

/// Resolve a project id or fail with `NotFound("project", id)`.
pub fn require_project<'a>(store: &'a LocalStore, id: &str) -> Result<&'a Project> {
    store
        .projects
        .get(id)
        .ok_or_else(|| Error::not_found(EntityKind::Project.as_str(), id))
}

/// Resolve an image id or fail with `NotFound("image", id)`.
pub fn require_image<'a>(store: &'a LocalStore, id: &str) -> Result<&'a Image> {
    store
        .images
        .get(id)
        .ok_or_else(|| Error::not_found(EntityKind::Image.as_str(), id))
}

/// Resolve a label class id or fail with `NotFound("labelClass", id)`.
pub fn require_label_class<'a>(store: &'a LocalStore, id: &str) -> Result<&'a LabelClass> {
    store
        .label_classes
        .get(id)
        .ok_or_else(|| Error::not_found(EntityKind::LabelClass.as_str(), id))
}

/// Resolve a label id or fail with `NotFound("label", id)`.
pub fn require_label<'a>(store: &'a LocalStore, id: &str) -> Result<&'a Label> {
    store
        .labels
        .get(id)
        .ok_or_else(|| Error::not_found(EntityKind::Label.as_str(), id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_entity_id;
    use chrono::Utc;

    #[test]
    fn test_missing_reference_reports_kind_and_id() {
        let store = LocalStore::new();

        let err = require_image(&store, "abc").unwrap_err();
        assert!(err.is_not_found("image"));
        assert_eq!(err.to_string(), "The image id abc doesn't exist.");

        let err = require_label_class(&store, "xyz").unwrap_err();
        assert_eq!(err.to_string(), "The labelClass id xyz doesn't exist.");
    }

    #[test]
    fn test_existing_reference_resolves() {
        let mut store = LocalStore::new();
        let now = Utc::now();
        let id = new_entity_id();
        store.projects.insert(
            id.clone(),
            Project {
                id: id.clone(),
                name: "p".into(),
                created_at: now,
                updated_at: now,
            },
        );

        assert_eq!(require_project(&store, &id).unwrap().name, "p");
    }
}
