//! Reversible effects for the concrete label mutations.
//!
//! The labeling surface performs label create/update/delete through these
//! effects so every action lands on the undo stack. Each effect routes
//! through the [`Repository`], so the optimistic local write plus the
//! remote-sync announcement happen for undo and redo exactly as for the
//! original action. Ids are generated inside `perform` and cached by the
//! engine, so a label recreated by redo keeps its identity.

use std::sync::{Arc, Mutex};

use crate::error::Error;
use crate::history::Effect;
use crate::model::Label;
use crate::repository::{LabelCreate, LabelUpdate, Repository};

/// Effect that creates a label; reverse deletes it by its cached id.
pub fn create_label_effect(repository: Arc<Repository>, data: LabelCreate) -> Effect {
    let perform_repository = repository.clone();
    Effect::new(
        "Create label",
        move |id| {
            let repository = perform_repository.clone();
            let mut data = data.clone();
            async move {
                // Redo supplies the cached id; the first run keeps any
                // caller-supplied id and otherwise lets the repository
                // generate one.
                data.id = id.or(data.id);
                let label = repository.create_label(data).await?;
                Ok(label.id)
            }
        },
        move |id| {
            let repository = repository.clone();
            async move {
                let label = repository.delete_label(&id).await?;
                Ok(label.id)
            }
        },
    )
}

/// Effect that applies a partial label update; reverse restores the fields
/// captured just before the update was applied.
pub fn update_label_effect(
    repository: Arc<Repository>,
    label_id: String,
    patch: LabelUpdate,
) -> Effect {
    // Captured at perform time so reverse (and a later redo's re-capture)
    // always restore the state the update actually replaced.
    let previous: Arc<Mutex<Option<LabelUpdate>>> = Arc::new(Mutex::new(None));

    let perform_repository = repository.clone();
    let perform_previous = previous.clone();
    let perform_label_id = label_id.clone();
    Effect::new(
        "Update label",
        move |_id| {
            let repository = perform_repository.clone();
            let previous = perform_previous.clone();
            let label_id = perform_label_id.clone();
            let patch = patch.clone();
            async move {
                let current = repository.label(&label_id).await?;
                *previous.lock().expect("snapshot lock poisoned") = Some(LabelUpdate {
                    geometry: Some(current.geometry),
                    label_class_id: Some(current.label_class_id),
                    label_type: Some(current.label_type),
                });
                let updated = repository.update_label(&label_id, patch).await?;
                Ok(updated.id)
            }
        },
        move |id| {
            let repository = repository.clone();
            let previous = previous.clone();
            async move {
                let restore = previous
                    .lock()
                    .expect("snapshot lock poisoned")
                    .clone()
                    .ok_or_else(|| {
                        Error::invalid_input("Update effect reversed before being performed")
                    })?;
                let label = repository.update_label(&id, restore).await?;
                Ok(label.id)
            }
        },
    )
}

/// Effect that deletes a label; reverse recreates it with the same id from
/// the snapshot captured at delete time.
pub fn delete_label_effect(repository: Arc<Repository>, label_id: String) -> Effect {
    let snapshot: Arc<Mutex<Option<Label>>> = Arc::new(Mutex::new(None));

    let perform_repository = repository.clone();
    let perform_snapshot = snapshot.clone();
    Effect::new(
        "Delete label",
        move |id| {
            let repository = perform_repository.clone();
            let snapshot = perform_snapshot.clone();
            let label_id = id.unwrap_or_else(|| label_id.clone());
            async move {
                let label = repository.delete_label(&label_id).await?;
                let deleted_id = label.id.clone();
                *snapshot.lock().expect("snapshot lock poisoned") = Some(label);
                Ok(deleted_id)
            }
        },
        move |id| {
            let repository = repository.clone();
            let snapshot = snapshot.clone();
            async move {
                let label = snapshot
                    .lock()
                    .expect("snapshot lock poisoned")
                    .clone()
                    .ok_or_else(|| {
                        Error::invalid_input("Delete effect reversed before being performed")
                    })?;
                let restored = repository
                    .create_label(LabelCreate {
                        id: Some(id),
                        image_id: label.image_id,
                        label_class_id: label.label_class_id,
                        geometry: label.geometry,
                        label_type: Some(label.label_type),
                    })
                    .await?;
                Ok(restored.id)
            }
        },
    )
}
