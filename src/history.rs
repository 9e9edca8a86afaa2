//! Reversible command history.
//!
//! Mutating user actions are wrapped as [`Effect`]s: a `perform` operation
//! that applies the mutation (generating the entity id on first run) and a
//! `reverse` operation that issues the compensating mutation. The
//! [`HistoryEngine`] maintains the undo and redo stacks:
//!
//! - a newly performed effect is pushed to the undo stack and clears the
//!   redo stack (linear history);
//! - undo moves the entry to the redo stack, redo moves it back;
//! - redo re-invokes `perform` with the entry's cached id, so identity is
//!   stable across an undo/redo cycle.
//!
//! Failure leaves the stacks coherent: a failed first perform records
//! nothing, a failed reverse keeps the entry on the undo stack (the action
//! counts as not-yet-undone), a failed redo keeps it on the redo stack. The
//! stacks are unbounded here; eviction is a UI concern.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::error::Result;

/// Boxed future returned by effect operations.
pub type EffectFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

type PerformFn = Box<dyn Fn(Option<String>) -> EffectFuture + Send + Sync>;
type ReverseFn = Box<dyn Fn(String) -> EffectFuture + Send + Sync>;

/// A reversible command over the repository.
///
/// `perform` receives the cached entity id on redo (`None` on first run) and
/// returns the id of the primary entity it touched; `reverse` receives that
/// cached id and issues the compensating mutation.
pub struct Effect {
    description: String,
    perform: PerformFn,
    reverse: ReverseFn,
}

impl Effect {
    pub fn new<P, PFut, R, RFut>(description: impl Into<String>, perform: P, reverse: R) -> Self
    where
        P: Fn(Option<String>) -> PFut + Send + Sync + 'static,
        PFut: Future<Output = Result<String>> + Send + 'static,
        R: Fn(String) -> RFut + Send + Sync + 'static,
        RFut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            description: description.into(),
            perform: Box::new(move |id| Box::pin(perform(id))),
            reverse: Box::new(move |id| Box::pin(reverse(id))),
        }
    }

    /// Human-readable description of this effect.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// A performed effect plus the id it returned.
struct HistoryEntry {
    effect: Effect,
    entity_id: String,
}

#[derive(Default)]
struct HistoryState {
    undo_stack: Vec<HistoryEntry>,
    redo_stack: Vec<HistoryEntry>,
}

/// The undo/redo history.
///
/// All operations serialize on one async mutex: concurrent perform, undo and
/// redo calls queue rather than interleave, because each reads and mutates
/// shared stack state.
#[derive(Default)]
pub struct HistoryEngine {
    state: Mutex<HistoryState>,
}

impl HistoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an effect and record it for undo. Returns the id of the entity
    /// the effect created or touched.
    ///
    /// On failure nothing is recorded and the stacks are left unchanged.
    pub async fn perform(&self, effect: Effect) -> Result<String> {
        let mut state = self.state.lock().await;

        let entity_id = (effect.perform)(None).await?;
        log::debug!("Performed '{}' -> {entity_id}", effect.description());

        state.undo_stack.push(HistoryEntry {
            effect,
            entity_id: entity_id.clone(),
        });
        state.redo_stack.clear();
        Ok(entity_id)
    }

    /// Undo the most recent effect. Returns the reversed entity id, or
    /// `None` when there is nothing to undo.
    ///
    /// On failure the effect stays on the undo stack and the error
    /// propagates.
    pub async fn undo(&self) -> Result<Option<String>> {
        let mut state = self.state.lock().await;

        let Some(entry) = state.undo_stack.pop() else {
            return Ok(None);
        };

        match (entry.effect.reverse)(entry.entity_id.clone()).await {
            Ok(entity_id) => {
                log::debug!("Undid '{}' -> {entity_id}", entry.effect.description());
                state.redo_stack.push(HistoryEntry {
                    effect: entry.effect,
                    entity_id: entity_id.clone(),
                });
                Ok(Some(entity_id))
            }
            Err(err) => {
                log::warn!(
                    "Undo of '{}' failed, keeping it on the stack: {err}",
                    entry.effect.description()
                );
                state.undo_stack.push(entry);
                Err(err)
            }
        }
    }

    /// Redo the most recently undone effect, re-performing it with its
    /// cached id. Returns the entity id, or `None` when there is nothing to
    /// redo.
    ///
    /// On failure the effect stays on the redo stack and the error
    /// propagates.
    pub async fn redo(&self) -> Result<Option<String>> {
        let mut state = self.state.lock().await;

        let Some(entry) = state.redo_stack.pop() else {
            return Ok(None);
        };

        match (entry.effect.perform)(Some(entry.entity_id.clone())).await {
            Ok(entity_id) => {
                log::debug!("Redid '{}' -> {entity_id}", entry.effect.description());
                state.undo_stack.push(HistoryEntry {
                    effect: entry.effect,
                    entity_id: entity_id.clone(),
                });
                Ok(Some(entity_id))
            }
            Err(err) => {
                log::warn!(
                    "Redo of '{}' failed, keeping it on the stack: {err}",
                    entry.effect.description()
                );
                state.redo_stack.push(entry);
                Err(err)
            }
        }
    }

    /// Whether undo is available.
    pub async fn can_undo(&self) -> bool {
        !self.state.lock().await.undo_stack.is_empty()
    }

    /// Whether redo is available.
    pub async fn can_redo(&self) -> bool {
        !self.state.lock().await.redo_stack.is_empty()
    }

    /// Description of the effect that would be undone next.
    pub async fn undo_description(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .undo_stack
            .last()
            .map(|entry| entry.effect.description().to_string())
    }

    /// Description of the effect that would be redone next.
    pub async fn redo_description(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .redo_stack
            .last()
            .map(|entry| entry.effect.description().to_string())
    }

    /// Number of effects available for undo.
    pub async fn undo_count(&self) -> usize {
        self.state.lock().await.undo_stack.len()
    }

    /// Number of effects available for redo.
    pub async fn redo_count(&self) -> usize {
        self.state.lock().await.redo_stack.len()
    }

    /// Drop all history.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.undo_stack.clear();
        state.redo_stack.clear();
    }
}
