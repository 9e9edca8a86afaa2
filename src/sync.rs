//! Remote synchronization collaborator.
//!
//! Every successful image/label mutation is announced to a [`RemoteSync`]
//! implementation as a [`SyncIntent`] plus a reconciliation closure. The
//! repository never blocks on remote confirmation: delivery, retry and
//! eventual cache correction are the collaborator's responsibility. The
//! closure is invoked once the remote has answered, so a rejected optimistic
//! mutation can be surfaced or corrected later.

use std::sync::Mutex;

use crate::model::EntityKind;

/// The kind of mutation being synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Create,
    Update,
    Delete,
}

/// A local mutation announced to the remote layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIntent {
    /// Entity kind the mutation touched.
    pub kind: EntityKind,
    /// Mutation kind.
    pub op: SyncOp,
    /// Identity of the touched entity.
    pub id: String,
}

impl SyncIntent {
    pub fn new(kind: EntityKind, op: SyncOp, id: impl Into<String>) -> Self {
        Self {
            kind,
            op,
            id: id.into(),
        }
    }
}

/// Outcome reported by the remote once the intent has been delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAck {
    /// The remote accepted the mutation as-is.
    Confirmed,
    /// The remote rejected the mutation; the local cache should be corrected.
    Rejected {
        /// Reason reported by the remote.
        reason: String,
    },
}

/// Cache-reconciliation callback, invoked by the collaborator with the
/// remote outcome.
pub type Reconcile = Box<dyn FnOnce(SyncAck) + Send>;

/// Remote synchronization layer.
///
/// `publish` must not block: implementations queue the intent and own
/// delivery and retries.
pub trait RemoteSync: Send + Sync {
    fn publish(&self, intent: SyncIntent, reconcile: Reconcile);
}

/// Sync layer that drops every intent. The store then behaves as a purely
/// local database.
#[derive(Debug, Default)]
pub struct NullSync;

impl RemoteSync for NullSync {
    fn publish(&self, intent: SyncIntent, _reconcile: Reconcile) {
        log::trace!("Dropping sync intent for {} {}", intent.kind.as_str(), intent.id);
    }
}

/// Sync layer that records intents and keeps their reconciliation closures
/// so a test (or a replay harness) can acknowledge them later.
#[derive(Default)]
pub struct RecordingSync {
    published: Mutex<Vec<(SyncIntent, Reconcile)>>,
}

impl RecordingSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intents published so far, in order.
    pub fn intents(&self) -> Vec<SyncIntent> {
        self.published
            .lock()
            .expect("sync lock poisoned")
            .iter()
            .map(|(intent, _)| intent.clone())
            .collect()
    }

    /// Acknowledge every pending intent with the given outcome, invoking the
    /// reconciliation closures in publish order.
    pub fn acknowledge_all(&self, ack: SyncAck) {
        let drained: Vec<(SyncIntent, Reconcile)> = self
            .published
            .lock()
            .expect("sync lock poisoned")
            .drain(..)
            .collect();
        for (intent, reconcile) in drained {
            log::debug!("Acknowledging {} {}", intent.kind.as_str(), intent.id);
            reconcile(ack.clone());
        }
    }

    /// Number of unacknowledged intents.
    pub fn pending(&self) -> usize {
        self.published.lock().expect("sync lock poisoned").len()
    }
}

impl RemoteSync for RecordingSync {
    fn publish(&self, intent: SyncIntent, reconcile: Reconcile) {
        self.published
            .lock()
            .expect("sync lock poisoned")
            .push((intent, reconcile));
    }
}
