//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Recoverable lifecycle trait and the concurrent registry the supervisor iterates each cycle."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use amqpr_transport::Connection;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ClientError;

/// Opaque identifier for a registry entry. Not reused after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecoverableId(Uuid);

impl RecoverableId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RecoverableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a recoverable. Transitions form a DAG:
/// `Initializing -> Attached`; `Attached <-> Suspended`;
/// `Suspended -> Recovering -> Attached`; any state `-> Closed` (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableState {
    Initializing,
    Attached,
    Suspended,
    Recovering,
    Closed,
}

/// An entity whose lifecycle must be re-established after a connection
/// drop. The supervisor is the sole caller of
/// `suspend`/`recover`/`resume`; application code never calls these
/// directly.
#[async_trait]
pub trait Recoverable: Send + Sync {
    /// Stable identity within the registry.
    fn id(&self) -> RecoverableId;

    /// Current lifecycle state.
    fn state(&self) -> RecoverableState;

    /// Transition to `Suspended`. Must not block on network I/O.
    async fn suspend(&self);

    /// Re-open this recoverable's link(s) against `connection`. A failure
    /// here surfaces to the supervisor, which treats it as a fresh
    /// connect-command.
    async fn recover(
        &self,
        connection: Arc<dyn Connection>,
        cancel: CancellationToken,
    ) -> Result<(), ClientError>;

    /// Transition to `Attached`, unblocking parked application operations.
    async fn resume(&self);

    /// Transition to `Closed` (terminal) and release underlying resources.
    async fn close(&self);
}

/// The set of recoverables currently attached to a logical connection
/// Backed by [`DashMap`] so application
/// threads can add/remove entries concurrently with the supervisor's
/// iteration, per-entry, without a single global lock.
#[derive(Default)]
pub struct RecoverableRegistry {
    entries: DashMap<RecoverableId, Arc<dyn Recoverable>>,
    removed_total: AtomicU64,
}

impl RecoverableRegistry {
    /// Build an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recoverable, returning its assigned id.
    pub fn add(&self, recoverable: Arc<dyn Recoverable>) -> RecoverableId {
        let id = recoverable.id();
        self.entries.insert(id, recoverable);
        id
    }

    /// Remove a recoverable by id. Safe to call more than once; only the
    /// first call for a given id counts toward `removed_total`.
    pub fn remove(&self, id: RecoverableId) {
        if self.entries.remove(&id).is_some() {
            self.removed_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A consistent snapshot of every currently-registered recoverable.
    /// Additions concurrent with iteration need not be visible until the
    /// next cycle.
    pub fn snapshot(&self) -> Vec<Arc<dyn Recoverable>> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of recoverables currently registered.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry currently holds no recoverables.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
