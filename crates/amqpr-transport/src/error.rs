//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport-adapter error taxonomy."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---

/// Errors surfaced by the [`crate::Transport`] boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport could not open a session against an endpoint; the
    /// recovery supervisor retries this under the configured policy.
    #[error("failed to connect to {endpoint}: {source}")]
    ConnectFailed {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// The remote peer closed a link; surfaces to the in-flight
    /// send/receive operation and triggers recovery.
    #[error("link '{link}' detached: {reason}")]
    LinkDetached { link: String, reason: String },

    /// The operation was cancelled by the caller or by supervisor
    /// shutdown. Never converted into another error kind.
    #[error("operation cancelled")]
    Cancelled,

    /// The broker rejected a topology-management request. Not retried;
    /// surfaced directly to the caller.
    #[error("topology conflict: {message}")]
    TopologyConflict { message: String },

    /// An unrecoverable invariant violation inside the transport adapter.
    #[error("fatal transport error: {message}")]
    Fatal { message: String },
}

impl TransportError {
    /// `true` when this error represents a topology conflict whose message
    /// contains the given substring.
    pub fn topology_conflict_contains(&self, needle: &str) -> bool {
        matches!(self, TransportError::TopologyConflict { message } if message.contains(needle))
    }
}
