//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Top-level error taxonomy wrapping the lower crates' errors."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---

/// The application-facing error type for the amqpr client core. Wraps the
/// lower crates' error types via `#[from]` so callers match one enum,
/// with `Cancelled` kept distinct from `Transport` so cancellation is
/// never mistaken for a retryable failure.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Bad policy parameters, empty endpoint list, or invalid message body.
    #[error(transparent)]
    Configuration(#[from] amqpr_common::ConfigurationError),

    /// A transport-level failure (connect, link detach, topology conflict,
    /// or an adapter-reported fatal error).
    #[error(transparent)]
    Transport(#[from] amqpr_transport::TransportError),

    /// The operation was cancelled by the caller or by supervisor
    /// shutdown. Never produced by converting another error kind.
    #[error("operation cancelled")]
    Cancelled,

    /// A send or receive could not complete on the current link and may be
    /// retried by the application once recovery completes.
    #[error("operation failed and may be retried: {reason}")]
    Retryable { reason: String },

    /// An unrecoverable invariant violation; logged by the supervisor,
    /// which continues running with best effort.
    #[error("fatal client error: {message}")]
    Fatal { message: String },
}

impl ClientError {
    /// `true` for error kinds an application may reasonably retry
    /// (everything except configuration errors and cancellation).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_) | ClientError::Retryable { .. }
        )
    }
}
