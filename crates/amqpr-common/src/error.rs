//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration, error, and identifier primitives."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
/// Errors raised while validating configuration supplied by the application.
///
/// Corresponds to the `ConfigurationError` kind in the error taxonomy: bad
/// recovery-policy parameters, an empty endpoint list, or an out-of-range
/// message body. Every variant names the offending parameter so callers can
/// surface actionable diagnostics.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// `initial_delay` (or `delay` for the constant policy) was negative.
    #[error("{parameter} must not be negative, got {value}ms")]
    NegativeDelay {
        /// Name of the offending parameter.
        parameter: &'static str,
        /// The rejected value, in milliseconds.
        value: i64,
    },
    /// `retry_count` was negative.
    #[error("retry_count must not be negative, got {value}")]
    NegativeRetryCount {
        /// The rejected value.
        value: i64,
    },
    /// `factor` was less than one for a linear or exponential policy.
    #[error("factor must be >= 1, got {value}")]
    FactorBelowOne {
        /// The rejected value.
        value: f64,
    },
    /// `max_delay` was smaller than `initial_delay`.
    #[error("max_delay ({max_ms}ms) must be >= initial_delay ({initial_ms}ms)")]
    MaxDelayBelowInitial {
        /// The rejected `max_delay`, in milliseconds.
        max_ms: u64,
        /// The configured `initial_delay`, in milliseconds.
        initial_ms: u64,
    },
    /// The endpoint list supplied to the client was empty.
    #[error("endpoint list must contain at least one endpoint")]
    EmptyEndpointList,
    /// An endpoint failed field-level validation (e.g. an empty host).
    #[error("invalid endpoint configuration: {message}")]
    InvalidEndpoint {
        /// Human-readable description of the failing constraint.
        message: String,
    },
    /// A message was constructed with a body type outside the supported set.
    #[error("unsupported message body type: {type_name}")]
    UnsupportedBodyType {
        /// The rejected type's name, for diagnostics.
        type_name: &'static str,
    },
    /// A message was constructed with a null body.
    #[error("message body must not be null")]
    NullBody,
    /// The config file at `path` could not be read.
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        /// The path that failed to read.
        path: std::path::PathBuf,
        /// The underlying I/O failure, rendered as a string so this error
        /// stays `Clone`/`Eq`.
        source: IoErrorMessage,
    },
    /// The config file at `path` could not be parsed as TOML.
    #[error("failed to parse config file {path:?}: {message}")]
    Parse {
        /// The path whose contents failed to parse.
        path: std::path::PathBuf,
        /// The underlying parser message.
        message: String,
    },
    /// Neither an explicit path, an environment override, nor any default
    /// candidate path yielded a config file.
    #[error("no config file found; set AMQPR_CONFIG or create ./amqpr.toml")]
    NoConfigFileFound,
}

/// Wrapper that captures an [`std::io::Error`]'s message as a `String`, so
/// [`ConfigurationError`] can stay `Clone`, `PartialEq`, and `Eq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoErrorMessage(pub String);

impl std::fmt::Display for IoErrorMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::io::Error> for IoErrorMessage {
    fn from(source: std::io::Error) -> Self {
        IoErrorMessage(source.to_string())
    }
}
