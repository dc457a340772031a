//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured logging adapters and lifecycle-event helpers."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Structured logging initialization and lifecycle-event helpers shared by
//! every crate in the workspace. Recovery and link state transitions are
//! logged through [`log_lifecycle_event`] so a host application gets a
//! consistent shape regardless of which subsystem emitted the event.

use amqpr_common::LoggingConfig;
use amqpr_common::LogFormat;
use once_cell::sync::OnceCell;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "AMQPR_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();

/// Initialize the global tracing subscriber for a service embedding this
/// workspace. `AMQPR_LOG` overrides the usual `RUST_LOG` filter; without
/// either, the default level is `info`.
///
/// Safe to call more than once; subsequent calls are no-ops.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config
        .file_prefix
        .clone()
        .unwrap_or_else(|| service_name.to_owned());

    let file_appender = tracing_appender::rolling::daily(&config.directory, format!("{prefix}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);

    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); defaulting to info logging");
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(stdout_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .boxed();

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}

/// Lifecycle phases emitted by the recovery supervisor and by producer /
/// consumer state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// A recoverable transitioned to `Suspended`.
    Suspended,
    /// The supervisor is attempting to open a new connection.
    Connecting,
    /// A recoverable is re-attaching its link against a new connection.
    Recovering,
    /// A recoverable transitioned back to `Attached`.
    Resumed,
    /// A recoverable transitioned to `Closed`.
    Closed,
}

impl LifecyclePhase {
    fn as_str(self) -> &'static str {
        match self {
            LifecyclePhase::Suspended => "suspended",
            LifecyclePhase::Connecting => "connecting",
            LifecyclePhase::Recovering => "recovering",
            LifecyclePhase::Resumed => "resumed",
            LifecyclePhase::Closed => "closed",
        }
    }

    fn is_warn(self) -> bool {
        matches!(self, LifecyclePhase::Closed)
    }
}

/// Emit a structured lifecycle event with a consistent shape:
/// `resource`, `phase`, `attempt`, and a free-form `detail`.
pub fn log_lifecycle_event(resource: &str, phase: LifecyclePhase, attempt: u64, detail: &str) {
    if phase.is_warn() {
        tracing::warn!(resource, phase = phase.as_str(), attempt, detail, "lifecycle event");
    } else {
        tracing::info!(resource, phase = phase.as_str(), attempt, detail, "lifecycle event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_does_not_panic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = LoggingConfig {
            format: LogFormat::Pretty,
            directory: dir.path().to_path_buf(),
            file_prefix: Some("test".into()),
        };
        init_tracing("amqpr-test", &config).expect("init succeeds");
        log_lifecycle_event("producer:orders", LifecyclePhase::Suspended, 0, "link closed");
    }
}
