//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Recovery supervisor: the single-writer reconnection loop."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use amqpr_common::EndpointConfig as Endpoint;
use amqpr_logging::{log_lifecycle_event, LifecyclePhase};
use amqpr_policy::RecoveryPolicy;
use amqpr_transport::{Connection, Transport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connect::{connect_channel, fulfill_all, ConnectReceiver, ConnectSender};
use crate::recoverable::{RecoverableRegistry, RecoverableState};

/// Point-in-time counters and state exposed for host-application dashboards.
/// Not a broker feature; purely ambient observability.
#[derive(Debug, Default)]
pub struct SupervisorMetrics {
    reconnect_count: AtomicU64,
    last_failure: Mutex<Option<String>>,
    connected: std::sync::atomic::AtomicBool,
}

impl SupervisorMetrics {
    /// Number of reconnect cycles that have completed successfully.
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// The most recent connect failure's message, if any.
    pub fn last_failure(&self) -> Option<String> {
        self.last_failure.lock().expect("lock poisoned").clone()
    }

    /// Whether the supervisor currently believes the connection is open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

/// Handle returned by [`RecoverySupervisor::spawn`]: the means by which a
/// logical connection triggers reconnects, observes metrics, and tears the
/// supervisor down.
pub struct SupervisorHandle {
    connect: ConnectSender,
    cancel: CancellationToken,
    metrics: Arc<SupervisorMetrics>,
    join: JoinHandle<()>,
}

impl SupervisorHandle {
    /// The connect-command channel's producer half, cloned to share with
    /// every recoverable registered on this logical connection.
    pub fn connect_sender(&self) -> ConnectSender {
        self.connect.clone()
    }

    /// Observability snapshot.
    pub fn metrics(&self) -> Arc<SupervisorMetrics> {
        self.metrics.clone()
    }

    /// Cancel the supervisor loop. The task observes this at its next
    /// `select!` point and terminates after at most one in-flight open
    /// attempt completes or is aborted.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for the supervisor task to finish after calling
    /// [`SupervisorHandle::shutdown`].
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// The long-running task that consumes the connect-command channel, tears
/// down and rebuilds the underlying connection via a [`Transport`] under a
/// [`RecoveryPolicy`], and drives every registered recoverable through a
/// quiesce -> recover -> resume cycle. A single `tokio::select!`
/// over the connect channel and a `CancellationToken` drives one in-flight
/// retry loop under backoff, with serial per-cycle state transitions.
pub struct RecoverySupervisor {
    endpoints: Vec<Endpoint>,
    policy: Arc<dyn RecoveryPolicy>,
    transport: Arc<dyn Transport>,
    registry: Arc<RecoverableRegistry>,
}

impl RecoverySupervisor {
    /// Build a supervisor over a non-empty endpoint rotation. The endpoint
    /// list's emptiness is validated earlier, at [`amqpr_common::ClientConfig::validate`];
    /// callers that construct endpoints directly are responsible for the
    /// same check.
    pub fn new(
        endpoints: Vec<Endpoint>,
        policy: Arc<dyn RecoveryPolicy>,
        transport: Arc<dyn Transport>,
        registry: Arc<RecoverableRegistry>,
    ) -> Self {
        Self {
            endpoints,
            policy,
            transport,
            registry,
        }
    }

    /// Spawn the supervisor as a single task, returning a handle to wake,
    /// observe, and shut it down. Only one supervisor task exists per
    /// logical connection.
    pub fn spawn(self) -> SupervisorHandle {
        let (connect_tx, connect_rx) = connect_channel();
        let cancel = CancellationToken::new();
        let metrics = Arc::new(SupervisorMetrics::default());
        let task_cancel = cancel.clone();
        let task_metrics = metrics.clone();
        let task_connect_tx = connect_tx.clone();
        let join = tokio::spawn(async move {
            self.run(connect_rx, task_connect_tx, task_cancel, task_metrics).await;
        });
        SupervisorHandle {
            connect: connect_tx,
            cancel,
            metrics,
            join,
        }
    }

    async fn run(
        self,
        mut connect_rx: ConnectReceiver,
        connect_tx: ConnectSender,
        cancel: CancellationToken,
        metrics: Arc<SupervisorMetrics>,
    ) {
        let mut connection: Option<Arc<dyn Connection>> = None;

        loop {
            let first_command = tokio::select! {
                command = connect_rx.recv() => match command {
                    Some(command) => command,
                    None => return,
                },
                _ = cancel.cancelled() => return,
            };

            // Coalesce a burst of wake-ups into one cycle.
            let mut pending = connect_rx.drain_pending();
            pending.push(first_command);

            let already_open = connection
                .as_ref()
                .map(|c| c.is_opened())
                .unwrap_or(false);

            if !already_open {
                log_lifecycle_event("supervisor", LifecyclePhase::Suspended, 0, "quiescing recoverables");
                for recoverable in self.registry.snapshot() {
                    recoverable.suspend().await;
                }

                match self.create_connection(&cancel, &metrics).await {
                    Some(new_connection) => {
                        connection = Some(new_connection.clone());
                        metrics.connected.store(true, Ordering::Relaxed);

                        let mut any_failed = false;
                        for recoverable in self.registry.snapshot() {
                            log_lifecycle_event(
                                &recoverable.id().to_string(),
                                LifecyclePhase::Recovering,
                                0,
                                "re-attaching link",
                            );
                            if let Err(err) = recoverable
                                .recover(new_connection.clone(), cancel.clone())
                                .await
                            {
                                tracing::warn!(
                                    recoverable = %recoverable.id(),
                                    error = %err,
                                    "recoverable failed to recover; re-enqueuing reconnect"
                                );
                                any_failed = true;
                            }
                        }

                        if any_failed {
                            connection = None;
                            metrics.connected.store(false, Ordering::Relaxed);
                            fulfill_all(pending);
                            // Treat this exactly like a fresh connect-command
                            // instead of waiting for an external wake-up that
                            // may never come.
                            connect_tx.wake();
                            continue;
                        }

                        self.watch_connection_closed(new_connection, connect_tx.clone(), cancel.clone());
                    }
                    None => {
                        // Cancelled while establishing the connection.
                        fulfill_all(pending);
                        return;
                    }
                }
            }

            // Fast path and post-recover resume both land here: resuming
            // is idempotent, handling the race where a recoverable was
            // suspended by an earlier command that already completed.
            for recoverable in self.registry.snapshot() {
                recoverable.resume().await;
            }
            log_lifecycle_event("supervisor", LifecyclePhase::Resumed, 0, "all recoverables attached");
            metrics.reconnect_count.fetch_add(1, Ordering::Relaxed);

            fulfill_all(pending);

            if cancel.is_cancelled() {
                return;
            }
        }
    }

    async fn create_connection(
        &self,
        cancel: &CancellationToken,
        metrics: &Arc<SupervisorMetrics>,
    ) -> Option<Arc<dyn Connection>> {
        let mut sequence = self.policy.sequence();
        let mut attempt: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let endpoint = &self.endpoints[(attempt as usize) % self.endpoints.len()];
            log_lifecycle_event("supervisor", LifecyclePhase::Connecting, attempt, &endpoint.host);

            match self.transport.open_connection(endpoint, cancel.clone()).await {
                Ok(connection) => return Some(connection),
                Err(err) => {
                    *metrics.last_failure.lock().expect("lock poisoned") = Some(err.to_string());
                    if let Some(limit) = self.policy.retry_count() {
                        if attempt + 1 >= limit {
                            tracing::error!(%err, attempts = attempt + 1, "connect retries exhausted");
                            return None;
                        }
                    }
                    let delay = sequence.next().unwrap_or_default();
                    tracing::warn!(%err, attempt, delay_ms = delay.as_millis() as u64, "connect attempt failed");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return None,
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Subscribe to the new connection's close event:
    /// once it fires, wake the supervisor so the next loop iteration
    /// observes `is_opened() == false` and starts a fresh reconnect cycle.
    fn watch_connection_closed(
        &self,
        connection: Arc<dyn Connection>,
        connect_tx: ConnectSender,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            tokio::select! {
                event = connection.closed() => {
                    tracing::info!(
                        closed_by_peer = event.closed_by_peer,
                        error = event.error.as_deref().unwrap_or(""),
                        "connection closed; requesting recovery"
                    );
                    connect_tx.wake();
                }
                _ = cancel.cancelled() => {}
            }
        });
    }
}

/// Check whether `state` still requires the application to park.
pub(crate) fn requires_parking(state: RecoverableState) -> bool {
    matches!(state, RecoverableState::Suspended | RecoverableState::Recovering | RecoverableState::Initializing)
}
