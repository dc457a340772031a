//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "crate-root"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Auto-recovering AMQP 1.0 messaging client core: supervisor, recoverable registry, producer/consumer link state machines."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Wires the recovery supervisor, the recoverable registry, and the
//! producer/consumer link state machines into one logical connection.
//!
//! This crate deliberately stops short of a connection-factory/builder
//! façade: [`LogicalConnection`] is the thinnest type that can own a
//! supervisor and registry together and register recoverables against
//! them. A fluent public client API is out of scope here.

mod connect;
mod consumer;
mod error;
mod producer;
mod recoverable;
mod supervisor;

pub use connect::{connect_channel, ConnectCommand, ConnectReceiver, ConnectSender};
pub use consumer::Consumer;
pub use error::ClientError;
pub use producer::Producer;
pub use recoverable::{Recoverable, RecoverableId, RecoverableRegistry, RecoverableState};
pub use supervisor::{RecoverySupervisor, SupervisorHandle, SupervisorMetrics};

use std::sync::Arc;

use amqpr_common::{ClientConfig, ConsumerConfig, ProducerConfig};
use amqpr_policy::{self as policy, RecoveryPolicy};
use amqpr_transport::Transport;

/// A running instance of the client core: one supervisor task plus the
/// registry of recoverables it drives. Owns nothing beyond that — callers
/// register producers/consumers themselves and keep their own references
/// to send/receive on them (no public client façade).
pub struct LogicalConnection {
    registry: Arc<RecoverableRegistry>,
    handle: SupervisorHandle,
}

impl LogicalConnection {
    /// Validate `config`, build the concrete [`RecoveryPolicy`] it
    /// describes, and spawn a supervisor over `transport`.
    pub fn start(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, ClientError> {
        config.validate()?;
        let policy: Arc<dyn RecoveryPolicy> = policy::from_config(&config.recovery_policy)?.into();
        let registry = Arc::new(RecoverableRegistry::new());
        let supervisor = RecoverySupervisor::new(config.endpoints, policy, transport, registry.clone());
        let handle = supervisor.spawn();
        Ok(Self { registry, handle })
    }

    /// Register a new producer on this connection and request an
    /// immediate connect/recover cycle for it.
    pub fn open_producer(&self, config: ProducerConfig) -> Arc<Producer> {
        let producer = Producer::new(config, self.handle.connect_sender());
        self.registry.add(producer.clone());
        self.handle.connect_sender().wake();
        producer
    }

    /// Register a new consumer on this connection and request an
    /// immediate connect/recover cycle for it.
    pub fn open_consumer(&self, config: ConsumerConfig) -> Arc<Consumer> {
        let consumer = Consumer::new(config, self.handle.connect_sender());
        self.registry.add(consumer.clone());
        self.handle.connect_sender().wake();
        consumer
    }

    /// Deregister a recoverable so the supervisor stops driving it through
    /// future recovery cycles.
    pub fn forget(&self, id: RecoverableId) {
        self.registry.remove(id);
    }

    /// Observability snapshot of the supervisor's reconnect history.
    pub fn metrics(&self) -> Arc<SupervisorMetrics> {
        self.handle.metrics()
    }

    /// Number of recoverables currently registered.
    pub fn recoverable_count(&self) -> usize {
        self.registry.len()
    }

    /// Shut the supervisor down and wait for its task to finish.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        self.handle.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqpr_common::{
        EndpointConfig, RecoveryPolicyConfig, RoutingType, Scheme, SendMode,
    };
    use amqpr_transport::InMemoryTransport;
    use std::time::Duration;

    fn config() -> ClientConfig {
        ClientConfig {
            endpoints: vec![EndpointConfig::new(Scheme::Amqp, "localhost", 5672, "guest", "guest")],
            recovery_policy: RecoveryPolicyConfig::Constant {
                delay_ms: 10,
                retry_count: None,
                fast_first: true,
            },
            logging: Default::default(),
        }
    }

    #[tokio::test]
    async fn open_producer_reaches_attached_state() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let connection = LogicalConnection::start(config(), transport).unwrap();

        let producer = connection.open_producer(ProducerConfig {
            address: "orders".into(),
            routing_type: RoutingType::Queue,
            message_priority: None,
            time_to_live: None,
            send_mode: SendMode::AwaitCredit,
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(producer.state(), RecoverableState::Attached);

        connection.shutdown().await;
    }

    #[tokio::test]
    async fn forgetting_a_recoverable_removes_it_from_the_registry() {
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let connection = LogicalConnection::start(config(), transport).unwrap();

        let consumer = connection.open_consumer(ConsumerConfig {
            address: "orders".into(),
            queue: None,
            routing_type: RoutingType::Queue,
            prefetch_count: 10,
            credit_refill_mode: Default::default(),
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connection.recoverable_count(), 1);

        connection.forget(consumer.id());
        assert_eq!(connection.recoverable_count(), 0);

        connection.shutdown().await;
    }

    #[test]
    fn start_rejects_empty_endpoint_list() {
        let mut bad = config();
        bad.endpoints.clear();
        let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
        let result = LogicalConnection::start(bad, transport);
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }
}
