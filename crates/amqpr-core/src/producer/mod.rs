//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Auto-recovering producer link state machine."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use amqpr_common::{ProducerConfig, SendMode};
use amqpr_transport::{Connection, Disposition, Message, SenderLink};
use async_trait::async_trait;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connect::ConnectSender;
use crate::error::ClientError;
use crate::recoverable::{Recoverable, RecoverableId, RecoverableState};

/// `SendAsync(message, cancel) -> completion`, `DisposeAsync()`. Internally
/// owns a link state machine that may suspend sends during recovery.
pub struct Producer {
    id: RecoverableId,
    config: ProducerConfig,
    connect: ConnectSender,
    link: AsyncMutex<Option<Arc<dyn SenderLink>>>,
    state_tx: watch::Sender<RecoverableState>,
    state_rx: watch::Receiver<RecoverableState>,
    next_tag: AtomicU64,
}

impl Producer {
    /// Build a producer in `Initializing` state. It becomes usable once
    /// the supervisor's first recover/resume cycle runs.
    pub fn new(config: ProducerConfig, connect: ConnectSender) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(RecoverableState::Initializing);
        Arc::new(Self {
            id: RecoverableId::new(),
            config,
            connect,
            link: AsyncMutex::new(None),
            state_tx,
            state_rx,
            next_tag: AtomicU64::new(0),
        })
    }

    fn set_state(&self, state: RecoverableState) {
        let _ = self.state_tx.send(state);
    }

    async fn wait_until(&self, predicate: impl Fn(RecoverableState) -> bool) {
        let mut rx = self.state_rx.clone();
        loop {
            if predicate(*rx.borrow()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Send `message`, resolving once the broker settles the delivery (or
    /// immediately for a best-effort link). While suspended/recovering,
    /// behavior depends on the producer's configured [`SendMode`].
    pub async fn send(&self, message: Message, cancel: CancellationToken) -> Result<Disposition, ClientError> {
        loop {
            match self.state() {
                RecoverableState::Attached => {
                    let link = {
                        let guard = self.link.lock().await;
                        guard.clone()
                    };
                    let Some(link) = link else {
                        // Raced with a concurrent suspend; reconsider state.
                        continue;
                    };
                    let mut rx = self.state_rx.clone();
                    return tokio::select! {
                        result = link.send(message) => {
                            if let Err(err) = &result {
                                if matches!(err, amqpr_transport::TransportError::LinkDetached { .. }) {
                                    self.connect.wake();
                                }
                            }
                            result.map_err(ClientError::from)
                        }
                        _ = cancel.cancelled() => Err(ClientError::Cancelled),
                        _ = async {
                            while *rx.borrow() == RecoverableState::Attached {
                                if rx.changed().await.is_err() {
                                    return;
                                }
                            }
                        } => Err(ClientError::Retryable {
                            reason: "link closed while send was in flight".into(),
                        }),
                    };
                }
                RecoverableState::Closed => return Err(ClientError::Cancelled),
                state if crate::supervisor::requires_parking(state) => {
                    match self.config.send_mode {
                        SendMode::FireAndForgetWithFlowControl => {
                            return Err(ClientError::Retryable {
                                reason: "producer is not attached".into(),
                            });
                        }
                        SendMode::AwaitCredit => {
                            tokio::select! {
                                _ = self.wait_until(|s| matches!(s, RecoverableState::Attached | RecoverableState::Closed)) => continue,
                                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                            }
                        }
                    }
                }
            }
        }
    }

    fn link_target(&self) -> String {
        self.config.address.clone()
    }
}

#[async_trait]
impl Recoverable for Producer {
    fn id(&self) -> RecoverableId {
        self.id
    }

    fn state(&self) -> RecoverableState {
        *self.state_rx.borrow()
    }

    async fn suspend(&self) {
        self.set_state(RecoverableState::Suspended);
    }

    async fn recover(
        &self,
        connection: Arc<dyn Connection>,
        _cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        self.set_state(RecoverableState::Recovering);
        let session = connection.open_session().await?;
        let link_name = format!("producer-{}", Uuid::new_v4());
        let target = self.link_target();
        let link = session
            .open_sender_link(&link_name, &target, std::slice::from_ref(&self.config.routing_type))
            .await?;
        *self.link.lock().await = Some(link);
        Ok(())
    }

    async fn resume(&self) {
        self.set_state(RecoverableState::Attached);
    }

    async fn close(&self) {
        self.set_state(RecoverableState::Closed);
        if let Some(link) = self.link.lock().await.take() {
            link.close(None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amqpr_common::{EndpointConfig, RoutingType, Scheme};
    use amqpr_transport::{InMemoryTransport, MessageBody, Transport};

    fn endpoint() -> EndpointConfig {
        EndpointConfig::new(Scheme::Amqp, "localhost", 5672, "guest", "guest")
    }

    fn producer_config() -> ProducerConfig {
        ProducerConfig {
            address: "orders".into(),
            routing_type: RoutingType::Queue,
            message_priority: None,
            time_to_live: None,
            send_mode: SendMode::AwaitCredit,
        }
    }

    #[tokio::test]
    async fn send_while_attached_settles_immediately() {
        let transport = InMemoryTransport::new();
        let connection = transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .unwrap();
        let (connect_tx, _connect_rx) = crate::connect::connect_channel();
        let producer = Producer::new(producer_config(), connect_tx);
        producer.recover(connection, CancellationToken::new()).await.unwrap();
        producer.resume().await;

        let outcome = producer
            .send(Message::new(MessageBody::String("hi".into())), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, Disposition::Accepted);
    }

    #[tokio::test]
    async fn fire_and_forget_send_fails_fast_while_suspended() {
        let (connect_tx, _connect_rx) = crate::connect::connect_channel();
        let mut config = producer_config();
        config.send_mode = SendMode::FireAndForgetWithFlowControl;
        let producer = Producer::new(config, connect_tx);
        producer.suspend().await;

        let result = producer
            .send(Message::new(MessageBody::Boolean(true)), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ClientError::Retryable { .. })));
    }

    #[tokio::test]
    async fn link_detach_during_send_wakes_the_supervisor() {
        let transport = InMemoryTransport::new();
        let connection = transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .unwrap();
        let (connect_tx, mut connect_rx) = crate::connect::connect_channel();
        let producer = Producer::new(producer_config(), connect_tx);
        producer.recover(connection, CancellationToken::new()).await.unwrap();
        producer.resume().await;

        transport.script_link_detach("orders", "peer detached").await;

        let result = producer
            .send(Message::new(MessageBody::String("hi".into())), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(ClientError::Transport(_))));

        connect_rx.recv().await.expect("wake delivered to supervisor");
    }

    #[tokio::test]
    async fn await_credit_send_unparks_on_resume() {
        let transport = InMemoryTransport::new();
        let connection = transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .unwrap();
        let (connect_tx, _connect_rx) = crate::connect::connect_channel();
        let producer = Producer::new(producer_config(), connect_tx);
        producer.recover(connection, CancellationToken::new()).await.unwrap();

        let producer_for_task = producer.clone();
        let send_task = tokio::spawn(async move {
            producer_for_task
                .send(Message::new(MessageBody::I32(7)), CancellationToken::new())
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        producer.resume().await;

        let outcome = send_task.await.unwrap().unwrap();
        assert_eq!(outcome, Disposition::Accepted);
    }
}
