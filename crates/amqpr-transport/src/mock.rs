//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Deterministic in-memory transport for workspace tests, with scripted failure injection."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use amqpr_common::RoutingType;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::model::{ConnectionClosed, Disposition, Endpoint, Message};
use crate::transport::{Connection, ReceiverLink, SenderLink, Session, Transport};

/// One scripted outcome for a single `open_connection` attempt.
#[derive(Debug, Clone)]
enum ConnectOutcome {
    Fail(String),
    Succeed,
}

/// A broker-side queue, shared by address across every connection this
/// transport ever opens, so messages sent while a consumer is suspended are
/// redelivered once a new receiver link attaches.
#[derive(Default)]
struct Mailbox {
    queue: AsyncMutex<VecDeque<Message>>,
    notify: Notify,
    detach_once: AsyncMutex<Option<String>>,
}

/// Deterministic in-process mock transport used by the workspace's own
/// test suite, extended with scripted connect failures and a peer-close
/// switch so supervisor, producer, and consumer tests can simulate
/// disconnects without a real broker.
#[derive(Clone)]
pub struct InMemoryTransport {
    connect_script: Arc<AsyncMutex<VecDeque<ConnectOutcome>>>,
    mailboxes: Arc<DashMap<String, Arc<Mailbox>>>,
    live: Arc<AsyncMutex<Vec<Arc<InMemoryConnection>>>>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTransport {
    /// Create a transport with an empty connect script (every attempt
    /// succeeds) and no backlog.
    pub fn new() -> Self {
        Self {
            connect_script: Arc::new(AsyncMutex::new(VecDeque::new())),
            mailboxes: Arc::new(DashMap::new()),
            live: Arc::new(AsyncMutex::new(Vec::new())),
        }
    }

    /// Every connection this transport has opened that is still believed
    /// open, newest last. Exposed so integration tests can drive a peer
    /// close without threading the connection handle back out of a
    /// [`crate::Transport`] trait object.
    pub async fn live_connections(&self) -> Vec<Arc<InMemoryConnection>> {
        let mut live = self.live.lock().await;
        live.retain(|c| c.is_opened());
        live.clone()
    }

    /// Queue `n` consecutive connect failures, each reporting `reason`,
    /// before attempts start succeeding again.
    pub async fn script_connect_failures(&self, n: usize, reason: impl Into<String>) {
        let reason = reason.into();
        let mut script = self.connect_script.lock().await;
        for _ in 0..n {
            script.push_back(ConnectOutcome::Fail(reason.clone()));
        }
    }

    fn mailbox_for(&self, address: &str) -> Arc<Mailbox> {
        self.mailboxes
            .entry(address.to_owned())
            .or_insert_with(|| Arc::new(Mailbox::default()))
            .clone()
    }

    /// Arrange for the next send on a sender link targeting `address` to
    /// fail as though the broker detached that link, without closing the
    /// connection it lives on. Fires once, then clears itself.
    pub async fn script_link_detach(&self, address: &str, reason: impl Into<String>) {
        let mailbox = self.mailbox_for(address);
        *mailbox.detach_once.lock().await = Some(reason.into());
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open_connection(
        &self,
        endpoint: &Endpoint,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let outcome = {
            let mut script = self.connect_script.lock().await;
            script.pop_front()
        };
        match outcome {
            Some(ConnectOutcome::Fail(reason)) => Err(TransportError::ConnectFailed {
                endpoint: format!("{}:{}", endpoint.host, endpoint.port),
                source: anyhow::anyhow!(reason),
            }),
            Some(ConnectOutcome::Succeed) | None => {
                let connection = Arc::new(InMemoryConnection::new(self.mailboxes.clone()));
                self.live.lock().await.push(connection.clone());
                Ok(connection as Arc<dyn Connection>)
            }
        }
    }
}

/// The connection half of the mock; `simulate_peer_close` lets tests drive
/// scenario 6 (peer close + recover) without a real broker.
pub struct InMemoryConnection {
    opened: AtomicBool,
    closed_tx: watch::Sender<Option<ConnectionClosed>>,
    closed_rx: watch::Receiver<Option<ConnectionClosed>>,
    mailboxes: Arc<DashMap<String, Arc<Mailbox>>>,
}

impl InMemoryConnection {
    fn new(mailboxes: Arc<DashMap<String, Arc<Mailbox>>>) -> Self {
        let (closed_tx, closed_rx) = watch::channel(None);
        Self {
            opened: AtomicBool::new(true),
            closed_tx,
            closed_rx,
            mailboxes,
        }
    }

    /// Simulate the broker closing this connection.
    pub fn simulate_peer_close(&self, error: Option<String>) {
        self.opened.store(false, Ordering::SeqCst);
        let _ = self.closed_tx.send(Some(ConnectionClosed {
            closed_by_peer: true,
            error,
        }));
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    async fn open_session(&self) -> Result<Arc<dyn Session>, TransportError> {
        if !self.is_opened() {
            return Err(TransportError::Fatal {
                message: "connection is closed".into(),
            });
        }
        Ok(Arc::new(InMemorySession {
            mailboxes: self.mailboxes.clone(),
        }))
    }

    async fn closed(&self) -> ConnectionClosed {
        let mut rx = self.closed_rx.clone();
        loop {
            if let Some(event) = rx.borrow().clone() {
                return event;
            }
            if rx.changed().await.is_err() {
                return ConnectionClosed {
                    closed_by_peer: false,
                    error: Some("connection dropped".into()),
                };
            }
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct InMemorySession {
    mailboxes: Arc<DashMap<String, Arc<Mailbox>>>,
}

#[async_trait]
impl Session for InMemorySession {
    async fn open_sender_link(
        &self,
        link_name: &str,
        target: &str,
        _capabilities: &[RoutingType],
    ) -> Result<Arc<dyn SenderLink>, TransportError> {
        let mailbox = self
            .mailboxes
            .entry(target.to_owned())
            .or_insert_with(|| Arc::new(Mailbox::default()))
            .clone();
        Ok(Arc::new(InMemorySenderLink {
            name: link_name.to_owned(),
            target: target.to_owned(),
            mailbox,
            next_tag: AtomicU64::new(0),
        }))
    }

    async fn open_receiver_link(
        &self,
        link_name: &str,
        source: &str,
        _capabilities: &[RoutingType],
        prefetch: u32,
    ) -> Result<(Arc<dyn ReceiverLink>, mpsc::Receiver<Message>), TransportError> {
        let mailbox = self
            .mailboxes
            .entry(source.to_owned())
            .or_insert_with(|| Arc::new(Mailbox::default()))
            .clone();
        let (tx, rx) = mpsc::channel(prefetch.max(1) as usize);
        let link = Arc::new(InMemoryReceiverLink {
            name: link_name.to_owned(),
            source: source.to_owned(),
            mailbox: mailbox.clone(),
            credit: AtomicU32::new(prefetch),
            closed: AtomicBool::new(false),
        });
        let pump_link = link.clone();
        let pump_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                if pump_link.closed.load(Ordering::SeqCst) {
                    return;
                }
                if pump_link.credit.load(Ordering::SeqCst) == 0 {
                    pump_link.mailbox.notify.notified().await;
                    continue;
                }
                let next = {
                    let mut queue = pump_link.mailbox.queue.lock().await;
                    queue.pop_front()
                };
                match next {
                    Some(message) => {
                        pump_link.credit.fetch_sub(1, Ordering::SeqCst);
                        if pump_tx.send(message).await.is_err() {
                            return;
                        }
                    }
                    None => pump_link.mailbox.notify.notified().await,
                }
            }
        });
        Ok((link, rx))
    }
}

struct InMemorySenderLink {
    name: String,
    #[allow(dead_code)]
    target: String,
    mailbox: Arc<Mailbox>,
    next_tag: AtomicU64,
}

#[async_trait]
impl SenderLink for InMemorySenderLink {
    async fn send(&self, mut message: Message) -> Result<Disposition, TransportError> {
        if let Some(reason) = self.mailbox.detach_once.lock().await.take() {
            return Err(TransportError::LinkDetached {
                link: self.name.clone(),
                reason,
            });
        }
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        message.delivery_tag = Some(tag);
        {
            let mut queue = self.mailbox.queue.lock().await;
            queue.push_back(message);
        }
        self.mailbox.notify.notify_waiters();
        Ok(Disposition::Accepted)
    }

    async fn close(&self, _error: Option<String>) {}
}

struct InMemoryReceiverLink {
    name: String,
    #[allow(dead_code)]
    source: String,
    mailbox: Arc<Mailbox>,
    credit: AtomicU32,
    closed: AtomicBool,
}

#[async_trait]
impl ReceiverLink for InMemoryReceiverLink {
    async fn accept(&self, _delivery_tag: u64) -> Result<(), TransportError> {
        if let Some(reason) = self.mailbox.detach_once.lock().await.take() {
            return Err(TransportError::LinkDetached {
                link: self.name.clone(),
                reason,
            });
        }
        Ok(())
    }

    async fn reject(&self, _delivery_tag: u64, _error: Option<String>) -> Result<(), TransportError> {
        if let Some(reason) = self.mailbox.detach_once.lock().await.take() {
            return Err(TransportError::LinkDetached {
                link: self.name.clone(),
                reason,
            });
        }
        Ok(())
    }

    fn add_credit(&self, n: u32) {
        self.credit.fetch_add(n, Ordering::SeqCst);
        self.mailbox.notify.notify_waiters();
    }

    async fn close(&self, _error: Option<String>) {
        self.closed.store(true, Ordering::SeqCst);
        self.mailbox.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageBody;
    use amqpr_common::EndpointConfig;

    fn endpoint() -> Endpoint {
        EndpointConfig::new(amqpr_common::Scheme::Amqp, "localhost", 5672, "guest", "guest")
    }

    #[tokio::test]
    async fn send_then_receive_round_trips_a_message() {
        let transport = InMemoryTransport::new();
        let connection = transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .expect("connect succeeds");
        let session = connection.open_session().await.expect("session opens");

        let sender = session
            .open_sender_link("s1", "orders", &[RoutingType::Queue])
            .await
            .expect("sender opens");
        let (_receiver, mut deliveries) = session
            .open_receiver_link("r1", "orders", &[RoutingType::Queue], 10)
            .await
            .expect("receiver opens");

        sender
            .send(Message::new(MessageBody::String("hello".into())))
            .await
            .expect("send succeeds");

        let delivered = deliveries.recv().await.expect("message delivered");
        let body: String = {
            use crate::model::TypedBody;
            delivered.get_body()
        };
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn scripted_connect_failures_are_consumed_in_order() {
        let transport = InMemoryTransport::new();
        transport.script_connect_failures(2, "broker unreachable").await;

        assert!(transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .is_err());
        assert!(transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .is_err());
        assert!(transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn peer_close_is_observable_through_closed() {
        let transport = InMemoryTransport::new();
        let connection = transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .expect("connect succeeds");
        let concrete = connection
            .as_any()
            .downcast_ref::<InMemoryConnection>()
            .expect("mock connection");
        concrete.simulate_peer_close(Some("amqp:connection:forced".into()));
        let event = connection.closed().await;
        assert!(event.closed_by_peer);
        assert!(!connection.is_opened());
    }

    #[tokio::test]
    async fn live_connections_drops_closed_entries() {
        let transport = InMemoryTransport::new();
        transport
            .open_connection(&endpoint(), CancellationToken::new())
            .await
            .expect("connect succeeds");
        assert_eq!(transport.live_connections().await.len(), 1);

        transport.live_connections().await[0].simulate_peer_close(None);
        assert_eq!(transport.live_connections().await.len(), 0);
    }
}
