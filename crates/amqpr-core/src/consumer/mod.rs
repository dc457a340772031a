//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Auto-recovering consumer link state machine, prefetch buffer, and credit management."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use amqpr_common::{ConsumerConfig, CreditRefillMode};
use amqpr_transport::{Connection, Message, ReceiverLink};
use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::connect::ConnectSender;
use crate::error::ClientError;
use crate::recoverable::{Recoverable, RecoverableId, RecoverableState};

/// `ReceiveAsync(cancel) -> message`, `AcceptAsync(message)`,
/// `RejectAsync(message)`, `DisposeAsync()`.
pub struct Consumer {
    id: RecoverableId,
    config: ConsumerConfig,
    connect: ConnectSender,
    link: AsyncMutex<Option<Arc<dyn ReceiverLink>>>,
    state_tx: watch::Sender<RecoverableState>,
    state_rx: watch::Receiver<RecoverableState>,
    buffer: Arc<AsyncMutex<VecDeque<Message>>>,
    buffer_notify: Arc<Notify>,
    settled_since_refill: AtomicU32,
}

impl Consumer {
    /// Build a consumer in `Initializing` state with an empty prefetch
    /// buffer.
    pub fn new(config: ConsumerConfig, connect: ConnectSender) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(RecoverableState::Initializing);
        Arc::new(Self {
            id: RecoverableId::new(),
            config,
            connect,
            link: AsyncMutex::new(None),
            state_tx,
            state_rx,
            buffer: Arc::new(AsyncMutex::new(VecDeque::new())),
            buffer_notify: Arc::new(Notify::new()),
            settled_since_refill: AtomicU32::new(0),
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

    /// Drain the next buffered message in FIFO order, parking until one
    /// arrives, the consumer closes, or `cancel` fires.
    pub async fn receive(&self, cancel: CancellationToken) -> Result<Message, ClientError> {
        loop {
            if let Some(message) = self.buffer.lock().await.pop_front() {
                return Ok(message);
            }
            if self.state() == RecoverableState::Closed {
                return Err(ClientError::Cancelled);
            }
            tokio::select! {
                _ = self.buffer_notify.notified() => {}
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = self.wait_until(|s| s == RecoverableState::Closed) => return Err(ClientError::Cancelled),
            }
        }
    }

    /// Accept `message`. Post-close (link already detached), this silently
    /// succeeds locally and the broker re-delivers on the next attach.
    pub async fn accept(&self, message: &Message) -> Result<(), ClientError> {
        self.settle(message, true).await
    }

    /// Reject `message`; `error` is attached as the broker-visible reason.
    pub async fn reject(&self, message: &Message, error: Option<String>) -> Result<(), ClientError> {
        let _ = error;
        self.settle(message, false).await
    }

    async fn settle(&self, message: &Message, accept: bool) -> Result<(), ClientError> {
        let Some(tag) = message.delivery_tag else {
            return Ok(());
        };
        if self.state() != RecoverableState::Attached {
            return Ok(());
        }
        let link = self.link.lock().await.clone();
        if let Some(link) = link {
            let result = if accept {
                link.accept(tag).await
            } else {
                link.reject(tag, None).await
            };
            if let Err(err) = &result {
                if matches!(err, amqpr_transport::TransportError::LinkDetached { .. }) {
                    self.connect.wake();
                }
            }
            result?;
            self.refill_credit(&link);
        }
        Ok(())
    }

    fn refill_credit(&self, link: &Arc<dyn ReceiverLink>) {
        match self.config.credit_refill_mode {
            CreditRefillMode::PerMessage => link.add_credit(1),
            CreditRefillMode::Batched { batch_size } => {
                let settled = self.settled_since_refill.fetch_add(1, Ordering::SeqCst) + 1;
                if settled >= batch_size {
                    self.settled_since_refill.store(0, Ordering::SeqCst);
                    link.add_credit(batch_size);
                }
            }
        }
    }

    fn link_source(&self) -> String {
        self.config.link_address()
    }

    /// Spawn the background task that forwards transport deliveries into
    /// the local prefetch buffer, waking any parked [`Consumer::receive`].
    /// Holds only `Arc`-shared pieces, not the whole `Consumer`, since the
    /// `Recoverable` trait hands out `&self` rather than `Arc<Self>`.
    fn spawn_pump(&self, mut deliveries: mpsc::Receiver<Message>) {
        let buffer = self.buffer.clone();
        let notify = self.buffer_notify.clone();
        tokio::spawn(async move {
            while let Some(message) = deliveries.recv().await {
                buffer.lock().await.push_back(message);
                notify.notify_waiters();
            }
        });
    }
}

#[async_trait]
impl Recoverable for Consumer {
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
        let link_name = format!("consumer-{}", Uuid::new_v4());
        let buffered = self.buffer.lock().await.len() as u32;
        let credit = self.config.prefetch_count.saturating_sub(buffered);
        let (link, deliveries) = session
            .open_receiver_link(
                &link_name,
                &self.link_source(),
                std::slice::from_ref(&self.config.routing_type),
                credit,
            )
            .await?;
        *self.link.lock().await = Some(link);
        self.spawn_pump(deliveries);
        Ok(())
    }

    async fn resume(&self) {
        self.set_state(RecoverableState::Attached);
    }

    async fn close(&self) {
        self.set_state(RecoverableState::Closed);
        self.buffer_notify.notify_waiters();
        if let Some(link) = self.link.lock().await.take() {
            link.close(None).await;
        }
    }
}
