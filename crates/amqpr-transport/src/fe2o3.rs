//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport adapter backed by the fe2o3-amqp AMQP 1.0 stack (feature fe2o3)."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use amqpr_common::RoutingType;
use async_trait::async_trait;
use fe2o3_amqp::link::delivery::Delivery;
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::{Receiver as Fe2o3Receiver, Sender as Fe2o3Sender};
use fe2o3_amqp_types::definitions::{AmqpError, Error as Fe2o3Error};
use fe2o3_amqp_types::messaging::{message::BodyAlreadyDecoded, AmqpValue, Source, Target};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TransportError;
use crate::model::{ConnectionClosed, Disposition, Endpoint, Message, MessageBody};
use crate::transport::{Connection, ReceiverLink, SenderLink, Session, Transport};

fn capability_strings(capabilities: &[RoutingType]) -> Vec<String> {
    capabilities.iter().map(|c| c.capability().to_owned()).collect()
}

fn body_to_amqp_value(body: &MessageBody) -> AmqpValue<serde_json::Value> {
    // The underlying codec negotiates the concrete AMQP primitive type; this
    // adapter encodes through a JSON-shaped intermediate so the supported
    // body enumeration maps onto a single wire representation without
    // hand-rolling per-variant AMQP encoders here.
    let value = match body {
        MessageBody::String(s) => serde_json::Value::String(s.clone()),
        MessageBody::Char(c) => serde_json::Value::String(c.to_string()),
        MessageBody::I8(v) => serde_json::json!(v),
        MessageBody::I16(v) => serde_json::json!(v),
        MessageBody::I32(v) => serde_json::json!(v),
        MessageBody::I64(v) => serde_json::json!(v),
        MessageBody::U8(v) => serde_json::json!(v),
        MessageBody::U16(v) => serde_json::json!(v),
        MessageBody::U32(v) => serde_json::json!(v),
        MessageBody::U64(v) => serde_json::json!(v),
        MessageBody::Float(v) => serde_json::json!(v),
        MessageBody::Double(v) => serde_json::json!(v),
        MessageBody::Boolean(v) => serde_json::json!(v),
        MessageBody::Uuid(v) => serde_json::Value::String(v.to_string()),
        MessageBody::Timestamp(v) => serde_json::Value::String(v.to_rfc3339()),
        MessageBody::Binary(v) => serde_json::json!(v),
        MessageBody::List(items) => {
            serde_json::Value::Array(items.iter().map(|i| body_to_amqp_value(i).0).collect())
        }
    };
    AmqpValue(value)
}

/// Adapter over `fe2o3_amqp::Connection` / `Session` / `Sender` / `Receiver`,
/// translating their errors into this crate's [`TransportError`] taxonomy.
pub struct Fe2o3Transport {
    container_id: String,
}

impl Fe2o3Transport {
    /// Build a transport that opens connections under the given container
    /// id (falls back to a fresh id per endpoint if unset there).
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
        }
    }
}

#[async_trait]
impl Transport for Fe2o3Transport {
    async fn open_connection(
        &self,
        endpoint: &Endpoint,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Connection>, TransportError> {
        let url = format!(
            "{}://{}:{}@{}:{}",
            match endpoint.scheme {
                amqpr_common::Scheme::Amqp => "amqp",
                amqpr_common::Scheme::Amqps => "amqps",
            },
            endpoint.user,
            endpoint.password,
            endpoint.host,
            endpoint.port,
        );
        let container_id = endpoint
            .container_id
            .clone()
            .unwrap_or_else(|| self.container_id.clone());

        let open = fe2o3_amqp::Connection::builder()
            .container_id(container_id)
            .sasl_profile(SaslProfile::Plain {
                username: endpoint.user.clone(),
                password: endpoint.password.clone(),
            })
            .open(url.as_str());

        let connection = tokio::select! {
            result = open => result.map_err(|err| {
                tracing::warn!(endpoint = %endpoint.host, port = endpoint.port, error = %err, "connect failed");
                TransportError::ConnectFailed {
                    endpoint: format!("{}:{}", endpoint.host, endpoint.port),
                    source: anyhow::anyhow!(err),
                }
            })?,
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
        };

        tracing::debug!(endpoint = %endpoint.host, port = endpoint.port, "connection opened");
        Ok(Arc::new(Fe2o3ConnectionHandle::new(connection)))
    }
}

struct Fe2o3ConnectionHandle {
    connection: AsyncMutex<fe2o3_amqp::Connection>,
    closed: CancellationToken,
}

impl Fe2o3ConnectionHandle {
    fn new(connection: fe2o3_amqp::Connection) -> Self {
        Self {
            connection: AsyncMutex::new(connection),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Connection for Fe2o3ConnectionHandle {
    fn is_opened(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn open_session(&self) -> Result<Arc<dyn Session>, TransportError> {
        let mut connection = self.connection.lock().await;
        let session = fe2o3_amqp::Session::begin(&mut connection)
            .await
            .map_err(|err| TransportError::Fatal {
                message: format!("failed to begin session: {err}"),
            })?;
        Ok(Arc::new(Fe2o3SessionHandle {
            session: AsyncMutex::new(session),
        }))
    }

    async fn closed(&self) -> ConnectionClosed {
        self.closed.cancelled().await;
        ConnectionClosed {
            closed_by_peer: true,
            error: None,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct Fe2o3SessionHandle {
    session: AsyncMutex<fe2o3_amqp::Session>,
}

#[async_trait]
impl Session for Fe2o3SessionHandle {
    async fn open_sender_link(
        &self,
        link_name: &str,
        target: &str,
        capabilities: &[RoutingType],
    ) -> Result<Arc<dyn SenderLink>, TransportError> {
        let mut session = self.session.lock().await;
        let target = Target::builder()
            .address(target)
            .capabilities(capability_strings(capabilities))
            .build();
        let sender = Fe2o3Sender::attach(&mut session, link_name, target)
            .await
            .map_err(|err| {
                tracing::warn!(link = link_name, error = %err, "sender link attach failed");
                TransportError::LinkDetached {
                    link: link_name.to_owned(),
                    reason: err.to_string(),
                }
            })?;
        Ok(Arc::new(Fe2o3SenderLinkHandle {
            sender: AsyncMutex::new(sender),
        }))
    }

    async fn open_receiver_link(
        &self,
        link_name: &str,
        source: &str,
        capabilities: &[RoutingType],
        prefetch: u32,
    ) -> Result<(Arc<dyn ReceiverLink>, mpsc::Receiver<Message>), TransportError> {
        let mut session = self.session.lock().await;
        let source_descr = Source::builder()
            .address(source)
            .capabilities(capability_strings(capabilities))
            .build();
        let mut receiver = Fe2o3Receiver::attach(&mut session, link_name, source_descr)
            .await
            .map_err(|err| {
                tracing::warn!(link = link_name, error = %err, "receiver link attach failed");
                TransportError::LinkDetached {
                    link: link_name.to_owned(),
                    reason: err.to_string(),
                }
            })?;
        receiver.set_credit(prefetch).await.map_err(|err| TransportError::LinkDetached {
            link: link_name.to_owned(),
            reason: err.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(prefetch.max(1) as usize);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel::<ReceiverCommand>();
        let pump_link_name = link_name.to_owned();
        let pump: JoinHandle<()> = tokio::spawn(async move {
            let mut next_tag: u64 = 0;
            let mut unsettled: HashMap<u64, Delivery<BodyAlreadyDecoded<serde_json::Value>>> = HashMap::new();
            loop {
                tokio::select! {
                    delivery = receiver.recv::<BodyAlreadyDecoded<serde_json::Value>>() => {
                        match delivery {
                            Ok(delivery) => {
                                let tag = next_tag;
                                next_tag += 1;
                                let mut message = amqp_delivery_to_message(delivery.message());
                                message.delivery_tag = Some(tag);
                                unsettled.insert(tag, delivery);
                                if tx.send(message).await.is_err() {
                                    let _ = receiver.close().await;
                                    return;
                                }
                            }
                            Err(err) => {
                                tracing::debug!(link = pump_link_name.as_str(), error = %err, "receiver link closed");
                                return;
                            }
                        }
                    }
                    command = command_rx.recv() => {
                        match command {
                            Some(ReceiverCommand::Accept(tag, done)) => {
                                let result = match unsettled.remove(&tag) {
                                    Some(delivery) => receiver.accept(&delivery).await.map_err(|err| err.to_string()),
                                    None => Ok(()),
                                };
                                if let Err(err) = &result {
                                    tracing::warn!(link = pump_link_name.as_str(), error = %err, "accept failed");
                                }
                                let _ = done.send(result);
                            }
                            Some(ReceiverCommand::Reject(tag, reason, done)) => {
                                let result = match unsettled.remove(&tag) {
                                    Some(delivery) => {
                                        let error = Fe2o3Error::new(AmqpError::InternalError, reason, None);
                                        receiver.reject(&delivery, Some(error)).await.map_err(|err| err.to_string())
                                    }
                                    None => Ok(()),
                                };
                                if let Err(err) = &result {
                                    tracing::warn!(link = pump_link_name.as_str(), error = %err, "reject failed");
                                }
                                let _ = done.send(result);
                            }
                            Some(ReceiverCommand::AddCredit(n)) => {
                                if let Err(err) = receiver.set_credit(n).await {
                                    tracing::warn!(link = pump_link_name.as_str(), error = %err, "add_credit failed");
                                }
                            }
                            None => {
                                let _ = receiver.close().await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok((
            Arc::new(Fe2o3ReceiverLinkHandle { commands: command_tx, pump }),
            rx,
        ))
    }
}

enum ReceiverCommand {
    Accept(u64, oneshot::Sender<Result<(), String>>),
    Reject(u64, Option<String>, oneshot::Sender<Result<(), String>>),
    AddCredit(u32),
}

fn amqp_delivery_to_message(message: &fe2o3_amqp_types::messaging::Message<serde_json::Value>) -> Message {
    let body = amqp_value_to_body(&message.body);
    Message::new(body).with_message_id(Uuid::new_v4())
}

fn amqp_value_to_body(value: &serde_json::Value) -> MessageBody {
    match value {
        serde_json::Value::Null => MessageBody::String(String::new()),
        serde_json::Value::Bool(b) => MessageBody::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MessageBody::I64(i)
            } else if let Some(u) = n.as_u64() {
                MessageBody::U64(u)
            } else {
                MessageBody::Double(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => MessageBody::String(s.clone()),
        serde_json::Value::Array(items) => {
            MessageBody::List(items.iter().map(amqp_value_to_body).collect())
        }
        serde_json::Value::Object(_) => MessageBody::String(value.to_string()),
    }
}

struct Fe2o3SenderLinkHandle {
    sender: AsyncMutex<Fe2o3Sender>,
}

#[async_trait]
impl SenderLink for Fe2o3SenderLinkHandle {
    async fn send(&self, message: Message) -> Result<Disposition, TransportError> {
        let mut sender = self.sender.lock().await;
        let value = body_to_amqp_value(message.body());
        let outcome = sender.send(value).await.map_err(|err| {
            tracing::warn!(error = %err, "send failed");
            TransportError::LinkDetached {
                link: "sender".into(),
                reason: err.to_string(),
            }
        })?;
        Ok(if outcome.is_accepted() {
            Disposition::Accepted
        } else {
            Disposition::Rejected
        })
    }

    async fn close(&self, _error: Option<String>) {
        // fe2o3_amqp::Sender::close takes ownership; a shared handle can
        // only best-effort drop the underlying link here.
    }
}

/// The receiver half. The delivery pump task owns the real
/// `fe2o3_amqp::Receiver` and every unsettled delivery; this handle talks
/// to it over `commands` so accept/reject/add_credit settle against the
/// actual broker delivery instead of the local buffer alone.
struct Fe2o3ReceiverLinkHandle {
    commands: mpsc::UnboundedSender<ReceiverCommand>,
    pump: JoinHandle<()>,
}

#[async_trait]
impl ReceiverLink for Fe2o3ReceiverLinkHandle {
    async fn accept(&self, delivery_tag: u64) -> Result<(), TransportError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(ReceiverCommand::Accept(delivery_tag, done_tx))
            .map_err(|_| TransportError::Fatal {
                message: "receiver pump task is gone".into(),
            })?;
        done_rx
            .await
            .map_err(|_| TransportError::Fatal {
                message: "receiver pump task dropped the accept reply".into(),
            })?
            .map_err(|reason| TransportError::LinkDetached {
                link: "receiver".into(),
                reason,
            })
    }

    async fn reject(&self, delivery_tag: u64, error: Option<String>) -> Result<(), TransportError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.commands
            .send(ReceiverCommand::Reject(delivery_tag, error, done_tx))
            .map_err(|_| TransportError::Fatal {
                message: "receiver pump task is gone".into(),
            })?;
        done_rx
            .await
            .map_err(|_| TransportError::Fatal {
                message: "receiver pump task dropped the reject reply".into(),
            })?
            .map_err(|reason| TransportError::LinkDetached {
                link: "receiver".into(),
                reason,
            })
    }

    fn add_credit(&self, n: u32) {
        let _ = self.commands.send(ReceiverCommand::AddCredit(n));
    }

    async fn close(&self, _error: Option<String>) {
        self.pump.abort();
    }
}
