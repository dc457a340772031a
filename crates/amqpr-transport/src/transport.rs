//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Transport adapter trait hiding the AMQP library behind a minimal interface."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use amqpr_common::RoutingType;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::model::{ConnectionClosed, Disposition, Endpoint, Message};

/// Hides the underlying AMQP library behind the minimal surface the core
/// depends on. Implementations: [`crate::mock::InMemoryTransport`]
/// for tests, [`crate::fe2o3::Fe2o3Transport`] (feature `fe2o3`) for a real
/// broker.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `endpoint`. Cancellation aborts the attempt
    /// immediately and yields [`TransportError::Cancelled`].
    async fn open_connection(
        &self,
        endpoint: &Endpoint,
        cancel: CancellationToken,
    ) -> Result<Arc<dyn Connection>, TransportError>;
}

/// A connection handle: `IsOpened` reflects the underlying transport's real
/// open state; `closed` resolves once, when the connection goes down for
/// any reason.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Whether the connection is still usable to open sessions/links.
    fn is_opened(&self) -> bool;

    /// Open a session over this connection.
    async fn open_session(&self) -> Result<Arc<dyn Session>, TransportError>;

    /// Resolves exactly once, when the connection closes (by peer or
    /// locally). Awaiting after the connection already closed returns
    /// immediately with the recorded event.
    async fn closed(&self) -> ConnectionClosed;

    /// Downcast hook so adapter-specific test helpers (e.g. scripting a
    /// peer close on the mock transport) can recover the concrete type
    /// behind the trait object.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// An AMQP session: a multiplex over a connection, owning links.
#[async_trait]
pub trait Session: Send + Sync {
    /// Open a sender link targeting `target` (an address, or an
    /// `address::queue` FQQN), advertising `capabilities`.
    async fn open_sender_link(
        &self,
        link_name: &str,
        target: &str,
        capabilities: &[RoutingType],
    ) -> Result<Arc<dyn SenderLink>, TransportError>;

    /// Open a receiver link sourced from `source`, advertising
    /// `capabilities` and requesting `prefetch` initial credit. Returns the
    /// link handle plus the channel deliveries are pushed into; the
    /// transport adapter drives this channel on the broker's behalf,
    /// replacing the source library's `Deliver` callback with an explicit,
    /// channel-delivered event.
    async fn open_receiver_link(
        &self,
        link_name: &str,
        source: &str,
        capabilities: &[RoutingType],
        prefetch: u32,
    ) -> Result<(Arc<dyn ReceiverLink>, tokio::sync::mpsc::Receiver<Message>), TransportError>;
}

/// A uni-directional outbound link.
#[async_trait]
pub trait SenderLink: Send + Sync {
    /// Send `message`, resolving with the broker's disposition once
    /// settled (or immediately for a best-effort link).
    async fn send(&self, message: Message) -> Result<Disposition, TransportError>;

    /// Close the link, optionally reporting an error to the peer.
    async fn close(&self, error: Option<String>);
}

/// A uni-directional inbound link.
#[async_trait]
pub trait ReceiverLink: Send + Sync {
    /// Accept (settle positively) the delivery identified by `delivery_tag`.
    async fn accept(&self, delivery_tag: u64) -> Result<(), TransportError>;

    /// Reject (settle negatively) the delivery identified by
    /// `delivery_tag`, attaching `error` as the rejection reason.
    async fn reject(&self, delivery_tag: u64, error: Option<String>) -> Result<(), TransportError>;

    /// Grant `n` additional units of credit to the link.
    fn add_credit(&self, n: u32);

    /// Close the link, optionally reporting an error to the peer.
    async fn close(&self, error: Option<String>);
}
