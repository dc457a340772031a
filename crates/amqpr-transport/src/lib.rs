//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "AMQP 1.0 data model and transport adapter abstraction for the amqpr messaging client core."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Data model and transport adapter for the amqpr workspace. This crate
//! never speaks to a broker directly on its own terms; it defines the
//! [`Transport`] boundary and ships two implementations: an in-memory
//! mock for tests, and a real adapter over `fe2o3-amqp` behind the
//! `fe2o3` feature.

mod error;
#[cfg(feature = "fe2o3")]
mod fe2o3;
pub mod management;
mod mock;
mod model;
mod transport;

pub use error::TransportError;
#[cfg(feature = "fe2o3")]
pub use fe2o3::Fe2o3Transport;
pub use mock::{InMemoryConnection, InMemoryTransport};
pub use model::{ConnectionClosed, Disposition, Endpoint, Message, MessageBody, TypedBody};
pub use transport::{Connection, ReceiverLink, SenderLink, Session, Transport};
