//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration, error, and identifier primitives."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Shared primitives for the amqpr workspace: configuration types, the
//! configuration-error taxonomy, and small identifier helpers reused by
//! every other crate in the workspace.

pub mod config;
pub mod error;
pub mod ids;

pub use config::{
    ClientConfig, ConsumerConfig, CreditRefillMode, EndpointConfig, LogFormat, LoggingConfig,
    ProducerConfig, RecoveryPolicyConfig, RoutingType, Scheme, SendMode,
};
pub use error::ConfigurationError;
pub use ids::new_message_id;
