//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Message envelope, body type enumeration, and connection-close event shapes."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use amqpr_common::ConfigurationError;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A broker endpoint. Re-exported from `amqpr-common`
/// since the configuration surface and the runtime data model describe the
/// exact same immutable, structurally-equal tuple.
pub use amqpr_common::EndpointConfig as Endpoint;

/// The exhaustive set of message body types this client core understands.
/// Constructing a [`Message`] with any other shape is rejected
/// at the boundary rather than represented here.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// UTF-8 string.
    String(String),
    /// A single Unicode scalar value.
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    /// Opaque binary payload.
    Binary(Vec<u8>),
    /// A typed, homogeneous list. Heterogeneous lists are out of scope.
    List(Vec<MessageBody>),
}

impl MessageBody {
    /// Short, stable type name used in [`ConfigurationError::UnsupportedBodyType`]
    /// messages; not part of the wire format.
    pub fn type_name(&self) -> &'static str {
        match self {
            MessageBody::String(_) => "string",
            MessageBody::Char(_) => "char",
            MessageBody::I8(_) => "i8",
            MessageBody::I16(_) => "i16",
            MessageBody::I32(_) => "i32",
            MessageBody::I64(_) => "i64",
            MessageBody::U8(_) => "u8",
            MessageBody::U16(_) => "u16",
            MessageBody::U32(_) => "u32",
            MessageBody::U64(_) => "u64",
            MessageBody::Float(_) => "float",
            MessageBody::Double(_) => "double",
            MessageBody::Boolean(_) => "boolean",
            MessageBody::Uuid(_) => "uuid",
            MessageBody::Timestamp(_) => "timestamp",
            MessageBody::Binary(_) => "binary",
            MessageBody::List(_) => "list",
        }
    }
}

/// A message envelope exchanged across the producer/consumer surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    body: MessageBody,
    /// Assigned by the sender link on dispatch; `None` until sent.
    pub delivery_tag: Option<u64>,
    /// Free-form application headers. Not interpreted by this crate.
    pub application_properties: BTreeMap<String, String>,
    /// Optional application-supplied id a caller MAY use to deduplicate
    /// retried sends. The producer never inspects this field itself.
    pub message_id: Option<Uuid>,
}

impl Message {
    /// Construct a message from a body. Rejects a body that is itself
    /// an empty (zero-variant) placeholder is impossible by construction;
    /// the null-body case applies to host-language APIs that allow an
    /// absent body and is therefore enforced by
    /// [`Message::try_new`] for callers building from an `Option`.
    pub fn new(body: MessageBody) -> Self {
        Self {
            body,
            delivery_tag: None,
            application_properties: BTreeMap::new(),
            message_id: None,
        }
    }

    /// Construct a message from an optional body, failing with
    /// [`ConfigurationError::NullBody`] when `body` is `None`.
    pub fn try_new(body: Option<MessageBody>) -> Result<Self, ConfigurationError> {
        body.map(Self::new).ok_or(ConfigurationError::NullBody)
    }

    /// The stored body type.
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Attach a caller-supplied message id.
    pub fn with_message_id(mut self, id: Uuid) -> Self {
        self.message_id = Some(id);
        self
    }

    /// Attach an application property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    /// Returns the body if it matches the requested shape, or `None`
    /// otherwise. Higher-level typed accessors (`get_body::<T>`, which
    /// return a default value rather than erroring) are provided by the
    /// [`TypedBody`] extension trait.
    pub fn body_as(&self) -> &MessageBody {
        &self.body
    }
}

/// Outcome of a transport open/attach retried under a [`amqpr_policy::RecoveryPolicy`];
/// not part of the public data model but re-exported here since both the
/// producer and consumer state machines consult it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The broker accepted the delivery.
    Accepted,
    /// The broker rejected the delivery with a reason.
    Rejected,
    /// The broker released the delivery back without accepting it.
    Released,
}

/// Event delivered when a [`crate::Connection`] closes, carrying whether the
/// peer initiated the close and any broker-reported error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionClosed {
    /// `true` when the broker (not this client) initiated the close.
    pub closed_by_peer: bool,
    /// Broker-reported error text, if any.
    pub error: Option<String>,
}

/// Typed body accessors mirroring a `GetBody<T>` contract: returns the
/// stored value when the shape matches, otherwise `T::default()`, never
/// an error.
pub trait TypedBody<T> {
    /// Extract `T` from the message body, or `T::default()` on mismatch.
    fn get_body(&self) -> T;
}

macro_rules! impl_typed_body {
    ($ty:ty, $variant:ident) => {
        impl TypedBody<$ty> for Message {
            fn get_body(&self) -> $ty {
                match &self.body {
                    MessageBody::$variant(v) => v.clone(),
                    _ => <$ty>::default(),
                }
            }
        }
    };
}

impl_typed_body!(String, String);
impl_typed_body!(char, Char);
impl_typed_body!(i8, I8);
impl_typed_body!(i16, I16);
impl_typed_body!(i32, I32);
impl_typed_body!(i64, I64);
impl_typed_body!(u8, U8);
impl_typed_body!(u16, U16);
impl_typed_body!(u32, U32);
impl_typed_body!(u64, U64);
impl_typed_body!(f32, Float);
impl_typed_body!(f64, Double);
impl_typed_body!(bool, Boolean);
impl_typed_body!(Uuid, Uuid);
impl_typed_body!(Vec<u8>, Binary);
impl_typed_body!(Vec<MessageBody>, List);

impl TypedBody<DateTime<Utc>> for Message {
    fn get_body(&self) -> DateTime<Utc> {
        match &self.body {
            MessageBody::Timestamp(v) => *v,
            _ => DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_rejects_null_body() {
        assert!(matches!(
            Message::try_new(None),
            Err(ConfigurationError::NullBody)
        ));
    }

    #[test]
    fn get_body_round_trips_matching_type() {
        let message = Message::new(MessageBody::U32(42));
        let value: u32 = message.get_body();
        assert_eq!(value, 42);
    }

    #[test]
    fn get_body_returns_default_on_mismatch() {
        let message = Message::new(MessageBody::U32(42));
        let value: String = message.get_body();
        assert_eq!(value, String::default());
    }

    #[test]
    fn get_body_round_trips_char_uuid_timestamp_and_list() {
        let id = Uuid::new_v4();
        let ts = Utc::now();

        let char_message = Message::new(MessageBody::Char('q'));
        let value: char = char_message.get_body();
        assert_eq!(value, 'q');

        let uuid_message = Message::new(MessageBody::Uuid(id));
        let value: Uuid = uuid_message.get_body();
        assert_eq!(value, id);

        let timestamp_message = Message::new(MessageBody::Timestamp(ts));
        let value: DateTime<Utc> = timestamp_message.get_body();
        assert_eq!(value, ts);

        let list_message = Message::new(MessageBody::List(vec![MessageBody::I32(1), MessageBody::I32(2)]));
        let value: Vec<MessageBody> = list_message.get_body();
        assert_eq!(value, vec![MessageBody::I32(1), MessageBody::I32(2)]);
    }

    #[test]
    fn get_body_defaults_for_char_uuid_and_timestamp_on_mismatch() {
        let message = Message::new(MessageBody::U32(42));
        assert_eq!(TypedBody::<char>::get_body(&message), char::default());
        assert_eq!(TypedBody::<Uuid>::get_body(&message), Uuid::default());
        assert_eq!(
            TypedBody::<DateTime<Utc>>::get_body(&message),
            DateTime::<Utc>::UNIX_EPOCH
        );
    }
}
