//! Runtime-type-driven envelope construction.
//!
//! Publishers receive payloads as `Box<dyn Payload>` from arbitrary call sites,
//! so the concrete type is only known at run time. The [`MessageMapper`] holds
//! one constructor per registered payload type, keyed by [`TypeId`], and turns a
//! payload into the matching `DomainMessage<T>` or `IntegrationMessage<T>`.
//!
//! The same table rehydrates envelopes from their [`WireEnvelope`] form, keyed
//! by envelope name, so a transport binding can decode what it receives.
//!
//! # Example
//!
//! ```
//! use courier_core::environment::SystemClock;
//! use courier_core::mapper::MessageMapper;
//! use courier_core::message::{MessageFamily, Payload};
//! use courier_core::metadata::Metadata;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct OrderPlaced {
//!     id: u64,
//! }
//! impl Payload for OrderPlaced {}
//!
//! let mapper = MessageMapper::builder().register::<OrderPlaced>().build();
//!
//! let envelope = mapper
//!     .map(MessageFamily::Integration, Box::new(OrderPlaced { id: 42 }), Metadata::generate(&SystemClock))
//!     .unwrap();
//! assert_eq!(envelope.name(), "OrderPlaced");
//! ```

use crate::error::MessagingError;
use crate::message::{
    DomainMessage, IntegrationMessage, Message, MessageFamily, Payload, short_type_name,
};
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Construct = fn(Box<dyn Any + Send + Sync>, Metadata) -> Result<Arc<dyn Message>, MessagingError>;
type Decode = fn(WireEnvelope) -> Result<Arc<dyn Message>, MessagingError>;

#[derive(Clone, Copy)]
struct Registration {
    name: &'static str,
    domain: Construct,
    integration: Construct,
    decode_domain: Decode,
    decode_integration: Decode,
}

/// Lookup table from payload type to envelope constructor.
///
/// Built once at startup through [`MessageMapperBuilder`] and shared behind an
/// `Arc`. Read-only after construction.
#[derive(Clone)]
pub struct MessageMapper {
    by_type: HashMap<TypeId, Registration>,
    by_name: HashMap<&'static str, TypeId>,
}

impl MessageMapper {
    /// Start building a mapper.
    #[must_use]
    pub fn builder() -> MessageMapperBuilder {
        MessageMapperBuilder {
            by_type: HashMap::new(),
            by_name: HashMap::new(),
        }
    }

    /// Map an untyped payload into an envelope of `family`.
    ///
    /// A fresh message id is generated; `name` is the payload's short type name.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::InvalidPayload`] if `payload` is already an envelope
    /// - [`MessagingError::UnregisteredPayload`] if its type was never registered
    pub fn map(
        &self,
        family: MessageFamily,
        payload: Box<dyn Payload>,
        metadata: Metadata,
    ) -> Result<Arc<dyn Message>, MessagingError> {
        reject_envelope(payload.as_ref(), family)?;

        let registration = self
            .by_type
            .get(&payload.payload_type_id())
            .ok_or_else(|| MessagingError::UnregisteredPayload(payload.payload_type_name().to_string()))?;

        let construct = match family {
            MessageFamily::Domain => registration.domain,
            MessageFamily::Integration => registration.integration,
        };
        construct(payload.into_any(), metadata)
    }

    /// Map into a `DomainMessage`.
    ///
    /// # Errors
    ///
    /// See [`MessageMapper::map`].
    pub fn map_domain(
        &self,
        payload: Box<dyn Payload>,
        metadata: Metadata,
    ) -> Result<Arc<dyn Message>, MessagingError> {
        self.map(MessageFamily::Domain, payload, metadata)
    }

    /// Map into an `IntegrationMessage`.
    ///
    /// # Errors
    ///
    /// See [`MessageMapper::map`].
    pub fn map_integration(
        &self,
        payload: Box<dyn Payload>,
        metadata: Metadata,
    ) -> Result<Arc<dyn Message>, MessagingError> {
        self.map(MessageFamily::Integration, payload, metadata)
    }

    /// Statically typed domain mapping. Needs no registration.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidPayload`] if `payload` is already an envelope.
    pub fn to_domain<T: Payload>(
        payload: T,
        metadata: Metadata,
    ) -> Result<DomainMessage<T>, MessagingError> {
        reject_envelope(&payload, MessageFamily::Domain)?;
        Ok(DomainMessage::wrap(payload, metadata))
    }

    /// Statically typed integration mapping. Needs no registration.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::InvalidPayload`] if `payload` is already an envelope.
    pub fn to_integration<T: Payload>(
        payload: T,
        metadata: Metadata,
    ) -> Result<IntegrationMessage<T>, MessagingError> {
        reject_envelope(&payload, MessageFamily::Integration)?;
        Ok(IntegrationMessage::wrap(payload, metadata))
    }

    /// Encode an envelope into its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Codec`] if the content cannot be serialized.
    pub fn encode(message: &dyn Message) -> Result<WireEnvelope, MessagingError> {
        Ok(WireEnvelope {
            message_id: message.message_id().to_string(),
            name: message.name().to_string(),
            family: message.family(),
            metadata: message.metadata().clone(),
            content: message.content_json()?,
        })
    }

    /// Rehydrate a typed envelope from its wire form.
    ///
    /// # Errors
    ///
    /// - [`MessagingError::UnregisteredPayload`] if no payload with that name is registered
    /// - [`MessagingError::Codec`] if the content does not match the registered type
    pub fn decode(&self, wire: WireEnvelope) -> Result<Arc<dyn Message>, MessagingError> {
        let registration = self
            .by_name
            .get(wire.name.as_str())
            .and_then(|type_id| self.by_type.get(type_id))
            .ok_or_else(|| MessagingError::UnregisteredPayload(wire.name.clone()))?;

        match wire.family {
            MessageFamily::Domain => (registration.decode_domain)(wire),
            MessageFamily::Integration => (registration.decode_integration)(wire),
        }
    }

    /// Whether a payload type is registered.
    #[must_use]
    pub fn is_registered<T: Payload>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Registered payload names, sorted.
    #[must_use]
    pub fn registered_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.by_type.values().map(|r| r.name).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for MessageMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageMapper")
            .field("registered", &self.registered_names())
            .finish()
    }
}

/// Builder for [`MessageMapper`].
pub struct MessageMapperBuilder {
    by_type: HashMap<TypeId, Registration>,
    by_name: HashMap<&'static str, TypeId>,
}

impl MessageMapperBuilder {
    /// Register a payload type for both families.
    ///
    /// Registering the same type twice is a no-op. Two distinct types with the
    /// same short name cannot both be decoded from the wire; the later one wins
    /// for decoding.
    #[must_use]
    pub fn register<T>(mut self) -> Self
    where
        T: Payload + Serialize + DeserializeOwned,
    {
        let name = short_type_name(std::any::type_name::<T>());
        self.by_type.entry(TypeId::of::<T>()).or_insert(Registration {
            name,
            domain: construct_domain::<T>,
            integration: construct_integration::<T>,
            decode_domain: decode_domain::<T>,
            decode_integration: decode_integration::<T>,
        });
        self.by_name.insert(name, TypeId::of::<T>());
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> MessageMapper {
        MessageMapper {
            by_type: self.by_type,
            by_name: self.by_name,
        }
    }
}

/// Transport-neutral representation of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Message identifier
    pub message_id: String,
    /// Content type name, used to pick the decoder
    pub name: String,
    /// Envelope family
    pub family: MessageFamily,
    /// Correlation metadata
    pub metadata: Metadata,
    /// Serialized content
    pub content: serde_json::Value,
}

fn reject_envelope(payload: &dyn Payload, target: MessageFamily) -> Result<(), MessagingError> {
    match payload.envelope_family() {
        Some(found) => Err(MessagingError::InvalidPayload {
            name: short_type_name(payload.payload_type_name()).to_string(),
            found,
            target,
        }),
        None => Ok(()),
    }
}

fn downcast_payload<T: Payload>(payload: Box<dyn Any + Send + Sync>) -> Result<T, MessagingError> {
    payload
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| MessagingError::UnregisteredPayload(std::any::type_name::<T>().to_string()))
}

fn construct_domain<T>(
    payload: Box<dyn Any + Send + Sync>,
    metadata: Metadata,
) -> Result<Arc<dyn Message>, MessagingError>
where
    T: Payload + Serialize,
{
    let content = downcast_payload::<T>(payload)?;
    Ok(Arc::new(DomainMessage::wrap(content, metadata)))
}

fn construct_integration<T>(
    payload: Box<dyn Any + Send + Sync>,
    metadata: Metadata,
) -> Result<Arc<dyn Message>, MessagingError>
where
    T: Payload + Serialize,
{
    let content = downcast_payload::<T>(payload)?;
    Ok(Arc::new(IntegrationMessage::wrap(content, metadata)))
}

fn decode_content<T: DeserializeOwned>(wire: &WireEnvelope) -> Result<T, MessagingError> {
    serde_json::from_value(wire.content.clone())
        .map_err(|e| MessagingError::Codec(format!("{}: {e}", wire.name)))
}

fn decode_domain<T>(wire: WireEnvelope) -> Result<Arc<dyn Message>, MessagingError>
where
    T: Payload + Serialize + DeserializeOwned,
{
    let content = decode_content::<T>(&wire)?;
    Ok(Arc::new(DomainMessage::from_parts(
        wire.message_id,
        wire.name,
        content,
        wire.metadata,
    )))
}

fn decode_integration<T>(wire: WireEnvelope) -> Result<Arc<dyn Message>, MessagingError>
where
    T: Payload + Serialize + DeserializeOwned,
{
    let content = decode_content::<T>(&wire)?;
    Ok(Arc::new(IntegrationMessage::from_parts(
        wire.message_id,
        wire.name,
        content,
        wire.metadata,
    )))
}
