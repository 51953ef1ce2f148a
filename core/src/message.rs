//! Envelope model: the untyped [`Message`] view and the typed
//! [`DomainMessage`] / [`IntegrationMessage`] envelopes.
//!
//! # Families
//!
//! Both families share the same structure. They exist so a transport can route
//! them to different logical queues:
//!
//! - **Domain** messages stay inside a bounded context
//! - **Integration** messages cross service boundaries
//!
//! # Type identity
//!
//! Dispatch is keyed by the envelope's exact [`TypeId`]. A handler registered for
//! `DomainMessage<OrderPlaced>` is never offered a `DomainMessage<OrderCancelled>`
//! or an `IntegrationMessage<OrderPlaced>`.

use crate::error::MessagingError;
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt;

/// Logical family an envelope belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFamily {
    /// In-process / bounded-context events
    Domain,
    /// Cross-service events
    Integration,
}

impl MessageFamily {
    /// Both families, in a stable order.
    pub const ALL: [Self; 2] = [Self::Domain, Self::Integration];

    /// Lowercase name used in logs, metrics labels and URLs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Integration => "integration",
        }
    }

    /// Parse a family from its lowercase name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "domain" => Some(Self::Domain),
            "integration" => Some(Self::Integration),
            _ => None,
        }
    }
}

impl fmt::Display for MessageFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downcasting support for trait objects.
///
/// Blanket-implemented for every `'static + Send + Sync` type, so payload types
/// only need to implement [`Payload`]. Smart pointers are covered by the blanket
/// impl too: call `as_any` on `&dyn Message` / `&dyn Payload`, never on an
/// `Arc` or `Box` directly.
pub trait AsAny: Any + Send + Sync {
    /// Borrow as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Convert a boxed value into `Box<dyn Any>`.
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

/// A value that can be carried as envelope content.
///
/// ```
/// use courier_core::message::Payload;
///
/// #[derive(Debug, Clone)]
/// struct OrderPlaced {
///     id: u64,
/// }
///
/// impl Payload for OrderPlaced {}
/// ```
pub trait Payload: AsAny + fmt::Debug {
    /// The family this value belongs to if it is itself an envelope.
    ///
    /// Only envelope types override this. The mapper uses it to refuse
    /// double-wrapping a message that was received from the bus.
    fn envelope_family(&self) -> Option<MessageFamily> {
        None
    }

    /// [`TypeId`] of the concrete payload type.
    fn payload_type_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    /// Fully qualified name of the concrete payload type.
    fn payload_type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Untyped view of an envelope.
///
/// This is what transports, the dispatcher and the external publisher see.
/// The concrete envelope is recovered with `downcast_ref`.
pub trait Message: AsAny + fmt::Debug {
    /// Globally unique message identifier, generated at mapping time.
    fn message_id(&self) -> &str;

    /// Short type name of the content (e.g. `"OrderPlaced"`).
    fn name(&self) -> &str;

    /// Family this envelope belongs to.
    fn family(&self) -> MessageFamily;

    /// Correlation id and creation time.
    fn metadata(&self) -> &Metadata;

    /// [`TypeId`] of the concrete envelope type, e.g. `DomainMessage<OrderPlaced>`.
    fn envelope_type_id(&self) -> TypeId;

    /// [`TypeId`] of the content type.
    fn content_type_id(&self) -> TypeId;

    /// Content serialized as JSON, for transports that need a wire form.
    ///
    /// # Errors
    ///
    /// Returns [`MessagingError::Codec`] if the content cannot be serialized.
    fn content_json(&self) -> Result<serde_json::Value, MessagingError>;
}

impl dyn Message {
    /// Downcast to a concrete envelope type.
    #[must_use]
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

/// Short, unqualified name of a type: `my_app::events::OrderPlaced` becomes
/// `OrderPlaced`. Generic arguments are dropped.
#[must_use]
pub fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

macro_rules! envelope {
    ($(#[$doc:meta])* $envelope:ident, $family:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $envelope<T> {
            message_id: String,
            name: String,
            content: T,
            metadata: Metadata,
        }

        impl<T: Payload> $envelope<T> {
            /// Assemble an envelope from already-known parts.
            ///
            /// Used by transports that rehydrate envelopes from their wire form.
            /// New envelopes should be created through the mapper so the message
            /// id is fresh and double-wrapping is rejected.
            #[must_use]
            pub fn from_parts(
                message_id: impl Into<String>,
                name: impl Into<String>,
                content: T,
                metadata: Metadata,
            ) -> Self {
                Self {
                    message_id: message_id.into(),
                    name: name.into(),
                    content,
                    metadata,
                }
            }

            pub(crate) fn wrap(content: T, metadata: Metadata) -> Self {
                Self {
                    message_id: uuid::Uuid::new_v4().to_string(),
                    name: short_type_name(std::any::type_name::<T>()).to_string(),
                    content,
                    metadata,
                }
            }

            /// The wrapped payload.
            #[must_use]
            pub const fn content(&self) -> &T {
                &self.content
            }

            /// Consume the envelope and return its payload.
            #[must_use]
            pub fn into_content(self) -> T {
                self.content
            }

            /// Message identifier.
            #[must_use]
            pub fn message_id(&self) -> &str {
                &self.message_id
            }

            /// Content type name.
            #[must_use]
            pub fn name(&self) -> &str {
                &self.name
            }

            /// Envelope metadata.
            #[must_use]
            pub const fn metadata(&self) -> &Metadata {
                &self.metadata
            }
        }

        impl<T: Payload> Payload for $envelope<T> {
            fn envelope_family(&self) -> Option<MessageFamily> {
                Some($family)
            }
        }

        impl<T: Payload + Serialize> Message for $envelope<T> {
            fn message_id(&self) -> &str {
                &self.message_id
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn family(&self) -> MessageFamily {
                $family
            }

            fn metadata(&self) -> &Metadata {
                &self.metadata
            }

            fn envelope_type_id(&self) -> TypeId {
                TypeId::of::<Self>()
            }

            fn content_type_id(&self) -> TypeId {
                TypeId::of::<T>()
            }

            fn content_json(&self) -> Result<serde_json::Value, MessagingError> {
                serde_json::to_value(&self.content)
                    .map_err(|e| MessagingError::Codec(format!("{}: {e}", self.name)))
            }
        }
    };
}

envelope!(
    /// Envelope for in-process / bounded-context events.
    DomainMessage,
    MessageFamily::Domain
);

envelope!(
    /// Envelope for cross-service events.
    IntegrationMessage,
    MessageFamily::Integration
);

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        id: u64,
    }

    impl Payload for OrderPlaced {}

    fn metadata() -> Metadata {
        Metadata::from_parts("corr-1", Utc::now())
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("my_app::events::OrderPlaced"), "OrderPlaced");
        assert_eq!(short_type_name("OrderPlaced"), "OrderPlaced");
        assert_eq!(
            short_type_name("courier_core::message::DomainMessage<app::OrderPlaced>"),
            "DomainMessage"
        );
    }

    #[test]
    fn test_wrap_sets_name_and_fresh_id() {
        let first = DomainMessage::wrap(OrderPlaced { id: 1 }, metadata());
        let second = DomainMessage::wrap(OrderPlaced { id: 1 }, metadata());

        assert_eq!(first.name(), "OrderPlaced");
        assert!(!first.message_id().is_empty());
        assert_ne!(first.message_id(), second.message_id());
    }

    #[test]
    fn test_envelopes_report_their_family() {
        let domain = DomainMessage::wrap(OrderPlaced { id: 1 }, metadata());
        let integration = IntegrationMessage::wrap(OrderPlaced { id: 1 }, metadata());

        assert_eq!(Message::family(&domain), MessageFamily::Domain);
        assert_eq!(Message::family(&integration), MessageFamily::Integration);
        assert_eq!(domain.envelope_family(), Some(MessageFamily::Domain));
        assert_eq!(OrderPlaced { id: 1 }.envelope_family(), None);
    }

    #[test]
    fn test_type_identity_differs_between_families() {
        let domain: Box<dyn Message> = Box::new(DomainMessage::wrap(OrderPlaced { id: 1 }, metadata()));
        let integration: Box<dyn Message> =
            Box::new(IntegrationMessage::wrap(OrderPlaced { id: 1 }, metadata()));

        assert_ne!(domain.envelope_type_id(), integration.envelope_type_id());
        assert_eq!(domain.envelope_type_id(), TypeId::of::<DomainMessage<OrderPlaced>>());
        assert_eq!(domain.content_type_id(), integration.content_type_id());
        assert!(domain.downcast_ref::<DomainMessage<OrderPlaced>>().is_some());
        assert!(domain.downcast_ref::<IntegrationMessage<OrderPlaced>>().is_none());
    }

    #[test]
    fn test_content_json() {
        let envelope = IntegrationMessage::wrap(OrderPlaced { id: 42 }, metadata());
        let json = envelope.content_json();
        assert_eq!(json, Ok(serde_json::json!({ "id": 42 })));
    }

    #[test]
    fn test_family_parse() {
        assert_eq!(MessageFamily::parse("Domain"), Some(MessageFamily::Domain));
        assert_eq!(MessageFamily::parse("integration"), Some(MessageFamily::Integration));
        assert_eq!(MessageFamily::parse("other"), None);
    }
}
