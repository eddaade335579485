//! Wire event name to event type dispatch table.
//!
//! Event types are registered explicitly with [`register_events!`], which
//! pairs each type with a decoding factory. The wire name is derived from
//! the type name by [`wire_name_for`]: the `Event` suffix is stripped and
//! the PascalCase remainder becomes `SCREAMING_SNAKE_CASE`, so
//! `ChannelPinsUpdateEvent` handles `CHANNEL_PINS_UPDATE`.
//!
//! The table is built once and is read-only afterwards. Misnamed or
//! duplicate registrations fail the build with a [`RegistryError`] rather
//! than surfacing as runtime misses.
//!
//! [`register_events!`]: crate::register_events

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use etibot_types::GatewayPayload;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::GatewayClient;
use crate::error::GatewayError;

/// Suffix every registered event type name must carry.
pub const EVENT_SUFFIX: &str = "Event";

/// A decoded dispatch event, ready to be applied to a client.
#[async_trait]
pub trait GatewayEvent: fmt::Debug + Send + Sync {
    /// Apply the event: update the cache and raise client signals.
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError>;
}

/// Decodes a dispatch data body into a boxed event.
pub type EventFactory = fn(Value) -> Result<Box<dyn GatewayEvent>, serde_json::Error>;

/// Errors raised while building an [`EventRegistry`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The type name does not end in `Event`, or is only the suffix.
    #[error("event type `{type_name}` must be named `<Name>Event`")]
    MissingSuffix {
        /// The offending type name.
        type_name: &'static str,
    },

    /// Two types derive the same wire name.
    #[error("wire name `{wire_name}` registered by both `{first}` and `{second}`")]
    Duplicate {
        /// The contested wire name.
        wire_name: String,
        /// The type registered first.
        first: &'static str,
        /// The type that collided with it.
        second: &'static str,
    },
}

/// One entry of the registration table.
#[derive(Clone, Copy)]
pub struct Registration {
    type_name: &'static str,
    factory: EventFactory,
}

impl Registration {
    /// Pair a type name with its factory.
    pub const fn new(type_name: &'static str, factory: EventFactory) -> Self {
        Self { type_name, factory }
    }
}

/// A registered event type.
#[derive(Clone)]
pub struct RegisteredEvent {
    type_name: &'static str,
    wire_name: String,
    factory: EventFactory,
}

impl RegisteredEvent {
    /// Rust type name the entry was registered under.
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Derived wire name.
    pub fn wire_name(&self) -> &str {
        &self.wire_name
    }

    /// Decode a data body into this event type.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the body does not match the type.
    pub fn decode(&self, data: Value) -> Result<Box<dyn GatewayEvent>, serde_json::Error> {
        (self.factory)(data)
    }
}

impl fmt::Debug for RegisteredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredEvent")
            .field("type_name", &self.type_name)
            .field("wire_name", &self.wire_name)
            .finish_non_exhaustive()
    }
}

/// Immutable table from wire event name to event type.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    events: HashMap<String, RegisteredEvent>,
}

impl EventRegistry {
    /// Build a table from explicit registrations.
    ///
    /// # Errors
    ///
    /// Fails on the first misnamed type or duplicate wire name.
    pub fn build(
        registrations: impl IntoIterator<Item = Registration>,
    ) -> Result<Self, RegistryError> {
        let mut events: HashMap<String, RegisteredEvent> = HashMap::new();
        for Registration { type_name, factory } in registrations {
            let wire_name = wire_name_for(type_name)?;
            if let Some(existing) = events.get(&wire_name) {
                return Err(RegistryError::Duplicate {
                    wire_name,
                    first: existing.type_name,
                    second: type_name,
                });
            }
            events.insert(
                wire_name.clone(),
                RegisteredEvent {
                    type_name,
                    wire_name,
                    factory,
                },
            );
        }
        debug!(count = events.len(), "event registry built");
        Ok(Self { events })
    }

    /// The built-in gateway events.
    ///
    /// # Errors
    ///
    /// Only fails if a built-in event type is misnamed.
    pub fn standard() -> Result<Self, RegistryError> {
        use crate::events::{
            ChannelCreateEvent, ChannelDeleteEvent, ChannelPinsUpdateEvent, ChannelUpdateEvent,
            GuildCreateEvent, GuildDeleteEvent, GuildMemberAddEvent, GuildMemberRemoveEvent,
            GuildMemberUpdateEvent, GuildRoleCreateEvent, GuildRoleDeleteEvent,
            GuildRoleUpdateEvent, GuildUpdateEvent, MessageCreateEvent, ReadyEvent, ResumedEvent,
        };

        crate::register_events![
            ReadyEvent,
            ResumedEvent,
            GuildCreateEvent,
            GuildUpdateEvent,
            GuildDeleteEvent,
            GuildRoleCreateEvent,
            GuildRoleUpdateEvent,
            GuildRoleDeleteEvent,
            GuildMemberAddEvent,
            GuildMemberUpdateEvent,
            GuildMemberRemoveEvent,
            ChannelCreateEvent,
            ChannelUpdateEvent,
            ChannelDeleteEvent,
            ChannelPinsUpdateEvent,
            MessageCreateEvent,
        ]
    }

    /// Find the type registered for a wire name.
    pub fn lookup(&self, wire_name: &str) -> Option<&RegisteredEvent> {
        self.events.get(wire_name)
    }

    /// Every registered wire name, sorted.
    pub fn wire_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.events.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Decode a dispatch payload into its registered event type.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::InvalidArgument`] if the payload is not a dispatch
    ///   frame or carries no event name.
    /// - [`GatewayError::NotFound`] if the name is not registered.
    /// - [`GatewayError::Payload`] if the body does not decode.
    pub fn instantiate_for(
        &self,
        payload: &GatewayPayload,
    ) -> Result<Box<dyn GatewayEvent>, GatewayError> {
        if !payload.is_dispatch() {
            return Err(GatewayError::invalid(format!(
                "opcode {:?} is not a dispatch",
                payload.op
            )));
        }
        let Some(wire_name) = payload.event_name() else {
            return Err(GatewayError::invalid("dispatch payload has no event name"));
        };
        let Some(event) = self.lookup(wire_name) else {
            return Err(GatewayError::NotFound {
                wire_name: wire_name.to_owned(),
            });
        };
        event
            .decode(payload.d.clone())
            .map_err(|source| GatewayError::Payload {
                wire_name: wire_name.to_owned(),
                source,
            })
    }
}

/// Derive the wire event name for an event type name.
///
/// # Errors
///
/// Returns [`RegistryError::MissingSuffix`] when `type_name` does not end
/// in `Event` or has nothing before it.
pub fn wire_name_for(type_name: &'static str) -> Result<String, RegistryError> {
    let stem = type_name
        .strip_suffix(EVENT_SUFFIX)
        .filter(|stem| !stem.is_empty())
        .ok_or(RegistryError::MissingSuffix { type_name })?;
    let mut wire = String::with_capacity(stem.len().saturating_mul(2));
    for (index, ch) in stem.chars().enumerate() {
        if index > 0 && ch.is_uppercase() {
            wire.push('_');
        }
        wire.extend(ch.to_uppercase());
    }
    Ok(wire)
}

/// Factory used by [`register_events!`](crate::register_events).
///
/// A `null` body decodes as an empty object so field-less events work.
///
/// # Errors
///
/// Returns the JSON error when the body does not match `E`.
pub fn decode<E>(data: Value) -> Result<Box<dyn GatewayEvent>, serde_json::Error>
where
    E: GatewayEvent + DeserializeOwned + 'static,
{
    let data = if data.is_null() {
        Value::Object(Map::new())
    } else {
        data
    };
    let event: E = serde_json::from_value(data)?;
    Ok(Box::new(event))
}

/// Build an [`EventRegistry`] from a list of event types.
///
/// Each type must implement [`GatewayEvent`] and `DeserializeOwned`, and be
/// named `<Name>Event`. Expands to a `Result<EventRegistry, RegistryError>`.
///
/// ```ignore
/// let registry = register_events![ReadyEvent, GuildCreateEvent]?;
/// ```
#[macro_export]
macro_rules! register_events {
    ($($event:ident),* $(,)?) => {
        $crate::registry::EventRegistry::build([
            $(
                $crate::registry::Registration::new(
                    stringify!($event),
                    $crate::registry::decode::<$event>,
                ),
            )*
        ])
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use etibot_types::OpCode;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct PingEvent {
        #[serde(default)]
        value: u32,
    }

    #[async_trait]
    impl GatewayEvent for PingEvent {
        async fn execute(&self, _client: &GatewayClient) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    #[derive(Debug, Deserialize)]
    struct Ping;

    #[async_trait]
    impl GatewayEvent for Ping {
        async fn execute(&self, _client: &GatewayClient) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    #[test]
    fn derives_screaming_snake_case() {
        assert_eq!(wire_name_for("GuildCreateEvent").unwrap(), "GUILD_CREATE");
        assert_eq!(
            wire_name_for("ChannelPinsUpdateEvent").unwrap(),
            "CHANNEL_PINS_UPDATE"
        );
        assert_eq!(wire_name_for("ReadyEvent").unwrap(), "READY");
    }

    #[test]
    fn missing_suffix_is_a_configuration_error() {
        assert_eq!(
            wire_name_for("GuildCreate"),
            Err(RegistryError::MissingSuffix {
                type_name: "GuildCreate"
            })
        );
        assert!(wire_name_for("Event").is_err());
        assert!(matches!(
            crate::register_events![Ping],
            Err(RegistryError::MissingSuffix { type_name: "Ping" })
        ));
    }

    #[test]
    fn duplicate_wire_names_are_rejected() {
        let result = EventRegistry::build([
            Registration::new("PingEvent", decode::<PingEvent>),
            Registration::new("PingEvent", decode::<PingEvent>),
        ]);
        assert!(matches!(result, Err(RegistryError::Duplicate { .. })));
    }

    #[test]
    fn standard_registry_resolves_builtins() {
        let registry = EventRegistry::standard().unwrap();
        assert_eq!(registry.len(), 16);
        assert_eq!(
            registry.lookup("GUILD_CREATE").unwrap().type_name(),
            "GuildCreateEvent"
        );
        assert_eq!(
            registry.lookup("CHANNEL_PINS_UPDATE").unwrap().type_name(),
            "ChannelPinsUpdateEvent"
        );
        assert!(registry.lookup("TYPING_START").is_none());
    }

    #[test]
    fn instantiate_checks_opcode_and_name() {
        let registry = crate::register_events![PingEvent].unwrap();

        let heartbeat = GatewayPayload::heartbeat(None);
        assert!(matches!(
            registry.instantiate_for(&heartbeat),
            Err(GatewayError::InvalidArgument { .. })
        ));

        let nameless = GatewayPayload {
            op: OpCode::Dispatch,
            d: json!({}),
            s: Some(1),
            t: None,
        };
        assert!(matches!(
            registry.instantiate_for(&nameless),
            Err(GatewayError::InvalidArgument { .. })
        ));

        let unknown = GatewayPayload::dispatch("TYPING_START", 2, json!({}));
        assert!(matches!(
            registry.instantiate_for(&unknown),
            Err(GatewayError::NotFound { wire_name }) if wire_name == "TYPING_START"
        ));

        let bad = GatewayPayload::dispatch("PING", 3, json!({ "value": "nope" }));
        assert!(matches!(
            registry.instantiate_for(&bad),
            Err(GatewayError::Payload { .. })
        ));

        let good = GatewayPayload::dispatch("PING", 4, json!({ "value": 5 }));
        let event = registry.instantiate_for(&good).unwrap();
        assert!(format!("{event:?}").contains("value: 5"));

        let empty = GatewayPayload::dispatch("PING", 5, serde_json::Value::Null);
        assert!(registry.instantiate_for(&empty).is_ok());
    }
}
