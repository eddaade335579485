//! Error types for the etibot-gateway crate.
//!
//! [`GatewayError`] covers everything that can go wrong while handling one
//! inbound payload. None of these tear the client down; the read loop logs
//! them and moves on to the next frame.

use etibot_cache::ContainerError;

use crate::heartbeat::HeartbeatError;
use crate::signal::SignalError;

/// Failure while handling a gateway payload.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The payload is malformed or has the wrong opcode for the operation.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with it.
        reason: String,
    },

    /// No event type is registered under the wire name.
    #[error("no event registered for `{wire_name}`")]
    NotFound {
        /// The unmatched wire event name.
        wire_name: String,
    },

    /// The data body did not match the registered event type.
    #[error("failed to decode `{wire_name}` payload: {source}")]
    Payload {
        /// The wire event name being decoded.
        wire_name: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },

    /// A cache edit was refused.
    #[error("cache error: {source}")]
    Container {
        /// The underlying container error.
        #[from]
        source: ContainerError,
    },

    /// The heartbeat monitor could not be started.
    #[error("heartbeat error: {source}")]
    Heartbeat {
        /// The underlying heartbeat error.
        #[from]
        source: HeartbeatError,
    },

    /// A signal subscriber failed while an event was being delivered.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying signal error.
        #[from]
        source: SignalError,
    },

    /// The outbound payload queue has no receiver.
    #[error("outbound payload channel closed")]
    ChannelClosed,
}

impl GatewayError {
    /// Shorthand for [`GatewayError::InvalidArgument`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}
