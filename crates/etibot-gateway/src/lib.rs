//! Gateway client core for EtiBot.
//!
//! This crate turns a stream of gateway frames into an up-to-date entity
//! cache and a set of typed signals application code can subscribe to. It
//! also watches connection liveness through heartbeat acknowledgement
//! timing.
//!
//! # Modules
//!
//! - [`client`] -- [`GatewayClient`], the opcode state machine.
//! - [`config`] -- [`GatewayConfig`], heartbeat timing and queue sizes.
//! - [`error`] -- [`GatewayError`].
//! - [`events`] -- The built-in dispatch events and their wire shapes.
//! - [`heartbeat`] -- [`HeartbeatMonitor`], the liveness monitor.
//! - [`registry`] -- [`EventRegistry`], wire name to event type dispatch,
//!   and the [`register_events!`] macro.
//! - [`signal`] -- [`Signal`], the ordered async broadcast primitive.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod registry;
pub mod signal;

pub use client::{ClientSignals, GatewayClient, ReadyInfo, ReconnectReason, SessionInfo};
pub use config::GatewayConfig;
pub use error::GatewayError;
pub use events::Message;
pub use heartbeat::{HeartbeatError, HeartbeatMonitor, HeartbeatPhase, HeartbeatTimeout};
pub use registry::{EventRegistry, GatewayEvent, RegisteredEvent, Registration, RegistryError};
pub use signal::{BoxError, Signal, SignalError, SubscriptionId};
