//! Shared wire-level types for EtiBot.
//!
//! # Modules
//!
//! - [`snowflake`] -- The 64-bit time-ordered identifier used as the key of
//!   every remote entity, plus mention extraction.
//! - [`payload`] -- The gateway frame envelope and opcodes.

pub mod payload;
pub mod snowflake;

pub use payload::{GatewayPayload, OpCode, UnknownOpCode};
pub use snowflake::{
    DISCORD_EPOCH_MS, EPOCH_FLOOR, MentionKind, ParseSnowflakeError, Snowflake, SnowflakeParts,
};
