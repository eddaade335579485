//! Text command handling for EtiBot.
//!
//! Messages that start with the configured prefix are tokenized, resolved
//! to a command (descending into sub-commands), checked against the
//! caller's permission level and rate limits, and executed.
//!
//! # Modules
//!
//! - [`command`] -- The [`Command`] trait, [`CommandContext`] and [`Invocation`].
//! - [`config`] -- [`CommandConfig`], prefix and rate-limit settings.
//! - [`error`] -- [`CommandError`].
//! - [`marshaller`] -- [`CommandMarshaller`], admission and dispatch.
//! - [`permission`] -- [`PermissionLevel`], resolvers and the hierarchy check.
//! - [`registry`] -- [`CommandRegistry`], global and guild-scoped commands.
//! - [`response`] -- [`CommandResponse`], structured replies.
//! - [`tokenizer`] -- Shell-style argument splitting.

pub mod command;
pub mod config;
pub mod error;
pub mod marshaller;
pub mod permission;
pub mod registry;
pub mod response;
pub mod tokenizer;

pub use command::{Command, CommandContext, CommandRef, Invocation};
pub use config::CommandConfig;
pub use error::CommandError;
pub use marshaller::{CommandMarshaller, Dispatch, UserPhase};
pub use permission::{
    HierarchyViolation, PermissionLevel, PermissionResolver, StaticPermissions, verify_hierarchy,
};
pub use registry::CommandRegistry;
pub use response::{CommandResponse, ResponseField};
pub use tokenizer::tokenize;
