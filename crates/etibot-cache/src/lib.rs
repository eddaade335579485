//! In-memory entity cache for the EtiBot gateway client.
//!
//! Remote objects (guilds, roles, channels, members, users) are held as
//! shared `Arc`s keyed by [`Snowflake`](etibot_types::Snowflake). Local
//! edits to collection-valued properties go through an
//! [`EntityContainer`], which refuses edits its owner cannot currently
//! accept and keeps the pre-image needed to build an upstream update.
//!
//! # Modules
//!
//! - [`sync_map`] -- [`SyncMap`], a mutex-guarded `HashMap`.
//! - [`entity`] -- The [`Entity`] and [`ContainerOwner`] traits and the
//!   shared lifecycle flags.
//! - [`change`] -- Pending change records and pre-image diffs.
//! - [`container`] -- [`EntityContainer`] and its requirement gate.
//! - [`model`] -- The cached gateway entities.
//! - [`store`] -- [`EntityCache`], the session-wide guild and user index.
//! - [`error`] -- [`ContainerError`].

pub mod change;
pub mod container;
pub mod entity;
pub mod error;
pub mod model;
pub mod store;
pub mod sync_map;

pub use change::{ChangeKind, ChangeRecord, ContainerDiff, LastChange};
pub use container::{EntityContainer, Requirement};
pub use entity::{ContainerOwner, Entity, EntityState};
pub use error::ContainerError;
pub use model::{
    Channel, ChannelData, Guild, GuildData, Member, Role, RoleData, RoleEdit, User, UserData,
};
pub use store::EntityCache;
pub use sync_map::SyncMap;
