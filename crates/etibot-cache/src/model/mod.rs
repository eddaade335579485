//! Cached gateway entities.
//!
//! Every model is shared as an `Arc` and uses interior mutability for the
//! fields the gateway updates in place, so a reference handed to
//! application code always observes the latest server state.
//!
//! # Submodules
//!
//! - [`guild`] -- [`Guild`], the aggregate owning roles, channels and members.
//! - [`member`] -- [`Member`], a user's membership with an editable role set.
//! - [`role`] -- [`Role`], ordered by hierarchy position.
//! - [`channel`] -- [`Channel`].
//! - [`user`] -- [`User`].

pub mod channel;
pub mod guild;
pub mod member;
pub mod role;
pub mod user;

pub use channel::{Channel, ChannelData};
pub use guild::{Guild, GuildData};
pub use member::{Member, RoleEdit};
pub use role::{Role, RoleData};
pub use user::{User, UserData};
