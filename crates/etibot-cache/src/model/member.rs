//! Cached guild members.
//!
//! A member wraps a shared [`User`] and owns its own role container. Role
//! edits made locally are gathered through the container's change record
//! and drained with [`Member::take_role_edit`], which yields the request
//! body for the upstream member update.

use std::sync::{Arc, Weak};

use etibot_types::Snowflake;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::trace;

use crate::change::ContainerDiff;
use crate::container::EntityContainer;
use crate::entity::{ContainerOwner, Entity, EntityState};
use crate::model::{Guild, Role, User};

/// A user's membership in one guild.
#[derive(Debug)]
pub struct Member {
    user: Arc<User>,
    guild: Weak<Guild>,
    nick: RwLock<Option<String>>,
    roles: EntityContainer<Role>,
    state: EntityState,
}

impl Member {
    /// Create a shared member of `guild`.
    ///
    /// Roles are held by the guild; removing one from a member does not
    /// tombstone it.
    pub fn new(user: Arc<User>, guild: &Arc<Guild>, nick: Option<String>) -> Arc<Self> {
        let guild = Arc::downgrade(guild);
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let owner: Weak<dyn ContainerOwner> = weak.clone();
            Self {
                user,
                guild,
                nick: RwLock::new(nick),
                roles: EntityContainer::new("roles")
                    .owned_by(owner)
                    .retain_on_remove(),
                state: EntityState::new(),
            }
        })
    }

    /// The underlying account.
    pub const fn user(&self) -> &Arc<User> {
        &self.user
    }

    /// The guild, if it is still cached.
    pub fn guild(&self) -> Option<Arc<Guild>> {
        self.guild.upgrade()
    }

    /// Guild nickname.
    pub fn nick(&self) -> Option<String> {
        self.nick.read().clone()
    }

    /// Replace the guild nickname.
    pub fn set_nick(&self, nick: Option<String>) {
        *self.nick.write() = nick;
    }

    /// Nickname, falling back to the user's display name.
    pub fn display_name(&self) -> String {
        self.nick().unwrap_or_else(|| self.user.display_name())
    }

    /// The member's roles.
    pub const fn roles(&self) -> &EntityContainer<Role> {
        &self.roles
    }

    /// The member's top role by hierarchy.
    pub fn highest_role(&self) -> Option<Arc<Role>> {
        self.roles.highest()
    }

    /// Refuse local edits while an outbound member update is in flight.
    pub fn begin_update(&self) {
        self.state.set_locked(true);
    }

    /// Accept local edits again.
    pub fn end_update(&self) {
        self.state.set_locked(false);
    }

    /// Drain pending role edits into an upstream update.
    ///
    /// Returns `None` when nothing is pending or the edits cancelled out.
    pub fn take_role_edit(&self) -> Option<RoleEdit> {
        let record = self.roles.take_change()?;
        let roles = self.roles.to_id_list();
        let diff = record.diff(roles.iter().copied());
        if diff.is_empty() {
            return None;
        }
        Some(RoleEdit {
            member: self.user.id(),
            roles,
            diff,
        })
    }
}

impl Entity for Member {
    fn id(&self) -> Snowflake {
        self.user.id()
    }

    fn state(&self) -> &EntityState {
        &self.state
    }
}

impl ContainerOwner for Member {
    fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    fn is_deleted(&self) -> bool {
        self.state.is_deleted()
            || self
                .guild
                .upgrade()
                .is_none_or(|guild| guild.state().is_deleted())
    }

    fn is_unavailable(&self) -> bool {
        self.guild
            .upgrade()
            .is_some_and(|guild| guild.is_unavailable())
    }

    fn property_changed(&self, property: &'static str) {
        trace!(member_id = %self.user.id(), property, "member property edited");
    }
}

/// A drained set of member role edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleEdit {
    /// The member's user id.
    pub member: Snowflake,
    /// The full role list after the edits, ascending.
    pub roles: Vec<Snowflake>,
    /// What changed relative to before the first edit.
    pub diff: ContainerDiff,
}

impl RoleEdit {
    /// JSON body for a member update carrying the new role list.
    pub fn to_request_body(&self) -> Value {
        let roles: Vec<String> = self.roles.iter().map(ToString::to_string).collect();
        json!({ "roles": roles })
    }
}
