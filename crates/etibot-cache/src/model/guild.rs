//! Cached guilds.
//!
//! A [`Guild`] is the aggregate root of the cache: it owns the role,
//! channel and member containers and is the authority for the outage
//! ("unavailable") state that gates edits on everything beneath it.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use etibot_types::Snowflake;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::container::EntityContainer;
use crate::entity::{ContainerOwner, Entity, EntityState};
use crate::model::{Channel, Member, Role};

/// Mutable guild fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildData {
    /// Guild name.
    pub name: String,
    /// Owner's user id.
    pub owner_id: Option<Snowflake>,
}

/// A guild and everything cached under it.
#[derive(Debug)]
pub struct Guild {
    id: Snowflake,
    data: RwLock<GuildData>,
    unavailable: AtomicBool,
    roles: EntityContainer<Role>,
    channels: EntityContainer<Channel>,
    members: EntityContainer<Member>,
    state: EntityState,
    changed: Mutex<BTreeSet<&'static str>>,
}

impl Guild {
    /// Create a shared guild with empty containers.
    pub fn new(id: Snowflake, data: GuildData, unavailable: bool) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let owner = || -> Weak<dyn ContainerOwner> { weak.clone() };
            Self {
                id,
                data: RwLock::new(data),
                unavailable: AtomicBool::new(unavailable),
                roles: EntityContainer::new("roles").owned_by(owner()),
                channels: EntityContainer::new("channels").owned_by(owner()),
                members: EntityContainer::new("members").owned_by(owner()),
                state: EntityState::new(),
                changed: Mutex::new(BTreeSet::new()),
            }
        })
    }

    /// Copy of the current fields.
    pub fn data(&self) -> GuildData {
        self.data.read().clone()
    }

    /// Guild name.
    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    /// Owner's user id.
    pub fn owner_id(&self) -> Option<Snowflake> {
        self.data.read().owner_id
    }

    /// Overwrite the fields with server state.
    pub fn update(&self, data: GuildData) {
        *self.data.write() = data;
    }

    /// Whether the guild is in an outage.
    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::Acquire)
    }

    /// Enter or leave an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    /// The guild's roles.
    pub const fn roles(&self) -> &EntityContainer<Role> {
        &self.roles
    }

    /// The guild's channels.
    pub const fn channels(&self) -> &EntityContainer<Channel> {
        &self.channels
    }

    /// The guild's cached members.
    pub const fn members(&self) -> &EntityContainer<Member> {
        &self.members
    }

    /// The `@everyone` role, which shares the guild's id.
    pub fn everyone_role(&self) -> Option<Arc<Role>> {
        self.roles.get(self.id)
    }

    /// Look up a cached member.
    pub fn member(&self, user_id: Snowflake) -> Option<Arc<Member>> {
        self.members.get(user_id)
    }

    /// Refuse local edits while an outbound guild update is in flight.
    pub fn begin_update(&self) {
        self.state.set_locked(true);
    }

    /// Accept local edits again.
    pub fn end_update(&self) {
        self.state.set_locked(false);
    }

    /// Drain the names of properties edited locally since the last call.
    pub fn take_changed_properties(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.changed.lock()).into_iter().collect()
    }
}

impl Entity for Guild {
    fn id(&self) -> Snowflake {
        self.id
    }

    fn state(&self) -> &EntityState {
        &self.state
    }
}

impl ContainerOwner for Guild {
    fn is_locked(&self) -> bool {
        self.state.is_locked()
    }

    fn is_deleted(&self) -> bool {
        self.state.is_deleted()
    }

    fn is_unavailable(&self) -> bool {
        Self::is_unavailable(self)
    }

    fn property_changed(&self, property: &'static str) {
        trace!(guild_id = %self.id, property, "guild property edited");
        self.changed.lock().insert(property);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ContainerError;
    use crate::model::{ChannelData, RoleData};

    fn guild() -> Arc<Guild> {
        Guild::new(
            Snowflake::new(100),
            GuildData {
                name: "Test".to_owned(),
                owner_id: Some(Snowflake::new(1)),
            },
            false,
        )
    }

    #[test]
    fn edits_are_reported_to_the_guild() {
        let g = guild();
        g.roles()
            .add(Role::new(Snowflake::new(5), RoleData::default()))
            .unwrap();
        g.channels()
            .add(Channel::new(Snowflake::new(6), ChannelData::default()))
            .unwrap();
        assert_eq!(g.take_changed_properties(), vec!["channels", "roles"]);
        assert!(g.take_changed_properties().is_empty());
    }

    #[test]
    fn outage_blocks_local_edits_only() {
        let g = guild();
        g.set_unavailable(true);
        let role = Role::new(Snowflake::new(5), RoleData::default());
        assert_eq!(
            g.roles().add(Arc::clone(&role)),
            Err(ContainerError::Unavailable { property: "roles" })
        );
        g.roles().set_to([role]);
        assert_eq!(g.roles().len(), 1);
    }

    #[test]
    fn update_lock_blocks_edits() {
        let g = guild();
        g.begin_update();
        assert_eq!(
            g.channels().clear(),
            Err(ContainerError::PropertyLocked {
                property: "channels"
            })
        );
        g.end_update();
        assert_eq!(g.channels().clear(), Ok(0));
    }

    #[test]
    fn everyone_role_shares_guild_id() {
        let g = guild();
        assert!(g.everyone_role().is_none());
        g.roles().set_to([Role::new(
            Snowflake::new(100),
            RoleData {
                name: "@everyone".to_owned(),
                ..RoleData::default()
            },
        )]);
        assert_eq!(g.everyone_role().unwrap().name(), "@everyone");
    }
}
