//! The top-level cache of everything the gateway has told us about.

use std::sync::Arc;

use etibot_types::Snowflake;
use tracing::debug;

use crate::entity::Entity;
use crate::model::{Guild, User, UserData};
use crate::sync_map::SyncMap;

/// Guilds and users known to this session.
///
/// Users are shared between guilds: the same [`User`] backs every
/// [`Member`](crate::Member) of that account.
#[derive(Debug, Default)]
pub struct EntityCache {
    guilds: SyncMap<Snowflake, Arc<Guild>>,
    users: SyncMap<Snowflake, Arc<User>>,
}

impl EntityCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a guild.
    pub fn guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        self.guilds.try_get(&id)
    }

    /// Every cached guild, ascending by id.
    pub fn guilds(&self) -> Vec<Arc<Guild>> {
        let mut guilds = self.guilds.values();
        guilds.sort_by_key(|guild| guild.id());
        guilds
    }

    /// Number of cached guilds.
    pub fn guild_count(&self) -> usize {
        self.guilds.len()
    }

    /// Store a guild, replacing any previous instance with the same id.
    ///
    /// The replaced instance is flagged deleted so stale handles refuse
    /// edits.
    pub fn insert_guild(&self, guild: Arc<Guild>) {
        let id = guild.id();
        if let Some(previous) = self.guilds.insert(id, guild) {
            previous.state().mark_deleted();
            debug!(guild_id = %id, "replaced cached guild");
        }
    }

    /// Drop a guild the session has left.
    pub fn remove_guild(&self, id: Snowflake) -> Option<Arc<Guild>> {
        let guild = self.guilds.remove(&id)?;
        guild.state().mark_deleted();
        Some(guild)
    }

    /// Look up a user.
    pub fn user(&self, id: Snowflake) -> Option<Arc<User>> {
        self.users.try_get(&id)
    }

    /// Refresh a user in place, creating it if unknown.
    pub fn upsert_user(&self, id: Snowflake, data: UserData) -> Arc<User> {
        self.users.with_lock(|users| {
            if let Some(user) = users.get(&id) {
                user.update(data);
                return Arc::clone(user);
            }
            let user = User::new(id, data);
            users.insert(id, Arc::clone(&user));
            user
        })
    }

    /// Number of cached users.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    /// Forget everything, as after a full session reset.
    pub fn clear(&self) {
        for guild in self.guilds.values() {
            guild.state().mark_deleted();
        }
        self.guilds.clear();
        self.users.clear();
    }
}
