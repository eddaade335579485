//! Cached user accounts.

use std::sync::Arc;

use etibot_types::Snowflake;
use parking_lot::RwLock;

use crate::entity::{Entity, EntityState};

/// Mutable user fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserData {
    /// Account name.
    pub username: String,
    /// Display name, when set.
    pub global_name: Option<String>,
    /// Whether the account is a bot.
    pub bot: bool,
}

/// A user account.
#[derive(Debug)]
pub struct User {
    id: Snowflake,
    data: RwLock<UserData>,
    state: EntityState,
}

impl User {
    /// Create a shared user.
    pub fn new(id: Snowflake, data: UserData) -> Arc<Self> {
        Arc::new(Self {
            id,
            data: RwLock::new(data),
            state: EntityState::new(),
        })
    }

    /// Copy of the current fields.
    pub fn data(&self) -> UserData {
        self.data.read().clone()
    }

    /// Account name.
    pub fn username(&self) -> String {
        self.data.read().username.clone()
    }

    /// Display name, falling back to the account name.
    pub fn display_name(&self) -> String {
        let data = self.data.read();
        data.global_name
            .clone()
            .unwrap_or_else(|| data.username.clone())
    }

    /// Whether the account is a bot.
    pub fn is_bot(&self) -> bool {
        self.data.read().bot
    }

    /// Overwrite the fields with server state.
    pub fn update(&self, data: UserData) {
        *self.data.write() = data;
    }
}

impl Entity for User {
    fn id(&self) -> Snowflake {
        self.id
    }

    fn state(&self) -> &EntityState {
        &self.state
    }
}
