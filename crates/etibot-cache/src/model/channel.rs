//! Cached guild channels.

use std::sync::Arc;

use etibot_types::Snowflake;
use parking_lot::RwLock;

use crate::entity::{Entity, EntityState};

/// Mutable channel fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelData {
    /// Channel name.
    pub name: String,
    /// Raw channel type (0 = text, 2 = voice, 4 = category, ...).
    pub kind: u8,
    /// Sort position within the guild.
    pub position: i32,
    /// Channel topic.
    pub topic: Option<String>,
    /// ISO-8601 time of the most recent pin, as sent by the server.
    pub last_pin_timestamp: Option<String>,
}

/// A guild channel.
#[derive(Debug)]
pub struct Channel {
    id: Snowflake,
    data: RwLock<ChannelData>,
    state: EntityState,
}

impl Channel {
    /// Create a shared channel.
    pub fn new(id: Snowflake, data: ChannelData) -> Arc<Self> {
        Arc::new(Self {
            id,
            data: RwLock::new(data),
            state: EntityState::new(),
        })
    }

    /// Copy of the current fields.
    pub fn data(&self) -> ChannelData {
        self.data.read().clone()
    }

    /// Channel name.
    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    /// Overwrite the fields with server state, keeping the pin timestamp
    /// when the update does not carry one.
    pub fn update(&self, mut data: ChannelData) {
        let mut current = self.data.write();
        if data.last_pin_timestamp.is_none() {
            data.last_pin_timestamp = current.last_pin_timestamp.take();
        }
        *current = data;
    }

    /// Record a pin change.
    pub fn set_last_pin_timestamp(&self, timestamp: Option<String>) {
        self.data.write().last_pin_timestamp = timestamp;
    }
}

impl Entity for Channel {
    fn id(&self) -> Snowflake {
        self.id
    }

    fn state(&self) -> &EntityState {
        &self.state
    }
}
