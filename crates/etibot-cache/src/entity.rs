//! Traits shared by every cached entity and every container owner.

use std::sync::atomic::{AtomicBool, Ordering};

use etibot_types::Snowflake;

/// Lifecycle flags carried by every cached entity.
///
/// `deleted` is a tombstone: once the server removes an entity it stays in
/// memory for whoever still holds an `Arc` to it, but is flagged so edits can
/// be refused. `locked` is set while an outbound update for the entity is in
/// flight.
#[derive(Debug, Default)]
pub struct EntityState {
    deleted: AtomicBool,
    locked: AtomicBool,
}

impl EntityState {
    /// Fresh, live, unlocked state.
    pub const fn new() -> Self {
        Self {
            deleted: AtomicBool::new(false),
            locked: AtomicBool::new(false),
        }
    }

    /// Whether the entity has been removed server-side.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Flag the entity as removed.
    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Whether local edits are currently refused.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Refuse or accept local edits.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::Release);
    }
}

/// A remote object held in an [`EntityContainer`](crate::EntityContainer).
pub trait Entity: Send + Sync + 'static {
    /// The entity's identifier.
    fn id(&self) -> Snowflake;

    /// The entity's lifecycle flags.
    fn state(&self) -> &EntityState;

    /// Whether the entity has been removed server-side.
    fn is_deleted(&self) -> bool {
        self.state().is_deleted()
    }
}

/// The entity a container belongs to, consulted before every local edit.
pub trait ContainerOwner: Send + Sync {
    /// The owner is mid network update and not accepting local edits.
    fn is_locked(&self) -> bool;

    /// The owner was removed server-side.
    fn is_deleted(&self) -> bool;

    /// The owner's parent aggregate is in an outage.
    fn is_unavailable(&self) -> bool {
        false
    }

    /// Called after a local edit changed one of the owner's containers.
    fn property_changed(&self, _property: &'static str) {}
}
