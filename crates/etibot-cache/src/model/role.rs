//! Cached guild roles.
//!
//! Roles are ordered by hierarchy position, ties broken by id (the older
//! role outranks the newer one), which is the order the client uses for
//! "highest role" checks.

use std::cmp::Ordering;
use std::sync::Arc;

use etibot_types::Snowflake;
use parking_lot::RwLock;

use crate::entity::{Entity, EntityState};

/// Mutable role fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleData {
    /// Role name.
    pub name: String,
    /// Hierarchy position; higher outranks lower.
    pub position: i32,
    /// RGB color, 0 for none.
    pub color: u32,
    /// Shown separately in the member list.
    pub hoist: bool,
    /// Can be mentioned by anyone.
    pub mentionable: bool,
}

/// A guild role.
#[derive(Debug)]
pub struct Role {
    id: Snowflake,
    data: RwLock<RoleData>,
    state: EntityState,
}

impl Role {
    /// Create a shared role.
    pub fn new(id: Snowflake, data: RoleData) -> Arc<Self> {
        Arc::new(Self {
            id,
            data: RwLock::new(data),
            state: EntityState::new(),
        })
    }

    /// Copy of the current fields.
    pub fn data(&self) -> RoleData {
        self.data.read().clone()
    }

    /// Role name.
    pub fn name(&self) -> String {
        self.data.read().name.clone()
    }

    /// Hierarchy position.
    pub fn position(&self) -> i32 {
        self.data.read().position
    }

    /// Overwrite the fields with server state.
    pub fn update(&self, data: RoleData) {
        *self.data.write() = data;
    }
}

impl Entity for Role {
    fn id(&self) -> Snowflake {
        self.id
    }

    fn state(&self) -> &EntityState {
        &self.state
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Role {}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> Ordering {
        // Read one lock at a time; comparing a role with itself must not
        // take the same read lock twice.
        let mine = self.position();
        let theirs = other.position();
        mine.cmp(&theirs).then_with(|| other.id.cmp(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: u64, position: i32) -> Arc<Role> {
        Role::new(
            Snowflake::new(id),
            RoleData {
                name: format!("role-{id}"),
                position,
                ..RoleData::default()
            },
        )
    }

    #[test]
    fn higher_position_wins() {
        assert!(role(1, 5) > role(2, 3));
    }

    #[test]
    fn older_role_ranks_higher_on_tie() {
        // Same position: the newer (larger id) role sorts below the older one.
        assert!(role(10, 1) > role(20, 1));
    }

    #[test]
    fn self_comparison_is_equal() {
        let r = role(1, 1);
        assert_eq!(r.cmp(&r), Ordering::Equal);
    }

    #[test]
    fn update_changes_order() {
        let a = role(1, 1);
        let b = role(2, 2);
        assert!(a < b);
        a.update(RoleData {
            name: "promoted".to_owned(),
            position: 3,
            ..RoleData::default()
        });
        assert!(a > b);
        assert_eq!(a.name(), "promoted");
    }
}
