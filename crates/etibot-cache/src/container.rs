//! Snowflake-keyed cache of remote entities with edit gating and change
//! tracking.
//!
//! An [`EntityContainer`] backs one collection-valued property of an owning
//! entity (a guild's roles, a member's roles, ...). Local edits pass a
//! requirement gate, capture a shallow pre-image and update the pending
//! [`ChangeRecord`] under the same lock as the mutation itself, so concurrent
//! editors can never interleave a pre-image with someone else's write.
//!
//! # Requirement gate
//!
//! Checked in this order before every local edit:
//!
//! 1. [`ContainerError::ReadOnly`] -- the container is marked read-only.
//! 2. [`ContainerError::PropertyLocked`] -- the owner is mid network update.
//! 3. [`ContainerError::Deleted`] -- the owner was removed (or dropped).
//! 4. [`ContainerError::Unavailable`] -- the owner's guild is in an outage.
//! 5. [`ContainerError::InsufficientPermission`] -- the extra requirement
//!    supplied at construction refused the edit.
//!
//! [`EntityContainer::set_to`] skips the gate entirely: it lands server
//! state, which must always be accepted.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use etibot_types::Snowflake;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::change::{ChangeKind, ChangeRecord, LastChange};
use crate::entity::{ContainerOwner, Entity};
use crate::error::ContainerError;
use crate::sync_map::SyncMap;

/// Extra edit requirement; returns the refusal reason on failure.
pub type Requirement = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A cache of entities keyed by id, owned by one property of one entity.
pub struct EntityContainer<E: Entity> {
    property: &'static str,
    entries: SyncMap<Snowflake, Arc<E>>,
    pending: Mutex<Option<ChangeRecord<E>>>,
    read_only: AtomicBool,
    delete_on_remove: bool,
    owner: Option<Weak<dyn ContainerOwner>>,
    requirement: Option<Requirement>,
}

impl<E: Entity> EntityContainer<E> {
    /// Create an unowned, writable container that flags removed entities as
    /// deleted.
    pub fn new(property: &'static str) -> Self {
        Self {
            property,
            entries: SyncMap::new(),
            pending: Mutex::new(None),
            read_only: AtomicBool::new(false),
            delete_on_remove: true,
            owner: None,
            requirement: None,
        }
    }

    /// Attach the owning entity consulted by the requirement gate.
    #[must_use]
    pub fn owned_by(mut self, owner: Weak<dyn ContainerOwner>) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Start out read-only.
    #[must_use]
    pub fn read_only(self) -> Self {
        self.read_only.store(true, Ordering::Release);
        self
    }

    /// Do not flag entities as deleted when they leave this container.
    ///
    /// Used for containers that reference entities owned elsewhere, such as
    /// the roles assigned to a member.
    #[must_use]
    pub fn retain_on_remove(mut self) -> Self {
        self.delete_on_remove = false;
        self
    }

    /// Add an extra requirement checked after the built-in ones.
    #[must_use]
    pub fn with_requirement(
        mut self,
        requirement: impl Fn() -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.requirement = Some(Arc::new(requirement));
        self
    }

    /// Name of the property this container backs.
    pub const fn property(&self) -> &'static str {
        self.property
    }

    /// Toggle the read-only flag.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
    }

    /// Whether the container refuses local edits unconditionally.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Run the requirement gate without editing anything.
    ///
    /// # Errors
    ///
    /// Returns the first failing requirement, in the order listed in the
    /// module documentation.
    pub fn check_requirements(&self) -> Result<(), ContainerError> {
        let property = self.property;
        if self.is_read_only() {
            return Err(ContainerError::ReadOnly { property });
        }
        if let Some(weak) = &self.owner {
            let Some(owner) = weak.upgrade() else {
                return Err(ContainerError::Deleted { property });
            };
            if owner.is_locked() {
                return Err(ContainerError::PropertyLocked { property });
            }
            if owner.is_deleted() {
                return Err(ContainerError::Deleted { property });
            }
            if owner.is_unavailable() {
                return Err(ContainerError::Unavailable { property });
            }
        }
        if let Some(requirement) = &self.requirement {
            requirement().map_err(|reason| ContainerError::InsufficientPermission {
                property,
                reason,
            })?;
        }
        Ok(())
    }

    /// Add an entity. Returns `false` (and records nothing) when an entity
    /// with the same id is already present.
    ///
    /// # Errors
    ///
    /// Fails when the requirement gate refuses the edit.
    pub fn add(&self, entity: Arc<E>) -> Result<bool, ContainerError> {
        self.check_requirements()?;
        let id = entity.id();
        let added = self.entries.with_lock(|map| {
            if map.contains_key(&id) {
                return false;
            }
            let before = map.clone();
            map.insert(id, Arc::clone(&entity));
            self.record(
                before,
                LastChange::Single {
                    kind: ChangeKind::Added,
                    item: entity,
                },
            );
            true
        });
        if added {
            trace!(property = self.property, %id, "entity added");
            self.notify_owner();
        }
        Ok(added)
    }

    /// Remove an entity by identity.
    ///
    /// # Errors
    ///
    /// Fails when the requirement gate refuses the edit.
    pub fn remove(&self, entity: &E) -> Result<Option<Arc<E>>, ContainerError> {
        self.remove_id(entity.id())
    }

    /// Remove an entity by id, flagging it deleted unless the container was
    /// built with [`retain_on_remove`](Self::retain_on_remove).
    ///
    /// # Errors
    ///
    /// Fails when the requirement gate refuses the edit.
    pub fn remove_id(&self, id: Snowflake) -> Result<Option<Arc<E>>, ContainerError> {
        self.check_requirements()?;
        let removed = self.entries.with_lock(|map| {
            if !map.contains_key(&id) {
                return None;
            }
            let before = map.clone();
            let removed = map.remove(&id)?;
            self.record(
                before,
                LastChange::Single {
                    kind: ChangeKind::Removed,
                    item: Arc::clone(&removed),
                },
            );
            Some(removed)
        });
        if let Some(entity) = &removed {
            self.tombstone(entity);
            trace!(property = self.property, %id, "entity removed");
            self.notify_owner();
        }
        Ok(removed)
    }

    /// Remove every entity. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Fails when the requirement gate refuses the edit.
    pub fn clear(&self) -> Result<usize, ContainerError> {
        self.clear_where(|_| true)
    }

    /// Remove every entity matching `predicate`. Returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Fails when the requirement gate refuses the edit.
    pub fn clear_where(&self, predicate: impl Fn(&E) -> bool) -> Result<usize, ContainerError> {
        self.check_requirements()?;
        let removed = self.entries.with_lock(|map| {
            let ids: Vec<Snowflake> = map
                .iter()
                .filter(|(_, entity)| predicate(entity.as_ref()))
                .map(|(id, _)| *id)
                .collect();
            if ids.is_empty() {
                return Vec::new();
            }
            let before = map.clone();
            let removed: Vec<Arc<E>> = ids.iter().filter_map(|id| map.remove(id)).collect();
            let last = match removed.as_slice() {
                [only] => LastChange::Single {
                    kind: ChangeKind::Removed,
                    item: Arc::clone(only),
                },
                _ => LastChange::Bulk,
            };
            self.record(before, last);
            removed
        });
        for entity in &removed {
            self.tombstone(entity);
        }
        if !removed.is_empty() {
            debug!(property = self.property, count = removed.len(), "entities cleared");
            self.notify_owner();
        }
        Ok(removed.len())
    }

    /// Replace the contents with server-authoritative state.
    ///
    /// Bypasses the requirement gate and records no change. Entities that
    /// disappear are flagged deleted unless the container retains on remove.
    pub fn set_to(&self, entities: impl IntoIterator<Item = Arc<E>>) {
        let incoming: HashMap<Snowflake, Arc<E>> =
            entities.into_iter().map(|e| (e.id(), e)).collect();
        let dropped: Vec<Arc<E>> = self.entries.with_lock(|map| {
            let old = std::mem::replace(map, incoming);
            old.into_iter()
                .filter(|(id, _)| !map.contains_key(id))
                .map(|(_, entity)| entity)
                .collect()
        });
        for entity in &dropped {
            self.tombstone(entity);
        }
        trace!(
            property = self.property,
            dropped = dropped.len(),
            "container replaced from server state"
        );
    }

    /// Land one server-pushed entity, replacing any entry with the same id.
    ///
    /// Like [`set_to`](Self::set_to) this skips the gate and records no
    /// change. A replaced entry that is a different instance is flagged
    /// deleted.
    pub fn insert_from_server(&self, entity: Arc<E>) -> Option<Arc<E>> {
        let id = entity.id();
        let previous = self.entries.insert(id, Arc::clone(&entity));
        if let Some(old) = previous.as_ref().filter(|old| !Arc::ptr_eq(old, &entity)) {
            self.tombstone(old);
        }
        trace!(property = self.property, %id, "entity landed from server");
        previous
    }

    /// Drop one entity the server reports as gone, bypassing the gate.
    pub fn remove_from_server(&self, id: Snowflake) -> Option<Arc<E>> {
        let removed = self.entries.remove(&id)?;
        self.tombstone(&removed);
        trace!(property = self.property, %id, "entity removed by server");
        Some(removed)
    }

    /// Whether this exact entity's id is present.
    pub fn contains(&self, entity: &E) -> bool {
        self.contains_id(entity.id())
    }

    /// Whether an id is present.
    pub fn contains_id(&self, id: Snowflake) -> bool {
        self.entries.contains_key(&id)
    }

    /// Whether any entity matches `predicate`.
    pub fn contains_where(&self, predicate: impl Fn(&E) -> bool) -> bool {
        self.entries
            .with_lock(|map| map.values().any(|entity| predicate(entity.as_ref())))
    }

    /// Look up an entity by id.
    pub fn get(&self, id: Snowflake) -> Option<Arc<E>> {
        self.entries.try_get(&id)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the container is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All ids, ascending.
    pub fn to_id_list(&self) -> Vec<Snowflake> {
        self.to_id_list_where(|_| true)
    }

    /// Ids of entities matching `predicate`, ascending.
    pub fn to_id_list_where(&self, predicate: impl Fn(&E) -> bool) -> Vec<Snowflake> {
        let mut ids: Vec<Snowflake> = self.entries.with_lock(|map| {
            map.iter()
                .filter(|(_, entity)| predicate(entity.as_ref()))
                .map(|(id, _)| *id)
                .collect()
        });
        ids.sort_unstable();
        ids
    }

    /// All entities, ascending by id.
    pub fn to_list(&self) -> Vec<Arc<E>> {
        self.to_list_where(|_| true)
    }

    /// Entities matching `predicate`, ascending by id.
    pub fn to_list_where(&self, predicate: impl Fn(&E) -> bool) -> Vec<Arc<E>> {
        let mut list: Vec<Arc<E>> = self.entries.with_lock(|map| {
            map.values()
                .filter(|entity| predicate(entity.as_ref()))
                .cloned()
                .collect()
        });
        list.sort_unstable_by_key(|entity| entity.id());
        list
    }

    /// The current change descriptor.
    pub fn last_change(&self) -> LastChange<E> {
        self.pending
            .lock()
            .as_ref()
            .map_or(LastChange::None, |record| record.last().clone())
    }

    /// Whether a local edit is waiting to be consumed.
    pub fn has_pending_change(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Consume the pending change record, resetting the descriptor.
    pub fn take_change(&self) -> Option<ChangeRecord<E>> {
        self.pending.lock().take()
    }

    /// Record an edit; called with the entries lock held.
    fn record(&self, before: HashMap<Snowflake, Arc<E>>, last: LastChange<E>) {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(record) => record.widen(),
            None => *pending = Some(ChangeRecord::new(before, last)),
        }
    }

    fn tombstone(&self, entity: &E) {
        if self.delete_on_remove {
            entity.state().mark_deleted();
        }
    }

    fn notify_owner(&self) {
        if let Some(owner) = self.owner.as_ref().and_then(Weak::upgrade) {
            owner.property_changed(self.property);
        }
    }
}

impl<E: Entity + Ord> EntityContainer<E> {
    /// The greatest entity by its natural order.
    pub fn highest(&self) -> Option<Arc<E>> {
        self.entries
            .values()
            .into_iter()
            .max_by(|a, b| a.as_ref().cmp(b.as_ref()))
    }
}

impl<E: Entity> fmt::Debug for EntityContainer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityContainer")
            .field("property", &self.property)
            .field("ids", &self.to_id_list())
            .field("read_only", &self.is_read_only())
            .field("delete_on_remove", &self.delete_on_remove)
            .field("pending", &self.has_pending_change())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;
    use crate::entity::EntityState;

    #[derive(Debug)]
    struct Item {
        id: Snowflake,
        rank: i32,
        state: EntityState,
    }

    impl Item {
        fn new(id: u64, rank: i32) -> Arc<Self> {
            Arc::new(Self {
                id: Snowflake::new(id),
                rank,
                state: EntityState::new(),
            })
        }
    }

    impl Entity for Item {
        fn id(&self) -> Snowflake {
            self.id
        }
        fn state(&self) -> &EntityState {
            &self.state
        }
    }

    impl PartialEq for Item {
        fn eq(&self, other: &Self) -> bool {
            self.cmp(other) == std::cmp::Ordering::Equal
        }
    }
    impl Eq for Item {}
    impl PartialOrd for Item {
        fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for Item {
        fn cmp(&self, other: &Self) -> std::cmp::Ordering {
            (self.rank, self.id).cmp(&(other.rank, other.id))
        }
    }

    #[derive(Default)]
    struct Owner {
        locked: AtomicBool,
        deleted: AtomicBool,
        unavailable: AtomicBool,
        changes: parking_lot::Mutex<Vec<&'static str>>,
    }

    impl ContainerOwner for Owner {
        fn is_locked(&self) -> bool {
            self.locked.load(Ordering::Acquire)
        }
        fn is_deleted(&self) -> bool {
            self.deleted.load(Ordering::Acquire)
        }
        fn is_unavailable(&self) -> bool {
            self.unavailable.load(Ordering::Acquire)
        }
        fn property_changed(&self, property: &'static str) {
            self.changes.lock().push(property);
        }
    }

    fn owned(owner: &Arc<Owner>) -> EntityContainer<Item> {
        let weak: Weak<dyn ContainerOwner> = Arc::downgrade(owner) as Weak<dyn ContainerOwner>;
        EntityContainer::new("items").owned_by(weak)
    }

    #[test]
    fn add_then_remove_tombstones_entity() {
        let container = EntityContainer::new("items");
        let item = Item::new(1, 0);
        assert!(container.add(Arc::clone(&item)).unwrap());
        assert!(container.contains_id(item.id));
        container.remove(&item).unwrap();
        assert!(!container.contains_id(item.id));
        assert!(item.is_deleted());
    }

    #[test]
    fn retain_on_remove_keeps_entity_alive() {
        let container = EntityContainer::new("items").retain_on_remove();
        let item = Item::new(1, 0);
        container.add(Arc::clone(&item)).unwrap();
        container.remove_id(item.id).unwrap();
        assert!(!container.contains(&item));
        assert!(!item.is_deleted());
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let container = EntityContainer::new("items");
        assert!(container.add(Item::new(1, 0)).unwrap());
        container.take_change();
        assert!(!container.add(Item::new(1, 5)).unwrap());
        assert_eq!(container.len(), 1);
        assert!(container.last_change().is_none());
    }

    #[test]
    fn single_change_then_bulk() {
        let container = EntityContainer::new("items");
        let first = Item::new(1, 0);
        container.add(Arc::clone(&first)).unwrap();
        match container.last_change() {
            LastChange::Single { kind, item } => {
                assert_eq!(kind, ChangeKind::Added);
                assert_eq!(item.id, first.id);
            }
            other => panic!("expected single change, got {other:?}"),
        }

        container.add(Item::new(2, 0)).unwrap();
        assert!(container.last_change().is_bulk());

        let record = container.take_change().unwrap();
        // The pre-image is from before the first uncommitted edit.
        assert!(record.before().is_empty());
        let diff = record.diff(container.to_id_list());
        assert_eq!(diff.added, vec![Snowflake::new(1), Snowflake::new(2)]);
        assert!(diff.removed.is_empty());

        assert!(container.last_change().is_none());
        assert!(!container.has_pending_change());
    }

    #[test]
    fn clear_classifies_by_count() {
        let container = EntityContainer::new("items");
        container.set_to([Item::new(1, 0), Item::new(2, 0), Item::new(3, 1)]);
        assert!(!container.has_pending_change());

        assert_eq!(container.clear_where(|item| item.rank == 1).unwrap(), 1);
        assert!(matches!(
            container.last_change(),
            LastChange::Single {
                kind: ChangeKind::Removed,
                ..
            }
        ));
        container.take_change();

        assert_eq!(container.clear().unwrap(), 2);
        assert!(container.last_change().is_bulk());
        assert!(container.is_empty());

        container.take_change();
        assert_eq!(container.clear().unwrap(), 0);
        assert!(!container.has_pending_change());
    }

    #[test]
    fn read_only_rejects_edits_but_accepts_server_state() {
        let container = EntityContainer::new("items").read_only();
        assert_eq!(
            container.add(Item::new(1, 0)),
            Err(ContainerError::ReadOnly { property: "items" })
        );
        container.set_to([Item::new(1, 0)]);
        assert_eq!(container.len(), 1);
        assert!(container.remove_id(Snowflake::new(1)).is_err());

        container.set_read_only(false);
        assert!(container.remove_id(Snowflake::new(1)).unwrap().is_some());
    }

    #[test]
    fn gate_follows_owner_state_in_order() {
        let owner = Arc::new(Owner::default());
        let container = owned(&owner);

        owner.unavailable.store(true, Ordering::Release);
        owner.deleted.store(true, Ordering::Release);
        owner.locked.store(true, Ordering::Release);
        assert_eq!(
            container.add(Item::new(1, 0)),
            Err(ContainerError::PropertyLocked { property: "items" })
        );
        owner.locked.store(false, Ordering::Release);
        assert_eq!(
            container.add(Item::new(1, 0)),
            Err(ContainerError::Deleted { property: "items" })
        );
        owner.deleted.store(false, Ordering::Release);
        assert_eq!(
            container.add(Item::new(1, 0)),
            Err(ContainerError::Unavailable { property: "items" })
        );
        owner.unavailable.store(false, Ordering::Release);
        assert!(container.add(Item::new(1, 0)).unwrap());
        assert_eq!(*owner.changes.lock(), vec!["items"]);
    }

    #[test]
    fn dropped_owner_counts_as_deleted() {
        let owner = Arc::new(Owner::default());
        let container = owned(&owner);
        drop(owner);
        assert_eq!(
            container.add(Item::new(1, 0)),
            Err(ContainerError::Deleted { property: "items" })
        );
    }

    #[test]
    fn extra_requirement_reports_reason() {
        let allowed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&allowed);
        let container = EntityContainer::new("items").with_requirement(move || {
            if flag.load(Ordering::Acquire) {
                Ok(())
            } else {
                Err("missing Manage Roles".to_owned())
            }
        });
        assert_eq!(
            container.add(Item::new(1, 0)),
            Err(ContainerError::InsufficientPermission {
                property: "items",
                reason: "missing Manage Roles".to_owned(),
            })
        );
        allowed.store(true, Ordering::Release);
        assert!(container.add(Item::new(1, 0)).unwrap());
    }

    #[test]
    fn set_to_tombstones_dropped_entities() {
        let container = EntityContainer::new("items");
        let keep = Item::new(1, 0);
        let gone = Item::new(2, 0);
        container.set_to([Arc::clone(&keep), Arc::clone(&gone)]);
        container.set_to([Arc::clone(&keep), Item::new(3, 0)]);
        assert!(gone.is_deleted());
        assert!(!keep.is_deleted());
        assert_eq!(
            container.to_id_list(),
            vec![Snowflake::new(1), Snowflake::new(3)]
        );
    }

    #[test]
    fn server_single_edits_bypass_gate() {
        let container = EntityContainer::new("items").read_only();
        let old = Item::new(1, 0);
        assert!(container.insert_from_server(Arc::clone(&old)).is_none());
        assert!(container.insert_from_server(Arc::clone(&old)).is_some());
        assert!(!old.is_deleted());

        container.insert_from_server(Item::new(1, 4));
        assert!(old.is_deleted());
        assert_eq!(container.get(Snowflake::new(1)).unwrap().rank, 4);

        let removed = container.remove_from_server(Snowflake::new(1)).unwrap();
        assert!(removed.is_deleted());
        assert!(container.remove_from_server(Snowflake::new(1)).is_none());
        assert!(!container.has_pending_change());
    }

    #[test]
    fn queries_and_highest() {
        let container = EntityContainer::new("items");
        container.set_to([Item::new(5, 2), Item::new(3, 9), Item::new(8, 2)]);
        assert_eq!(container.highest().unwrap().id, Snowflake::new(3));
        assert_eq!(
            container.to_id_list_where(|item| item.rank == 2),
            vec![Snowflake::new(5), Snowflake::new(8)]
        );
        let list = container.to_list();
        assert_eq!(list.len(), 3);
        assert_eq!(list.first().unwrap().id, Snowflake::new(3));
        assert!(container.contains_where(|item| item.rank == 9));
        assert!(!container.contains_where(|item| item.rank == 1));
        assert_eq!(container.to_list_where(|item| item.rank > 5).len(), 1);
        assert!(EntityContainer::<Item>::new("empty").highest().is_none());
    }

    #[test]
    fn concurrent_edits_keep_count_consistent() {
        let container: Arc<EntityContainer<Item>> = Arc::new(EntityContainer::new("items"));
        let handles: Vec<_> = (0..8_u64)
            .map(|t| {
                let container = Arc::clone(&container);
                thread::spawn(move || {
                    for i in 0..200_u64 {
                        container.add(Item::new(t * 10_000 + i, 0)).unwrap();
                    }
                    for i in (0..200_u64).filter(|i| i % 4 == 0) {
                        container
                            .remove_id(Snowflake::new(t * 10_000 + i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(container.len(), 8 * 150);
        assert_eq!(container.to_id_list().len(), container.len());
        assert!(container.last_change().is_bulk());
        let record = container.take_change().unwrap();
        assert!(record.before().is_empty());
    }
}
