//! Change records produced by container edits.
//!
//! A container keeps at most one pending [`ChangeRecord`]. It is created by
//! the first local edit after the last flush and holds a shallow pre-image
//! of the container (the `Arc`s, not clones of the entities) so the owner
//! can compute what to send upstream. Further edits before the record is
//! consumed only widen its [`LastChange`] descriptor to [`LastChange::Bulk`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use etibot_types::Snowflake;

/// Direction of a single-item change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// An entity was added.
    Added,
    /// An entity was removed.
    Removed,
}

/// What changed since the owner last consumed the record.
pub enum LastChange<E> {
    /// Nothing is pending.
    None,
    /// Exactly one entity was added or removed.
    Single {
        /// Whether it was added or removed.
        kind: ChangeKind,
        /// The entity in question.
        item: Arc<E>,
    },
    /// More than one edit happened; no specific item.
    Bulk,
}

impl<E> LastChange<E> {
    /// Whether this is [`LastChange::Bulk`].
    pub const fn is_bulk(&self) -> bool {
        matches!(self, Self::Bulk)
    }

    /// Whether nothing is pending.
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl<E> Clone for LastChange<E> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Single { kind, item } => Self::Single {
                kind: *kind,
                item: Arc::clone(item),
            },
            Self::Bulk => Self::Bulk,
        }
    }
}

impl<E> fmt::Debug for LastChange<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Single { kind, .. } => f.debug_struct("Single").field("kind", kind).finish(),
            Self::Bulk => f.write_str("Bulk"),
        }
    }
}

/// Pending edit of one container: its pre-image and a change descriptor.
pub struct ChangeRecord<E> {
    before: HashMap<Snowflake, Arc<E>>,
    last: LastChange<E>,
}

impl<E> ChangeRecord<E> {
    pub(crate) fn new(before: HashMap<Snowflake, Arc<E>>, last: LastChange<E>) -> Self {
        Self { before, last }
    }

    /// Collapse the descriptor after another uncommitted edit.
    pub(crate) fn widen(&mut self) {
        self.last = LastChange::Bulk;
    }

    /// The container contents before the first pending edit.
    pub const fn before(&self) -> &HashMap<Snowflake, Arc<E>> {
        &self.before
    }

    /// Ids present before the first pending edit.
    pub fn before_ids(&self) -> BTreeSet<Snowflake> {
        self.before.keys().copied().collect()
    }

    /// The change descriptor.
    pub const fn last(&self) -> &LastChange<E> {
        &self.last
    }

    /// Compare the pre-image against the current ids.
    pub fn diff(&self, current: impl IntoIterator<Item = Snowflake>) -> ContainerDiff {
        let before = self.before_ids();
        let after: BTreeSet<Snowflake> = current.into_iter().collect();
        ContainerDiff {
            added: after.difference(&before).copied().collect(),
            removed: before.difference(&after).copied().collect(),
        }
    }
}

impl<E> fmt::Debug for ChangeRecord<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeRecord")
            .field("before", &self.before_ids())
            .field("last", &self.last)
            .finish()
    }
}

/// Ids added and removed relative to a pre-image, in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDiff {
    /// Ids present now but not before.
    pub added: Vec<Snowflake>,
    /// Ids present before but not now.
    pub removed: Vec<Snowflake>,
}

impl ContainerDiff {
    /// Whether the container ended up unchanged.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}
