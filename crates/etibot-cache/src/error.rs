//! Error types for the etibot-cache crate.
//!
//! Every mutating container operation passes through a requirement gate
//! first. Each failing requirement maps to one [`ContainerError`] variant so
//! callers can tell a read-only property from one that is temporarily
//! locked, orphaned, or forbidden.

/// Reasons a container mutation was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContainerError {
    /// The container was marked read-only.
    #[error("property `{property}` is read-only")]
    ReadOnly {
        /// Name of the container property.
        property: &'static str,
    },

    /// The owning entity is mid network update and not accepting local edits.
    #[error("property `{property}` is locked while its owner is being updated")]
    PropertyLocked {
        /// Name of the container property.
        property: &'static str,
    },

    /// The owning entity was removed server-side.
    #[error("the owner of `{property}` has been deleted")]
    Deleted {
        /// Name of the container property.
        property: &'static str,
    },

    /// The owning entity's guild is in an outage.
    #[error("the owner of `{property}` is unavailable")]
    Unavailable {
        /// Name of the container property.
        property: &'static str,
    },

    /// A caller-supplied requirement (usually a permission check) failed.
    #[error("insufficient permission to edit `{property}`: {reason}")]
    InsufficientPermission {
        /// Name of the container property.
        property: &'static str,
        /// Explanation produced by the requirement.
        reason: String,
    },
}
