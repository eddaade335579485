//! Errors raised while resolving, admitting and running commands.

use thiserror::Error;

use crate::permission::{HierarchyViolation, PermissionLevel};

/// Errors from the command marshaller and from command bodies.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No command answers to the typed name.
    #[error("unknown command `{name}`")]
    NotFound {
        /// The name that was typed.
        name: String,
    },

    /// The user's level is below a command in the resolved chain.
    #[error("`{command}` requires {required}, caller is {actual}")]
    NotAuthorized {
        /// Path of the first command in the chain the user may not run.
        command: String,
        /// Level that command requires.
        required: PermissionLevel,
        /// The caller's level.
        actual: PermissionLevel,
    },

    /// The user is executing a command or is still cooling down.
    #[error("rate limited, retry in {retry_after_ms} ms")]
    RateLimited {
        /// Time until the user is admitted again.
        retry_after_ms: u64,
        /// Whether the user should be told; false once a notice was sent
        /// recently.
        notify: bool,
    },

    /// The user has an unfinished multi-step flow.
    #[error("a command flow is already in progress")]
    FlowInProgress,

    /// Malformed input or missing arguments.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong.
        reason: String,
    },

    /// Sub-commands require less than their parents.
    #[error("{} command hierarchy violation(s)", violations.len())]
    HierarchyViolation {
        /// Every offending sub-command.
        violations: Vec<HierarchyViolation>,
    },

    /// The command body failed.
    #[error("`{command}` failed: {reason}")]
    Execution {
        /// Command path.
        command: String,
        /// Failure description.
        reason: String,
    },
}

impl CommandError {
    /// Shorthand for [`CommandError::InvalidArgument`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Whether the caller should get a reply for this error.
    pub const fn should_reply(&self) -> bool {
        !matches!(self, Self::RateLimited { notify: false, .. })
    }
}
