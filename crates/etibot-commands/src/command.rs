//! The command trait and what a command sees when it runs.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use etibot_cache::Member;
use etibot_types::Snowflake;

use crate::error::CommandError;
use crate::permission::PermissionLevel;
use crate::registry::CommandRegistry;
use crate::response::CommandResponse;

/// Shared handle to a registered command.
pub type CommandRef = Arc<dyn Command>;

/// Where a command was typed and by whom.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// The invoking user.
    pub user_id: Snowflake,
    /// Guild the message was posted in, `None` for direct messages.
    pub guild_id: Option<Snowflake>,
    /// Channel the message was posted in.
    pub channel_id: Snowflake,
    /// The invoking user's guild member, when cached.
    pub member: Option<Arc<Member>>,
}

/// One resolved call handed to [`Command::execute`].
pub struct Invocation<'a> {
    /// Where the command was typed.
    pub context: &'a CommandContext,
    /// Tokens left after the command path.
    pub args: &'a [String],
    /// Space-separated path that was resolved, e.g. `warn force`.
    pub path: &'a str,
    /// The invoking user's resolved level.
    pub level: PermissionLevel,
    /// Every command visible to the marshaller.
    pub registry: &'a CommandRegistry,
}

impl Invocation<'_> {
    /// Argument at `index`, or an [`CommandError::InvalidArgument`] naming
    /// what was expected there.
    pub fn arg(&self, index: usize, what: &str) -> Result<&str, CommandError> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| CommandError::invalid(format!("missing {what}")))
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("context", self.context)
            .field("args", &self.args)
            .field("path", &self.path)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// A text command.
///
/// Names and aliases match exactly. A command may own sub-commands; the
/// marshaller descends into them while the next argument names one.
#[async_trait]
pub trait Command: Send + Sync {
    /// Primary name.
    fn name(&self) -> &str;

    /// Alternative names.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// One-line description for help output.
    fn description(&self) -> &str;

    /// Argument syntax for help output, e.g. `<user> [reason]`.
    fn syntax(&self) -> &str {
        ""
    }

    /// Lowest level allowed to run this command.
    fn required_level(&self) -> PermissionLevel {
        PermissionLevel::StandardUser
    }

    /// Nested commands.
    fn subcommands(&self) -> &[CommandRef] {
        &[]
    }

    /// Whether a successful run opens a multi-step flow that blocks the
    /// user's other commands until it is ended.
    fn is_progressive(&self) -> bool {
        false
    }

    /// Run the command.
    async fn execute(&self, call: &Invocation<'_>) -> Result<CommandResponse, CommandError>;

    /// Whether `word` is this command's name or one of its aliases.
    fn answers_to(&self, word: &str) -> bool {
        self.name() == word || self.aliases().contains(&word)
    }
}

impl fmt::Debug for dyn Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name())
            .field("required_level", &self.required_level())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Test command that answers with its own path and arguments.
    pub(crate) struct Fixed {
        name: &'static str,
        aliases: Vec<&'static str>,
        level: PermissionLevel,
        subcommands: Vec<CommandRef>,
        progressive: bool,
    }

    impl Fixed {
        pub(crate) fn new(name: &'static str, level: PermissionLevel) -> Self {
            Self {
                name,
                aliases: Vec::new(),
                level,
                subcommands: Vec::new(),
                progressive: false,
            }
        }

        pub(crate) fn with_aliases(mut self, aliases: &[&'static str]) -> Self {
            self.aliases = aliases.to_vec();
            self
        }

        pub(crate) fn with_subcommands(mut self, subcommands: Vec<CommandRef>) -> Self {
            self.subcommands = subcommands;
            self
        }

        pub(crate) const fn progressive(mut self) -> Self {
            self.progressive = true;
            self
        }

        pub(crate) fn into_ref(self) -> CommandRef {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl Command for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn aliases(&self) -> &[&str] {
            &self.aliases
        }

        fn description(&self) -> &str {
            "test command"
        }

        fn required_level(&self) -> PermissionLevel {
            self.level
        }

        fn subcommands(&self) -> &[CommandRef] {
            &self.subcommands
        }

        fn is_progressive(&self) -> bool {
            self.progressive
        }

        async fn execute(&self, call: &Invocation<'_>) -> Result<CommandResponse, CommandError> {
            Ok(CommandResponse::success(call.path, call.args.join(",")))
        }
    }

    #[test]
    fn answers_to_name_and_aliases_exactly() {
        let command = Fixed::new("warn", PermissionLevel::Moderator).with_aliases(&["w"]);
        assert!(command.answers_to("warn"));
        assert!(command.answers_to("w"));
        assert!(!command.answers_to("Warn"));
        assert!(!command.answers_to("wa"));
    }

    #[test]
    fn missing_argument_names_what_was_expected() {
        let context = CommandContext {
            user_id: Snowflake::new(1),
            guild_id: None,
            channel_id: Snowflake::new(2),
            member: None,
        };
        let registry = CommandRegistry::new();
        let args = vec!["only".to_owned()];
        let call = Invocation {
            context: &context,
            args: &args,
            path: "warn",
            level: PermissionLevel::StandardUser,
            registry: &registry,
        };
        assert_eq!(call.arg(0, "user").unwrap(), "only");
        let err = call.arg(1, "reason").unwrap_err();
        assert!(matches!(err, CommandError::InvalidArgument { ref reason } if reason == "missing reason"));
    }
}
