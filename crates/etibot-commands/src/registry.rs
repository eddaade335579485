//! Global and guild-scoped command sets.
//!
//! The registry is built once and never changes afterwards. Lookups try
//! the commands scoped to the invoking guild first, then the global set.

use std::collections::HashMap;

use etibot_types::Snowflake;

use crate::command::CommandRef;

/// Immutable set of top-level commands.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    global: Vec<CommandRef>,
    scoped: HashMap<Snowflake, Vec<CommandRef>>,
}

impl CommandRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command available everywhere.
    #[must_use]
    pub fn with_global(mut self, command: CommandRef) -> Self {
        self.global.push(command);
        self
    }

    /// Add a command available only in one guild.
    #[must_use]
    pub fn with_scoped(mut self, guild: Snowflake, command: CommandRef) -> Self {
        self.scoped.entry(guild).or_default().push(command);
        self
    }

    /// Find the top-level command answering to `word`, preferring the
    /// guild's scoped commands over global ones.
    pub fn find(&self, guild: Option<Snowflake>, word: &str) -> Option<&CommandRef> {
        guild
            .and_then(|guild| self.scoped.get(&guild))
            .and_then(|commands| commands.iter().find(|c| c.answers_to(word)))
            .or_else(|| self.global.iter().find(|c| c.answers_to(word)))
    }

    /// Commands visible from `guild`: its scoped ones, then global ones not
    /// shadowed by a scoped command of the same name.
    pub fn visible_in(&self, guild: Option<Snowflake>) -> Vec<&CommandRef> {
        let scoped: &[CommandRef] = guild
            .and_then(|guild| self.scoped.get(&guild))
            .map_or(&[][..], Vec::as_slice);
        let shadowed = |command: &CommandRef| scoped.iter().any(|s| s.name() == command.name());
        scoped
            .iter()
            .chain(self.global.iter().filter(|&c| !shadowed(c)))
            .collect()
    }

    /// Every registered top-level command, global first.
    pub fn all(&self) -> impl Iterator<Item = &CommandRef> {
        self.global.iter().chain(self.scoped.values().flatten())
    }

    /// Total number of top-level registrations.
    pub fn len(&self) -> usize {
        self.all().count()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::command::tests::Fixed;
    use crate::permission::PermissionLevel;

    fn registry() -> CommandRegistry {
        CommandRegistry::new()
            .with_global(Fixed::new("ping", PermissionLevel::StandardUser).into_ref())
            .with_global(
                Fixed::new("warn", PermissionLevel::Moderator)
                    .with_aliases(&["w"])
                    .into_ref(),
            )
            .with_scoped(
                Snowflake::new(100),
                Fixed::new("ping", PermissionLevel::Moderator).into_ref(),
            )
    }

    #[test]
    fn scoped_commands_shadow_global_ones() {
        let registry = registry();
        let here = registry.find(Some(Snowflake::new(100)), "ping").unwrap();
        assert_eq!(here.required_level(), PermissionLevel::Moderator);
        let elsewhere = registry.find(Some(Snowflake::new(101)), "ping").unwrap();
        assert_eq!(elsewhere.required_level(), PermissionLevel::StandardUser);
        let dm = registry.find(None, "ping").unwrap();
        assert_eq!(dm.required_level(), PermissionLevel::StandardUser);
    }

    #[test]
    fn aliases_resolve_and_unknown_names_miss() {
        let registry = registry();
        assert_eq!(registry.find(None, "w").unwrap().name(), "warn");
        assert!(registry.find(None, "kick").is_none());
    }

    #[test]
    fn visible_commands_are_deduplicated() {
        let registry = registry();
        let names: Vec<&str> = registry
            .visible_in(Some(Snowflake::new(100)))
            .into_iter()
            .map(|c| c.name())
            .collect();
        assert_eq!(names, vec!["ping", "warn"]);
        assert_eq!(registry.visible_in(None).len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn len_counts_global_and_scoped_registrations() {
        assert!(CommandRegistry::new().is_empty());
        let registry = registry().with_scoped(
            Snowflake::new(101),
            Fixed::new("ping", PermissionLevel::Administrator).into_ref(),
        );
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.all().count(), registry.len());
    }
}
