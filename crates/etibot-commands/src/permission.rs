//! Permission levels, level resolution and the hierarchy check.
//!
//! Levels are totally ordered; a user may run a command when their
//! resolved level is at least the command's required level. Sub-commands
//! are expected never to require less than their parent chain; the
//! [`verify_hierarchy`] walk reports every place where they do.

use std::collections::HashMap;
use std::fmt;

use etibot_cache::Entity;
use etibot_types::Snowflake;
use serde::{Deserialize, Serialize};

use crate::command::{CommandContext, CommandRef};
use crate::registry::CommandRegistry;

/// How much a user is trusted, lowest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// Anyone.
    #[default]
    StandardUser,
    /// Server moderators.
    Moderator,
    /// Server administrators and owners.
    Administrator,
    /// Bot operators, across every server.
    Operator,
    /// Bot developers.
    BotDeveloper,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StandardUser => "Standard User",
            Self::Moderator => "Moderator",
            Self::Administrator => "Administrator",
            Self::Operator => "Operator",
            Self::BotDeveloper => "Bot Developer",
        })
    }
}

/// Resolves the level of the user behind a command invocation.
pub trait PermissionResolver: Send + Sync {
    /// The invoking user's level in the invocation's context.
    fn level_of(&self, context: &CommandContext) -> PermissionLevel;
}

/// Table-driven resolver: explicit per-user levels, levels granted by
/// guild roles, and a fixed level for guild owners.
///
/// The resolved level is the highest of everything that applies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticPermissions {
    /// Levels granted to specific users everywhere.
    #[serde(default)]
    pub users: HashMap<Snowflake, PermissionLevel>,

    /// Levels granted by holding a role.
    #[serde(default)]
    pub roles: HashMap<Snowflake, PermissionLevel>,

    /// Level granted to the owner of the guild the command runs in.
    #[serde(default = "default_owner_level")]
    pub owner_level: PermissionLevel,
}

impl StaticPermissions {
    /// Empty table: everyone is a standard user, owners are administrators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `level` to a user everywhere.
    #[must_use]
    pub fn with_user(mut self, user: Snowflake, level: PermissionLevel) -> Self {
        self.users.insert(user, level);
        self
    }

    /// Grant `level` to holders of a role.
    #[must_use]
    pub fn with_role(mut self, role: Snowflake, level: PermissionLevel) -> Self {
        self.roles.insert(role, level);
        self
    }
}

impl PermissionResolver for StaticPermissions {
    fn level_of(&self, context: &CommandContext) -> PermissionLevel {
        let mut level = self
            .users
            .get(&context.user_id)
            .copied()
            .unwrap_or_default();
        if let Some(member) = &context.member {
            let from_roles = member
                .roles()
                .to_id_list()
                .iter()
                .filter_map(|role| self.roles.get(role).copied())
                .max()
                .unwrap_or_default();
            level = level.max(from_roles);
            let is_owner = member
                .guild()
                .and_then(|guild| guild.owner_id())
                .is_some_and(|owner| owner == member.id());
            if is_owner {
                level = level.max(self.owner_level);
            }
        }
        level
    }
}

impl Default for StaticPermissions {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            roles: HashMap::new(),
            owner_level: default_owner_level(),
        }
    }
}

const fn default_owner_level() -> PermissionLevel {
    PermissionLevel::Administrator
}

/// A sub-command that requires less than the chain above it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyViolation {
    /// Space-separated command path, e.g. `warn force`.
    pub path: String,
    /// The level the sub-command declares.
    pub declared: PermissionLevel,
    /// The level inherited from its parents.
    pub inherited: PermissionLevel,
}

impl fmt::Display for HierarchyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` requires {} but its parent requires {}",
            self.path, self.declared, self.inherited
        )
    }
}

/// Walk every registered command tree and report each sub-command whose
/// required level is lower than the effective level of its parent chain.
pub fn verify_hierarchy(registry: &CommandRegistry) -> Vec<HierarchyViolation> {
    let mut violations = Vec::new();
    for command in registry.all() {
        let level = command.required_level();
        walk(command, command.name().to_owned(), level, &mut violations);
    }
    violations
}

fn walk(
    command: &CommandRef,
    path: String,
    inherited: PermissionLevel,
    out: &mut Vec<HierarchyViolation>,
) {
    for sub in command.subcommands() {
        let sub_path = format!("{path} {}", sub.name());
        let declared = sub.required_level();
        if declared < inherited {
            out.push(HierarchyViolation {
                path: sub_path.clone(),
                declared,
                inherited,
            });
        }
        walk(sub, sub_path, inherited.max(declared), out);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use etibot_cache::{Guild, GuildData, Member, Role, RoleData, User, UserData};

    use super::*;
    use crate::command::tests::Fixed;

    #[test]
    fn levels_are_ordered() {
        use PermissionLevel::{Administrator, BotDeveloper, Moderator, Operator, StandardUser};
        let mut levels = vec![BotDeveloper, StandardUser, Operator, Moderator, Administrator];
        levels.sort();
        assert_eq!(
            levels,
            vec![StandardUser, Moderator, Administrator, Operator, BotDeveloper]
        );
    }

    #[test]
    fn levels_deserialize_snake_case() {
        let level: PermissionLevel = serde_json::from_str("\"bot_developer\"").unwrap();
        assert_eq!(level, PermissionLevel::BotDeveloper);
    }

    #[test]
    fn permission_table_deserializes_with_defaults() {
        let table: StaticPermissions =
            serde_json::from_str(r#"{"users": {"3": "operator"}}"#).unwrap();
        assert_eq!(
            table.users.get(&Snowflake::new(3)),
            Some(&PermissionLevel::Operator)
        );
        assert!(table.roles.is_empty());
        assert_eq!(table.owner_level, PermissionLevel::Administrator);
        assert_eq!(StaticPermissions::new(), table_without_users(table));
    }

    fn table_without_users(mut table: StaticPermissions) -> StaticPermissions {
        table.users.clear();
        table
    }

    #[test]
    fn resolver_takes_highest_grant() {
        let guild = Guild::new(
            Snowflake::new(100),
            GuildData {
                name: "g".to_owned(),
                owner_id: Some(Snowflake::new(1)),
            },
            false,
        );
        let mods = Role::new(Snowflake::new(200), RoleData::default());
        guild.roles().set_to([Arc::clone(&mods)]);

        let helper = Member::new(
            User::new(Snowflake::new(2), UserData::default()),
            &guild,
            None,
        );
        helper.roles().set_to([mods]);
        let owner = Member::new(
            User::new(Snowflake::new(1), UserData::default()),
            &guild,
            None,
        );

        let permissions = StaticPermissions::new()
            .with_role(Snowflake::new(200), PermissionLevel::Moderator)
            .with_user(Snowflake::new(3), PermissionLevel::BotDeveloper);

        let ctx = |user: u64, member: Option<Arc<Member>>| CommandContext {
            user_id: Snowflake::new(user),
            guild_id: Some(Snowflake::new(100)),
            channel_id: Snowflake::new(400),
            member,
        };
        assert_eq!(
            permissions.level_of(&ctx(2, Some(helper))),
            PermissionLevel::Moderator
        );
        assert_eq!(
            permissions.level_of(&ctx(1, Some(owner))),
            PermissionLevel::Administrator
        );
        assert_eq!(
            permissions.level_of(&ctx(3, None)),
            PermissionLevel::BotDeveloper
        );
        assert_eq!(
            permissions.level_of(&ctx(4, None)),
            PermissionLevel::StandardUser
        );
    }

    #[test]
    fn hierarchy_walk_reports_every_weaker_subcommand() {
        let tree = Fixed::new("config", PermissionLevel::Administrator).with_subcommands(vec![
            Fixed::new("show", PermissionLevel::Moderator).into_ref(),
            Fixed::new("set", PermissionLevel::Administrator)
                .with_subcommands(vec![Fixed::new("force", PermissionLevel::StandardUser).into_ref()])
                .into_ref(),
        ]);
        let registry = CommandRegistry::new()
            .with_global(tree.into_ref())
            .with_global(Fixed::new("ping", PermissionLevel::StandardUser).into_ref());

        let violations = verify_hierarchy(&registry);
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(paths, vec!["config show", "config set force"]);
        assert_eq!(violations[1].inherited, PermissionLevel::Administrator);
    }
}
