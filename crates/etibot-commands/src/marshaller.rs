//! Command marshaller.
//!
//! [`CommandMarshaller`] turns raw message text into command executions:
//!
//! 1. Strip the configured prefix and tokenize the rest.
//! 2. Resolve the first token against the guild's scoped commands, then
//!    the global ones, and descend into sub-commands while the next token
//!    names one. Unknown commands fail here and never count as attempts.
//! 3. Admit the user. Each user is `Idle`, `Executing` or in a multi-step
//!    flow. Only `Idle` users past their cooldown are admitted; everyone
//!    else is throttled, and told so at most once per notice interval.
//! 4. Check the caller's level against every command in the chain.
//! 5. Execute. Success starts the cooldown; failure or cancellation
//!    returns the user to `Idle` without one.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use etibot_cache::SyncMap;
use etibot_types::Snowflake;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::command::{CommandContext, CommandRef, Invocation};
use crate::config::CommandConfig;
use crate::error::CommandError;
use crate::permission::{
    HierarchyViolation, PermissionLevel, PermissionResolver, verify_hierarchy,
};
use crate::registry::CommandRegistry;
use crate::response::CommandResponse;
use crate::tokenizer::tokenize;

/// Where a user stands with the marshaller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserPhase {
    /// May run a command once any cooldown has passed.
    #[default]
    Idle,
    /// A command of theirs is running.
    Executing,
    /// A multi-step flow of theirs is open.
    InProgressive,
}

#[derive(Debug, Clone, Copy, Default)]
struct UserState {
    phase: UserPhase,
    cooldown_until: Option<Instant>,
    last_notice: Option<Instant>,
}

impl UserState {
    /// Forgetting a dormant user changes neither admission nor notices.
    fn is_dormant(&self, now: Instant, notice_interval: Duration) -> bool {
        self.phase == UserPhase::Idle
            && self.cooldown_until.is_none_or(|until| until <= now)
            && self
                .last_notice
                .is_none_or(|at| now.saturating_duration_since(at) >= notice_interval)
    }
}

/// Outcome of [`CommandMarshaller::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The text was not a command.
    Ignored,
    /// Send this back to the user.
    Reply(CommandResponse),
    /// The user is throttled and was already told recently.
    Suppressed,
}

/// Resolves, admits, authorizes and runs text commands.
pub struct CommandMarshaller {
    config: CommandConfig,
    registry: CommandRegistry,
    resolver: Arc<dyn PermissionResolver>,
    users: SyncMap<Snowflake, UserState>,
    violations: OnceLock<Vec<HierarchyViolation>>,
}

impl CommandMarshaller {
    /// Build a marshaller and verify the command hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::HierarchyViolation`] when
    /// [`strict_hierarchy`](CommandConfig::strict_hierarchy) is set and a
    /// sub-command requires less than its parent.
    pub fn new(
        config: CommandConfig,
        registry: CommandRegistry,
        resolver: Arc<dyn PermissionResolver>,
    ) -> Result<Self, CommandError> {
        let marshaller = Self {
            config,
            registry,
            resolver,
            users: SyncMap::new(),
            violations: OnceLock::new(),
        };
        let violations = marshaller.verify_commands();
        if marshaller.config.strict_hierarchy && !violations.is_empty() {
            return Err(CommandError::HierarchyViolation {
                violations: violations.to_vec(),
            });
        }
        info!(
            commands = marshaller.registry.len(),
            prefix = %marshaller.config.prefix,
            "command marshaller ready"
        );
        Ok(marshaller)
    }

    /// The registered commands.
    pub const fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// The active configuration.
    pub const fn config(&self) -> &CommandConfig {
        &self.config
    }

    /// Check the command hierarchy once and remember the result.
    ///
    /// Every violation is logged the first time this runs.
    pub fn verify_commands(&self) -> &[HierarchyViolation] {
        self.violations.get_or_init(|| {
            let found = verify_hierarchy(&self.registry);
            for violation in &found {
                error!(
                    path = %violation.path,
                    declared = %violation.declared,
                    inherited = %violation.inherited,
                    "sub-command requires less than its parent"
                );
            }
            found
        })
    }

    /// The text after the prefix, or `None` if `input` is not a command.
    ///
    /// A prefix with trailing whitespace also matches without it, so
    /// `">> ping"` and `">>ping"` are the same command.
    pub fn strip_prefix<'a>(&self, input: &'a str) -> Option<&'a str> {
        input
            .strip_prefix(self.config.prefix.as_str())
            .or_else(|| input.strip_prefix(self.config.prefix.trim_end()))
    }

    /// Handle one message: ignore it, reply, or stay silent.
    pub async fn handle(&self, context: &CommandContext, input: &str) -> Dispatch {
        let Some(body) = self.strip_prefix(input) else {
            return Dispatch::Ignored;
        };
        match self.execute(context, body).await {
            Ok(response) => Dispatch::Reply(response),
            Err(e) if e.should_reply() => Dispatch::Reply(CommandResponse::from(&e)),
            Err(e) => {
                debug!(user = %context.user_id, error = %e, "throttle notice suppressed");
                Dispatch::Suppressed
            }
        }
    }

    /// Run the command in `body`, the text after the prefix.
    ///
    /// # Errors
    ///
    /// Returns the reason the command was not run, or the command's own
    /// failure.
    pub async fn execute(
        &self,
        context: &CommandContext,
        body: &str,
    ) -> Result<CommandResponse, CommandError> {
        let tokens = tokenize(body)?;
        let Some((name, rest)) = tokens.split_first() else {
            return Err(CommandError::NotFound {
                name: String::new(),
            });
        };

        let (chain, args) = self.resolve(context.guild_id, name, rest)?;
        let in_flight = self.admit(context.user_id)?;
        let level = self.resolver.level_of(context);
        authorize(&chain, level)?;

        let Some(command) = chain.last() else {
            return Err(CommandError::NotFound { name: name.clone() });
        };
        let path = chain
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(" ");
        debug!(user = %context.user_id, command = %path, args = args.len(), "executing command");

        let result = command
            .execute(&Invocation {
                context,
                args,
                path: &path,
                level,
                registry: &self.registry,
            })
            .await;
        match &result {
            Ok(_) => in_flight.succeeded(command.is_progressive(), self.config.cooldown()),
            Err(e) => warn!(user = %context.user_id, command = %path, error = %e, "command failed"),
        }
        result
    }

    /// The user's current phase.
    pub fn phase_of(&self, user: Snowflake) -> UserPhase {
        self.users
            .try_get(&user)
            .map(|state| state.phase)
            .unwrap_or_default()
    }

    /// Open a multi-step flow for the user. Returns false if one was
    /// already open.
    pub fn begin_progressive(&self, user: Snowflake) -> bool {
        self.users.with_lock(|users| {
            let state = users.entry(user).or_default();
            let opened = state.phase != UserPhase::InProgressive;
            state.phase = UserPhase::InProgressive;
            opened
        })
    }

    /// Close the user's multi-step flow. Returns false if none was open.
    pub fn end_progressive(&self, user: Snowflake) -> bool {
        self.users.with_lock(|users| match users.get_mut(&user) {
            Some(state) if state.phase == UserPhase::InProgressive => {
                state.phase = UserPhase::Idle;
                true
            }
            _ => false,
        })
    }

    /// Drop per-user state that no longer affects admission or throttle
    /// notices. Returns the number of users forgotten.
    pub fn forget_idle(&self) -> usize {
        let now = Instant::now();
        let notice_interval = self.config.throttle_notice_interval();
        let before = self.users.len();
        self.users.retain(|_, state| !state.is_dormant(now, notice_interval));
        before.saturating_sub(self.users.len())
    }

    fn admit(&self, user: Snowflake) -> Result<InFlight<'_>, CommandError> {
        let now = Instant::now();
        let notice_interval = self.config.throttle_notice_interval();
        let cooldown = self.config.cooldown();
        self.users.with_lock(|users| {
            let state = users.entry(user).or_default();
            let wait = match state.phase {
                UserPhase::InProgressive => return Err(CommandError::FlowInProgress),
                UserPhase::Executing => Some(cooldown),
                UserPhase::Idle => state
                    .cooldown_until
                    .filter(|until| *until > now)
                    .map(|until| until.saturating_duration_since(now)),
            };
            if let Some(wait) = wait {
                let notify = state
                    .last_notice
                    .is_none_or(|at| now.saturating_duration_since(at) >= notice_interval);
                if notify {
                    state.last_notice = Some(now);
                }
                return Err(CommandError::RateLimited {
                    retry_after_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    notify,
                });
            }
            state.phase = UserPhase::Executing;
            Ok(())
        })?;
        Ok(InFlight {
            users: &self.users,
            user,
            armed: true,
        })
    }

    fn resolve<'r, 'a>(
        &'r self,
        guild: Option<Snowflake>,
        name: &str,
        args: &'a [String],
    ) -> Result<(Vec<&'r CommandRef>, &'a [String]), CommandError> {
        let mut current =
            self.registry
                .find(guild, name)
                .ok_or_else(|| CommandError::NotFound {
                    name: name.to_owned(),
                })?;
        let mut chain = vec![current];
        let mut rest = args;
        while let Some((word, tail)) = rest.split_first() {
            let Some(sub) = current.subcommands().iter().find(|c| c.answers_to(word)) else {
                break;
            };
            chain.push(sub);
            current = sub;
            rest = tail;
        }
        Ok((chain, rest))
    }
}

impl fmt::Debug for CommandMarshaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandMarshaller")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("users", &self.users.len())
            .finish_non_exhaustive()
    }
}

fn authorize(chain: &[&CommandRef], level: PermissionLevel) -> Result<(), CommandError> {
    let mut path = String::new();
    for command in chain {
        if !path.is_empty() {
            path.push(' ');
        }
        path.push_str(command.name());
        let required = command.required_level();
        if level < required {
            return Err(CommandError::NotAuthorized {
                command: path,
                required,
                actual: level,
            });
        }
    }
    Ok(())
}

/// Holds a user in `Executing`; dropping it without
/// [`succeeded`](InFlight::succeeded) puts them back to `Idle`.
struct InFlight<'a> {
    users: &'a SyncMap<Snowflake, UserState>,
    user: Snowflake,
    armed: bool,
}

impl InFlight<'_> {
    fn succeeded(mut self, progressive: bool, cooldown: Duration) {
        self.armed = false;
        let until = Instant::now().checked_add(cooldown);
        self.users.with_lock(|users| {
            let Some(state) = users.get_mut(&self.user) else {
                return;
            };
            if state.phase != UserPhase::Executing {
                return;
            }
            if progressive {
                state.phase = UserPhase::InProgressive;
            } else {
                state.phase = UserPhase::Idle;
                state.cooldown_until = until;
            }
        });
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.users.with_lock(|users| match users.get_mut(&self.user) {
            Some(state) if state.phase == UserPhase::Executing => state.phase = UserPhase::Idle,
            _ => {}
        });
    }
}
