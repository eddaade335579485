//! Built-in commands.
//!
//! | Command | Level | Purpose |
//! |---------|-------|---------|
//! | `help [command ...]` | Standard User | List runnable commands or describe one |
//! | `ping` | Standard User | Heartbeat latency and last sequence |
//! | `snowflake <id or mention>` | Standard User | Decode an id |
//! | `whoami` | Standard User | The caller's resolved level and roles |

use std::fmt::Write as _;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::SecondsFormat;
use etibot_cache::Entity;
use etibot_commands::{
    Command, CommandError, CommandRef, CommandRegistry, CommandResponse, Invocation,
    PermissionLevel,
};
use etibot_gateway::GatewayClient;
use etibot_types::Snowflake;

/// Every built-in command, registered globally.
pub fn registry(client: &Arc<GatewayClient>) -> CommandRegistry {
    CommandRegistry::new()
        .with_global(Arc::new(Help))
        .with_global(Arc::new(Ping {
            client: Arc::downgrade(client),
        }))
        .with_global(Arc::new(SnowflakeInfo))
        .with_global(Arc::new(WhoAmI))
}

// ---------------------------------------------------------------------------
// help
// ---------------------------------------------------------------------------

struct Help;

#[async_trait]
impl Command for Help {
    fn name(&self) -> &str {
        "help"
    }

    fn aliases(&self) -> &[&str] {
        &["commands"]
    }

    fn description(&self) -> &str {
        "List the commands you can run, or describe one."
    }

    fn syntax(&self) -> &str {
        "[command] [sub-command ...]"
    }

    async fn execute(&self, call: &Invocation<'_>) -> Result<CommandResponse, CommandError> {
        let Some((first, rest)) = call.args.split_first() else {
            return Ok(list_commands(call));
        };

        let mut command = call
            .registry
            .find(call.context.guild_id, first)
            .ok_or_else(|| CommandError::NotFound {
                name: first.clone(),
            })?;
        let mut path = command.name().to_owned();
        for word in rest {
            let Some(sub) = command.subcommands().iter().find(|c| c.answers_to(word)) else {
                return Err(CommandError::NotFound {
                    name: format!("{path} {word}"),
                });
            };
            command = sub;
            path.push(' ');
            path.push_str(sub.name());
        }
        Ok(describe(command, &path))
    }
}

fn list_commands(call: &Invocation<'_>) -> CommandResponse {
    let mut body = String::new();
    for command in call.registry.visible_in(call.context.guild_id) {
        if call.level < command.required_level() {
            continue;
        }
        let _ = writeln!(body, "`{}` {}", usage(command, command.name()), command.description());
    }
    CommandResponse::success("Commands", body.trim_end())
}

fn describe(command: &CommandRef, path: &str) -> CommandResponse {
    let mut response = CommandResponse::success(format!("Help: {path}"), command.description())
        .with_field("Usage", format!("`{}`", usage(command, path)))
        .with_field("Requires", command.required_level().to_string());
    if !command.aliases().is_empty() {
        response = response.with_field("Aliases", command.aliases().join(", "));
    }
    let subs: Vec<&str> = command.subcommands().iter().map(|s| s.name()).collect();
    if !subs.is_empty() {
        response = response.with_field("Sub-commands", subs.join(", "));
    }
    response
}

fn usage(command: &CommandRef, path: &str) -> String {
    match command.syntax() {
        "" => path.to_owned(),
        syntax => format!("{path} {syntax}"),
    }
}

// ---------------------------------------------------------------------------
// ping
// ---------------------------------------------------------------------------

struct Ping {
    client: Weak<GatewayClient>,
}

#[async_trait]
impl Command for Ping {
    fn name(&self) -> &str {
        "ping"
    }

    fn description(&self) -> &str {
        "Check that the bot is alive."
    }

    async fn execute(&self, call: &Invocation<'_>) -> Result<CommandResponse, CommandError> {
        let client = self.client.upgrade().ok_or_else(|| CommandError::Execution {
            command: call.path.to_owned(),
            reason: "gateway client is shut down".to_owned(),
        })?;
        let heartbeat = client.heartbeat();
        let sequence = client
            .last_sequence()
            .map_or_else(|| "none".to_owned(), |s| s.to_string());
        Ok(CommandResponse::success("Pong!", "")
            .with_field("Heartbeat", format!("{:?}", heartbeat.phase()))
            .with_field(
                "Unacknowledged for",
                format!("{} ms", heartbeat.latency().as_millis()),
            )
            .with_field("Last sequence", sequence))
    }
}

// ---------------------------------------------------------------------------
// snowflake
// ---------------------------------------------------------------------------

struct SnowflakeInfo;

#[async_trait]
impl Command for SnowflakeInfo {
    fn name(&self) -> &str {
        "snowflake"
    }

    fn aliases(&self) -> &[&str] {
        &["id"]
    }

    fn description(&self) -> &str {
        "Decode an id or mention into its creation time and internal fields."
    }

    fn syntax(&self) -> &str {
        "<id or mention>"
    }

    async fn execute(&self, call: &Invocation<'_>) -> Result<CommandResponse, CommandError> {
        let input = call.arg(0, "id or mention")?;
        let (id, kind) = Snowflake::try_extract_from_mention(input).ok_or_else(|| {
            CommandError::invalid(format!("`{input}` is not an id or mention"))
        })?;
        let parts = id.parts();
        Ok(CommandResponse::success(format!("Snowflake {id}"), "")
            .with_field("Kind", format!("{kind:?}"))
            .with_field(
                "Created",
                id.created_at().to_rfc3339_opts(SecondsFormat::Millis, true),
            )
            .with_field("Worker", parts.worker_id.to_string())
            .with_field("Process", parts.process_id.to_string())
            .with_field("Sequence", parts.sequence.to_string()))
    }
}

// ---------------------------------------------------------------------------
// whoami
// ---------------------------------------------------------------------------

struct WhoAmI;

#[async_trait]
impl Command for WhoAmI {
    fn name(&self) -> &str {
        "whoami"
    }

    fn description(&self) -> &str {
        "Show your permission level and roles."
    }

    async fn execute(&self, call: &Invocation<'_>) -> Result<CommandResponse, CommandError> {
        let mut response = CommandResponse::success(
            call.context.user_id.user_mention(),
            format!("Permission level: {}", call.level),
        );
        if let Some(member) = &call.context.member {
            response = response.with_field("Display name", member.display_name());
            let mut roles = member.roles().to_list();
            roles.sort_by_key(|role| std::cmp::Reverse(role.data().position));
            let names: Vec<String> = roles.iter().map(|role| role.data().name).collect();
            if !names.is_empty() {
                response = response.with_field("Roles", names.join(", "));
            }
            if let Some(top) = member.highest_role() {
                response = response.with_field("Highest role", top.id().role_mention());
            }
        }
        Ok(response)
    }
}
