//! EtiBot entry point.
//!
//! Replays captured gateway traffic through the client core: every frame
//! updates the entity cache, and messages that carry the command prefix go
//! through the command marshaller. Replies and outbound gateway frames are
//! logged rather than sent, which makes the binary a harness for checking
//! cache and command behaviour against real captures.
//!
//! ```text
//! etibot [config.yaml] [capture.jsonl | -]
//! ```
//!
//! # Startup Sequence
//!
//! 1. Load configuration (`etibot-config.yaml` unless a path is given)
//! 2. Initialize structured logging (tracing)
//! 3. Build the gateway client with the standard dispatch events
//! 4. Build the command marshaller with the built-in commands
//! 5. Subscribe to client signals
//! 6. Replay frames from the capture file or stdin until end of input

mod builtin;
mod config;
mod error;
mod replay;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use etibot_cache::Entity;
use etibot_commands::{CommandContext, CommandMarshaller, Dispatch};
use etibot_gateway::{ClientSignals, EventRegistry, GatewayClient, Message};
use etibot_types::GatewayPayload;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{BotConfig, LogFormat, LoggingConfig};
use crate::error::BotError;

const DEFAULT_CONFIG_PATH: &str = "etibot-config.yaml";

/// Interval between sweeps of idle per-user command state.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, startup or the input fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_owned());
    let input_path = args.next();

    // 1. Load configuration.
    let (config, from_file) = load_config(Path::new(&config_path))?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config = %config_path,
        from_file,
        prefix = %config.commands.prefix,
        heartbeat_timeout_ms = config.gateway.heartbeat_timeout_ms,
        "etibot starting"
    );

    // 3. Gateway client.
    let (outbound_tx, outbound_rx) = mpsc::channel(config.gateway.outbound_queue);
    let client = GatewayClient::new(&config.gateway, EventRegistry::standard()?, outbound_tx);
    info!(
        events = client.registry().len(),
        "gateway client initialized"
    );

    // 4. Command marshaller.
    let marshaller = Arc::new(CommandMarshaller::new(
        config.commands.clone(),
        builtin::registry(&client),
        Arc::new(config.permissions.clone()),
    )?);

    // 5. Signals.
    subscribe(&client, &marshaller);
    let transport = tokio::spawn(drain_outbound(outbound_rx));
    let sweeper = tokio::spawn(sweep_idle_users(Arc::clone(&marshaller)));

    // 6. Replay.
    let input = open_input(input_path.as_deref()).await?;
    client.run(replay::frames(input)).await;
    info!(
        guilds = client.cache().guild_count(),
        users = client.cache().user_count(),
        last_sequence = ?client.last_sequence(),
        "replay finished"
    );

    sweeper.abort();
    drop(client);
    transport.await?;
    Ok(())
}

/// Load the config file, or defaults when it does not exist.
fn load_config(path: &Path) -> Result<(BotConfig, bool), BotError> {
    if path.exists() {
        Ok((BotConfig::from_file(path)?, true))
    } else {
        Ok((BotConfig::parse("{}")?, false))
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn open_input(path: Option<&str>) -> Result<Box<dyn AsyncBufRead + Unpin + Send>, BotError> {
    match path {
        None | Some("-") => {
            info!("replaying frames from stdin");
            Ok(Box::new(BufReader::new(tokio::io::stdin())))
        }
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            info!(path, "replaying frames from file");
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

/// Connect logging and command handling to the client's signals.
fn subscribe(client: &GatewayClient, marshaller: &Arc<CommandMarshaller>) {
    let signals = client.signals();

    signals.ready.connect(|ready| async move {
        info!(
            session = %ready.session_id,
            user = %ready.user.id(),
            guilds = ready.guild_count,
            "session ready"
        );
        Ok(())
    });

    signals.guild_available.connect(|guild| async move {
        info!(
            guild = %guild.id(),
            name = %guild.name(),
            members = guild.members().len(),
            "guild available"
        );
        Ok(())
    });

    signals.guild_removed.connect(|guild_id| async move {
        info!(guild = %guild_id, "removed from guild");
        Ok(())
    });

    signals.member_updated.connect(|member| async move {
        debug!(user = %member.id(), name = %member.display_name(), "member updated");
        Ok(())
    });

    signals.reconnect_requested.connect(|reason| async move {
        warn!(?reason, "gateway asked for a reconnect");
        Ok(())
    });

    signals.heartbeat_timed_out.connect(|timeout| async move {
        warn!(
            latency = ?timeout.latency,
            timeout = ?timeout.timeout,
            "heartbeat timed out, connection is dead"
        );
        Ok(())
    });

    route_commands(signals, marshaller);
}

/// Run each new message's command on its own task so that a slow command
/// never holds up the frame loop or heartbeat acknowledgements.
fn route_commands(signals: &ClientSignals, marshaller: &Arc<CommandMarshaller>) {
    let commands = Arc::clone(marshaller);
    signals.message_created.connect(move |message| {
        let commands = Arc::clone(&commands);
        async move {
            tokio::spawn(async move { handle_message(&commands, &message).await });
            Ok(())
        }
    });
}

async fn handle_message(commands: &CommandMarshaller, message: &Message) {
    if message.author.is_bot() {
        return;
    }
    let context = CommandContext {
        user_id: message.author.id(),
        guild_id: message.guild_id,
        channel_id: message.channel_id,
        member: message.member.clone(),
    };
    match commands.handle(&context, &message.content).await {
        Dispatch::Reply(response) => info!(
            channel = %message.channel_id,
            user = %context.user_id,
            is_error = response.is_error,
            reply = %response,
            "command reply"
        ),
        Dispatch::Suppressed | Dispatch::Ignored => {}
    }
}

/// Stand-in for the socket writer: log every outbound frame.
async fn drain_outbound(mut outbound: mpsc::Receiver<GatewayPayload>) {
    while let Some(frame) = outbound.recv().await {
        match serde_json::to_string(&frame) {
            Ok(json) => debug!(frame = %json, "outbound frame"),
            Err(e) => warn!(error = %e, "outbound frame is not serializable"),
        }
    }
}

async fn sweep_idle_users(commands: Arc<CommandMarshaller>) {
    let mut ticker = tokio::time::interval(IDLE_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        let forgotten = commands.forget_idle();
        if forgotten > 0 {
            debug!(forgotten, "swept idle command users");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use etibot_cache::{User, UserData};
    use etibot_commands::{
        Command, CommandConfig, CommandError, CommandRegistry, CommandResponse, Invocation,
        StaticPermissions, UserPhase,
    };
    use etibot_gateway::GatewayConfig;
    use etibot_types::Snowflake;
    use tokio::sync::Notify;

    use super::*;

    /// Runs until released.
    struct Slow {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Command for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "waits to be released"
        }

        async fn execute(&self, _call: &Invocation<'_>) -> Result<CommandResponse, CommandError> {
            self.release.notified().await;
            Ok(CommandResponse::success("slow", "done"))
        }
    }

    fn message(author: u64, content: &str) -> Message {
        Message {
            id: Snowflake::new(1),
            channel_id: Snowflake::new(400),
            guild_id: None,
            author: User::new(
                Snowflake::new(author),
                UserData {
                    username: "eti".to_owned(),
                    ..UserData::default()
                },
            ),
            member: None,
            content: content.to_owned(),
        }
    }

    #[tokio::test]
    async fn commands_run_off_the_frame_loop() {
        let (tx, _rx) = mpsc::channel(8);
        let client = GatewayClient::new(
            &GatewayConfig::default(),
            EventRegistry::standard().unwrap(),
            tx,
        );
        let release = Arc::new(Notify::new());
        let registry = CommandRegistry::new().with_global(Arc::new(Slow {
            release: Arc::clone(&release),
        }));
        let marshaller = Arc::new(
            CommandMarshaller::new(
                CommandConfig::default(),
                registry,
                Arc::new(StaticPermissions::new()),
            )
            .unwrap(),
        );
        route_commands(client.signals(), &marshaller);

        let user = Snowflake::new(7);
        client
            .signals()
            .message_created
            .invoke(message(7, ">> slow"))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(marshaller.phase_of(user), UserPhase::Executing);

        release.notify_one();
        for _ in 0..10 {
            if marshaller.phase_of(user) == UserPhase::Idle {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(marshaller.phase_of(user), UserPhase::Idle);
    }
}
