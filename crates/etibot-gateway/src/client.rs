//! Gateway client state machine.
//!
//! [`GatewayClient`] consumes decoded gateway frames, keeps the
//! [`EntityCache`] in step with dispatch events and drives the heartbeat.
//! Transport is not its concern: inbound frames arrive as a stream and
//! outbound frames (heartbeats) leave through an `mpsc` sender owned by
//! whoever holds the socket.
//!
//! # Opcode handling
//!
//! | Opcode | Action |
//! |--------|--------|
//! | `HELLO` | (Re)start the heartbeat monitor and periodic heartbeat sender |
//! | `HEARTBEAT` | Reply with a heartbeat immediately |
//! | `HEARTBEAT_ACK` | Clear the outstanding probe |
//! | `DISPATCH` | Decode through the [`EventRegistry`] and execute |
//! | `RECONNECT`, `INVALID_SESSION` | Raise `reconnect_requested` |

use std::sync::{Arc, Weak};
use std::time::Duration;

use etibot_cache::{EntityCache, Guild, Member, User};
use etibot_types::{GatewayPayload, OpCode, Snowflake};
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::events::Message;
use crate::heartbeat::{HeartbeatMonitor, HeartbeatTimeout};
use crate::registry::EventRegistry;
use crate::signal::Signal;

/// Identity of the current gateway session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id used to resume.
    pub session_id: String,
    /// The bot's own user id.
    pub user_id: Snowflake,
    /// Gateway URL to use when resuming.
    pub resume_gateway_url: Option<String>,
}

/// Delivered by the `ready` signal.
#[derive(Debug, Clone)]
pub struct ReadyInfo {
    /// Session id.
    pub session_id: String,
    /// The bot's own account.
    pub user: Arc<User>,
    /// Number of guilds listed in `READY`.
    pub guild_count: usize,
}

/// Why the server wants the client to reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// `RECONNECT` opcode.
    ServerRequested,
    /// `INVALID_SESSION` opcode.
    InvalidSession {
        /// Whether the session may be resumed.
        resumable: bool,
    },
}

/// Signals raised by the client.
#[derive(Debug)]
pub struct ClientSignals {
    /// The session is ready.
    pub ready: Signal<ReadyInfo>,
    /// A guild finished loading or came back from an outage.
    pub guild_available: Signal<Arc<Guild>>,
    /// The bot left a guild.
    pub guild_removed: Signal<Snowflake>,
    /// A message was posted.
    pub message_created: Signal<Message>,
    /// A member's nickname or roles changed.
    pub member_updated: Signal<Arc<Member>>,
    /// The server asked for a reconnect.
    pub reconnect_requested: Signal<ReconnectReason>,
    /// A heartbeat went unacknowledged past the timeout.
    pub heartbeat_timed_out: Signal<HeartbeatTimeout>,
}

impl Default for ClientSignals {
    fn default() -> Self {
        Self {
            ready: Signal::new("ready"),
            guild_available: Signal::new("guild_available"),
            guild_removed: Signal::new("guild_removed"),
            message_created: Signal::new("message_created"),
            member_updated: Signal::new("member_updated"),
            reconnect_requested: Signal::new("reconnect_requested"),
            heartbeat_timed_out: Signal::new("heartbeat_timed_out"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hello {
    heartbeat_interval: u64,
}

/// Gateway client core.
#[derive(Debug)]
pub struct GatewayClient {
    me: Weak<Self>,
    registry: EventRegistry,
    cache: EntityCache,
    heartbeat: HeartbeatMonitor,
    outbound: mpsc::Sender<GatewayPayload>,
    sequence: Mutex<Option<u64>>,
    session: RwLock<Option<SessionInfo>>,
    sender_task: Mutex<Option<JoinHandle<()>>>,
    signals: ClientSignals,
}

impl GatewayClient {
    /// Create a client that writes outbound frames to `outbound`.
    pub fn new(
        config: &GatewayConfig,
        registry: EventRegistry,
        outbound: mpsc::Sender<GatewayPayload>,
    ) -> Arc<Self> {
        let client = Arc::new_cyclic(|me: &Weak<Self>| Self {
            me: me.clone(),
            registry,
            cache: EntityCache::new(),
            heartbeat: HeartbeatMonitor::new(
                config.heartbeat_timeout(),
                config.heartbeat_poll_interval(),
            ),
            outbound,
            sequence: Mutex::new(None),
            session: RwLock::new(None),
            sender_task: Mutex::new(None),
            signals: ClientSignals::default(),
        });

        let me = Arc::downgrade(&client);
        client.heartbeat.on_timeout(move |timeout| {
            let Some(client) = me.upgrade() else {
                return;
            };
            client.stop_sender();
            // The monitor callback is synchronous; deliver the signal on a task.
            tokio::spawn(async move {
                if let Err(e) = client.signals.heartbeat_timed_out.invoke(timeout).await {
                    warn!(error = %e, "heartbeat timeout subscriber failed");
                }
            });
        });
        client
    }

    /// The entity cache.
    pub const fn cache(&self) -> &EntityCache {
        &self.cache
    }

    /// The client's signals.
    pub const fn signals(&self) -> &ClientSignals {
        &self.signals
    }

    /// The heartbeat monitor.
    pub const fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// The event registry.
    pub const fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Last dispatch sequence number seen.
    pub fn last_sequence(&self) -> Option<u64> {
        *self.sequence.lock()
    }

    /// The current session, once `READY` was received.
    pub fn session(&self) -> Option<SessionInfo> {
        self.session.read().clone()
    }

    pub(crate) fn set_session(&self, session: SessionInfo) {
        *self.session.write() = Some(session);
    }

    /// Handle frames until the stream ends, then shut down.
    ///
    /// Per-frame failures are logged and do not stop the loop.
    pub async fn run<S>(&self, mut inbound: S)
    where
        S: Stream<Item = GatewayPayload> + Unpin + Send,
    {
        while let Some(payload) = inbound.next().await {
            if let Err(e) = self.handle_payload(payload).await {
                warn!(error = %e, "failed to handle gateway payload");
            }
        }
        info!("gateway stream ended");
        self.shutdown();
    }

    /// Handle one inbound frame.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the client stays usable.
    pub async fn handle_payload(&self, payload: GatewayPayload) -> Result<(), GatewayError> {
        if let Some(sequence) = payload.s {
            *self.sequence.lock() = Some(sequence);
        }
        match payload.op {
            OpCode::Dispatch => {
                let event = self.registry.instantiate_for(&payload)?;
                debug!(event = ?payload.t, sequence = ?payload.s, "dispatch");
                event.execute(self).await
            }
            OpCode::Hello => {
                let hello: Hello = serde_json::from_value(payload.d).map_err(|source| {
                    GatewayError::Payload {
                        wire_name: "HELLO".to_owned(),
                        source,
                    }
                })?;
                self.begin_heartbeat(Duration::from_millis(hello.heartbeat_interval))
            }
            OpCode::Heartbeat => self.send_heartbeat().await,
            OpCode::HeartbeatAck => {
                self.heartbeat.acknowledged();
                Ok(())
            }
            OpCode::Reconnect => {
                info!("server requested reconnect");
                self.signals
                    .reconnect_requested
                    .invoke(ReconnectReason::ServerRequested)
                    .await?;
                Ok(())
            }
            OpCode::InvalidSession => {
                let resumable = payload.d.as_bool().unwrap_or(false);
                warn!(resumable, "session invalidated");
                if !resumable {
                    *self.session.write() = None;
                }
                self.signals
                    .reconnect_requested
                    .invoke(ReconnectReason::InvalidSession { resumable })
                    .await?;
                Ok(())
            }
            OpCode::Identify
            | OpCode::PresenceUpdate
            | OpCode::VoiceStateUpdate
            | OpCode::Resume
            | OpCode::RequestGuildMembers => Err(GatewayError::invalid(format!(
                "opcode {:?} is client-to-server only",
                payload.op
            ))),
        }
    }

    /// Send a heartbeat carrying the last sequence number and mark it
    /// outstanding.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ChannelClosed`] if the transport is gone.
    pub async fn send_heartbeat(&self) -> Result<(), GatewayError> {
        let frame = GatewayPayload::heartbeat(self.last_sequence());
        self.outbound
            .send(frame)
            .await
            .map_err(|_closed| GatewayError::ChannelClosed)?;
        self.heartbeat.sent();
        Ok(())
    }

    /// Stop the heartbeat monitor and sender.
    pub fn shutdown(&self) {
        self.stop_sender();
        self.heartbeat.stop();
        debug!("gateway client shut down");
    }

    fn begin_heartbeat(&self, interval: Duration) -> Result<(), GatewayError> {
        if interval.is_zero() {
            return Err(GatewayError::invalid("heartbeat interval must be non-zero"));
        }
        self.shutdown();
        self.heartbeat.start()?;

        let me = self.me.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(client) = me.upgrade() else {
                    break;
                };
                if let Err(e) = client.send_heartbeat().await {
                    warn!(error = %e, "heartbeat send failed");
                    break;
                }
            }
        });
        *self.sender_task.lock() = Some(task);
        info!(interval = ?interval, "heartbeat started");
        Ok(())
    }

    fn stop_sender(&self) {
        let task = self.sender_task.lock().take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.stop_sender();
        self.heartbeat.stop();
    }
}
