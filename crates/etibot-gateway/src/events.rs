//! Built-in dispatch events.
//!
//! Each `*Event` type decodes one dispatch body and applies it to the
//! client: server state lands in the cache through the gate-free
//! `set_to` / `*_from_server` paths, and interested code is told through
//! the client's signals. Entities already cached are updated in place so
//! handles held by application code stay current.

use std::sync::Arc;

use async_trait::async_trait;
use etibot_cache::{
    Channel, ChannelData, Entity, EntityCache, Guild, GuildData, Member, Role, RoleData, User,
    UserData,
};
use etibot_types::Snowflake;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::client::{GatewayClient, ReadyInfo, SessionInfo};
use crate::error::GatewayError;
use crate::registry::GatewayEvent;

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

/// A user object as sent by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct UserPayload {
    /// User id.
    pub id: Snowflake,
    /// Account name.
    #[serde(default)]
    pub username: String,
    /// Display name.
    #[serde(default)]
    pub global_name: Option<String>,
    /// Bot account flag.
    #[serde(default)]
    pub bot: bool,
}

impl UserPayload {
    fn data(&self) -> UserData {
        UserData {
            username: self.username.clone(),
            global_name: self.global_name.clone(),
            bot: self.bot,
        }
    }
}

/// A role object as sent by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct RolePayload {
    /// Role id.
    pub id: Snowflake,
    /// Role name.
    #[serde(default)]
    pub name: String,
    /// Hierarchy position.
    #[serde(default)]
    pub position: i32,
    /// RGB color.
    #[serde(default)]
    pub color: u32,
    /// Shown separately in the member list.
    #[serde(default)]
    pub hoist: bool,
    /// Mentionable by anyone.
    #[serde(default)]
    pub mentionable: bool,
}

impl RolePayload {
    fn data(&self) -> RoleData {
        RoleData {
            name: self.name.clone(),
            position: self.position,
            color: self.color,
            hoist: self.hoist,
            mentionable: self.mentionable,
        }
    }
}

/// A channel object as sent by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelPayload {
    /// Channel id.
    pub id: Snowflake,
    /// Owning guild; absent for direct messages.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Raw channel type.
    #[serde(rename = "type", default)]
    pub kind: u8,
    /// Channel name.
    #[serde(default)]
    pub name: Option<String>,
    /// Sort position.
    #[serde(default)]
    pub position: i32,
    /// Channel topic.
    #[serde(default)]
    pub topic: Option<String>,
    /// Time of the most recent pin.
    #[serde(default)]
    pub last_pin_timestamp: Option<String>,
}

impl ChannelPayload {
    fn data(&self) -> ChannelData {
        ChannelData {
            name: self.name.clone().unwrap_or_default(),
            kind: self.kind,
            position: self.position,
            topic: self.topic.clone(),
            last_pin_timestamp: self.last_pin_timestamp.clone(),
        }
    }
}

/// A guild member object as sent by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct MemberPayload {
    /// The member's account.
    pub user: UserPayload,
    /// Guild nickname.
    #[serde(default)]
    pub nick: Option<String>,
    /// Assigned role ids.
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

/// A full guild object as sent in `GUILD_CREATE`.
#[derive(Debug, Clone, Deserialize)]
pub struct GuildPayload {
    /// Guild id.
    pub id: Snowflake,
    /// Guild name.
    #[serde(default)]
    pub name: String,
    /// Owner's user id.
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    /// Set while the guild is in an outage.
    #[serde(default)]
    pub unavailable: bool,
    /// Every role.
    #[serde(default)]
    pub roles: Vec<RolePayload>,
    /// Every channel.
    #[serde(default)]
    pub channels: Vec<ChannelPayload>,
    /// The members sent with the guild.
    #[serde(default)]
    pub members: Vec<MemberPayload>,
}

/// A guild id with its availability, as listed in `READY`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnavailableGuild {
    /// Guild id.
    pub id: Snowflake,
    /// Whether the guild is in an outage.
    #[serde(default)]
    pub unavailable: bool,
}

/// A message as delivered to `message_created` subscribers.
#[derive(Debug, Clone)]
pub struct Message {
    /// Message id.
    pub id: Snowflake,
    /// Channel the message was posted in.
    pub channel_id: Snowflake,
    /// Guild, when not a direct message.
    pub guild_id: Option<Snowflake>,
    /// The cached author.
    pub author: Arc<User>,
    /// The author's membership, when cached.
    pub member: Option<Arc<Member>>,
    /// Raw text.
    pub content: String,
}

// ---------------------------------------------------------------------------
// Cache helpers
// ---------------------------------------------------------------------------

fn cached_guild(cache: &EntityCache, id: Snowflake, event: &'static str) -> Option<Arc<Guild>> {
    let guild = cache.guild(id);
    if guild.is_none() {
        debug!(guild_id = %id, event, "event for uncached guild ignored");
    }
    guild
}

fn upsert_role(guild: &Guild, payload: &RolePayload) -> Arc<Role> {
    if let Some(role) = guild.roles().get(payload.id) {
        role.update(payload.data());
        return role;
    }
    let role = Role::new(payload.id, payload.data());
    guild.roles().insert_from_server(Arc::clone(&role));
    role
}

fn upsert_channel(guild: &Guild, payload: &ChannelPayload) -> Arc<Channel> {
    if let Some(channel) = guild.channels().get(payload.id) {
        channel.update(payload.data());
        return channel;
    }
    let channel = Channel::new(payload.id, payload.data());
    guild.channels().insert_from_server(Arc::clone(&channel));
    channel
}

/// Land a member's server state, reusing the cached member when present.
fn upsert_member(
    cache: &EntityCache,
    guild: &Arc<Guild>,
    user: &UserPayload,
    nick: Option<String>,
    roles: &[Snowflake],
) -> Arc<Member> {
    let account = cache.upsert_user(user.id, user.data());
    let member = match guild.member(account.id()) {
        Some(member) => {
            member.set_nick(nick);
            member
        }
        None => {
            let member = Member::new(account, guild, nick);
            guild.members().insert_from_server(Arc::clone(&member));
            member
        }
    };
    member
        .roles()
        .set_to(roles.iter().filter_map(|id| guild.roles().get(*id)));
    member
}

fn apply_full_guild(cache: &EntityCache, guild: &Arc<Guild>, payload: &GuildPayload) {
    let roles: Vec<Arc<Role>> = payload
        .roles
        .iter()
        .map(|role| match guild.roles().get(role.id) {
            Some(existing) => {
                existing.update(role.data());
                existing
            }
            None => Role::new(role.id, role.data()),
        })
        .collect();
    guild.roles().set_to(roles);

    let channels: Vec<Arc<Channel>> = payload
        .channels
        .iter()
        .map(|channel| match guild.channels().get(channel.id) {
            Some(existing) => {
                existing.update(channel.data());
                existing
            }
            None => Channel::new(channel.id, channel.data()),
        })
        .collect();
    guild.channels().set_to(channels);

    // Large guilds send only part of the member list; keep the rest.
    for member in &payload.members {
        upsert_member(cache, guild, &member.user, member.nick.clone(), &member.roles);
    }
}

// ---------------------------------------------------------------------------
// Session events
// ---------------------------------------------------------------------------

/// `READY`: the session is established.
#[derive(Debug, Deserialize)]
pub struct ReadyEvent {
    /// Session id used to resume.
    pub session_id: String,
    /// The bot's own account.
    pub user: UserPayload,
    /// Guilds the bot is in; all start unavailable.
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
    /// Gateway URL to use when resuming.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

#[async_trait]
impl GatewayEvent for ReadyEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        let cache = client.cache();
        let user = cache.upsert_user(self.user.id, self.user.data());
        for listed in &self.guilds {
            if cache.guild(listed.id).is_none() {
                cache.insert_guild(Guild::new(listed.id, GuildData::default(), true));
            }
        }
        client.set_session(SessionInfo {
            session_id: self.session_id.clone(),
            user_id: user.id(),
            resume_gateway_url: self.resume_gateway_url.clone(),
        });
        info!(
            session_id = %self.session_id,
            user = %user.username(),
            guilds = self.guilds.len(),
            "gateway session ready"
        );
        client
            .signals()
            .ready
            .invoke(ReadyInfo {
                session_id: self.session_id.clone(),
                user,
                guild_count: self.guilds.len(),
            })
            .await?;
        Ok(())
    }
}

/// `RESUMED`: a dropped session was resumed.
#[derive(Debug, Deserialize)]
pub struct ResumedEvent {}

#[async_trait]
impl GatewayEvent for ResumedEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        let session = client.session().map(|s| s.session_id);
        info!(session_id = ?session, "gateway session resumed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Guild events
// ---------------------------------------------------------------------------

/// `GUILD_CREATE`: a guild became available or was joined.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct GuildCreateEvent {
    /// The full guild.
    pub guild: GuildPayload,
}

#[async_trait]
impl GatewayEvent for GuildCreateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        let cache = client.cache();
        let payload = &self.guild;
        let data = GuildData {
            name: payload.name.clone(),
            owner_id: payload.owner_id,
        };
        let guild = match cache.guild(payload.id) {
            Some(existing) => {
                existing.update(data);
                existing
            }
            None => {
                let guild = Guild::new(payload.id, data, payload.unavailable);
                cache.insert_guild(Arc::clone(&guild));
                guild
            }
        };
        if payload.unavailable {
            guild.set_unavailable(true);
            warn!(guild_id = %payload.id, "guild created while unavailable");
            return Ok(());
        }
        apply_full_guild(cache, &guild, payload);
        guild.set_unavailable(false);
        info!(
            guild_id = %payload.id,
            name = %payload.name,
            roles = guild.roles().len(),
            channels = guild.channels().len(),
            members = guild.members().len(),
            "guild available"
        );
        client.signals().guild_available.invoke(guild).await?;
        Ok(())
    }
}

/// `GUILD_UPDATE`: guild settings changed.
#[derive(Debug, Deserialize)]
pub struct GuildUpdateEvent {
    /// Guild id.
    pub id: Snowflake,
    /// Guild name.
    #[serde(default)]
    pub name: String,
    /// Owner's user id.
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
}

#[async_trait]
impl GatewayEvent for GuildUpdateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        if let Some(guild) = cached_guild(client.cache(), self.id, "GUILD_UPDATE") {
            guild.update(GuildData {
                name: self.name.clone(),
                owner_id: self.owner_id,
            });
        }
        Ok(())
    }
}

/// `GUILD_DELETE`: the guild went into an outage or the bot left it.
#[derive(Debug, Deserialize)]
pub struct GuildDeleteEvent {
    /// Guild id.
    pub id: Snowflake,
    /// Set for outages; absent when the bot was removed.
    #[serde(default)]
    pub unavailable: bool,
}

#[async_trait]
impl GatewayEvent for GuildDeleteEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        let cache = client.cache();
        if self.unavailable {
            if let Some(guild) = cache.guild(self.id) {
                guild.set_unavailable(true);
            }
            warn!(guild_id = %self.id, "guild outage");
            return Ok(());
        }
        if cache.remove_guild(self.id).is_some() {
            info!(guild_id = %self.id, "left guild");
        }
        client.signals().guild_removed.invoke(self.id).await?;
        Ok(())
    }
}

/// `GUILD_ROLE_CREATE`.
#[derive(Debug, Deserialize)]
pub struct GuildRoleCreateEvent {
    /// Guild id.
    pub guild_id: Snowflake,
    /// The new role.
    pub role: RolePayload,
}

#[async_trait]
impl GatewayEvent for GuildRoleCreateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        if let Some(guild) = cached_guild(client.cache(), self.guild_id, "GUILD_ROLE_CREATE") {
            upsert_role(&guild, &self.role);
        }
        Ok(())
    }
}

/// `GUILD_ROLE_UPDATE`.
#[derive(Debug, Deserialize)]
pub struct GuildRoleUpdateEvent {
    /// Guild id.
    pub guild_id: Snowflake,
    /// The role's new state.
    pub role: RolePayload,
}

#[async_trait]
impl GatewayEvent for GuildRoleUpdateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        if let Some(guild) = cached_guild(client.cache(), self.guild_id, "GUILD_ROLE_UPDATE") {
            upsert_role(&guild, &self.role);
        }
        Ok(())
    }
}

/// `GUILD_ROLE_DELETE`.
#[derive(Debug, Deserialize)]
pub struct GuildRoleDeleteEvent {
    /// Guild id.
    pub guild_id: Snowflake,
    /// The deleted role.
    pub role_id: Snowflake,
}

#[async_trait]
impl GatewayEvent for GuildRoleDeleteEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        if let Some(guild) = cached_guild(client.cache(), self.guild_id, "GUILD_ROLE_DELETE") {
            guild.roles().remove_from_server(self.role_id);
            for member in guild.members().to_list() {
                member.roles().remove_from_server(self.role_id);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Member events
// ---------------------------------------------------------------------------

/// `GUILD_MEMBER_ADD`.
#[derive(Debug, Deserialize)]
pub struct GuildMemberAddEvent {
    /// Guild id.
    pub guild_id: Snowflake,
    /// The member's account.
    pub user: UserPayload,
    /// Guild nickname.
    #[serde(default)]
    pub nick: Option<String>,
    /// Assigned role ids.
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

#[async_trait]
impl GatewayEvent for GuildMemberAddEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        let cache = client.cache();
        if let Some(guild) = cached_guild(cache, self.guild_id, "GUILD_MEMBER_ADD") {
            upsert_member(cache, &guild, &self.user, self.nick.clone(), &self.roles);
        }
        Ok(())
    }
}

/// `GUILD_MEMBER_UPDATE`.
#[derive(Debug, Deserialize)]
pub struct GuildMemberUpdateEvent {
    /// Guild id.
    pub guild_id: Snowflake,
    /// The member's account.
    pub user: UserPayload,
    /// Guild nickname.
    #[serde(default)]
    pub nick: Option<String>,
    /// Assigned role ids.
    #[serde(default)]
    pub roles: Vec<Snowflake>,
}

#[async_trait]
impl GatewayEvent for GuildMemberUpdateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        let cache = client.cache();
        let Some(guild) = cached_guild(cache, self.guild_id, "GUILD_MEMBER_UPDATE") else {
            return Ok(());
        };
        let member = upsert_member(cache, &guild, &self.user, self.nick.clone(), &self.roles);
        client.signals().member_updated.invoke(member).await?;
        Ok(())
    }
}

/// `GUILD_MEMBER_REMOVE`.
#[derive(Debug, Deserialize)]
pub struct GuildMemberRemoveEvent {
    /// Guild id.
    pub guild_id: Snowflake,
    /// The departed account.
    pub user: UserPayload,
}

#[async_trait]
impl GatewayEvent for GuildMemberRemoveEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        if let Some(guild) = cached_guild(client.cache(), self.guild_id, "GUILD_MEMBER_REMOVE") {
            guild.members().remove_from_server(self.user.id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Channel events
// ---------------------------------------------------------------------------

fn channel_guild(
    client: &GatewayClient,
    channel: &ChannelPayload,
    event: &'static str,
) -> Option<Arc<Guild>> {
    let Some(guild_id) = channel.guild_id else {
        debug!(channel_id = %channel.id, event, "direct message channel ignored");
        return None;
    };
    cached_guild(client.cache(), guild_id, event)
}

/// `CHANNEL_CREATE`.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct ChannelCreateEvent {
    /// The new channel.
    pub channel: ChannelPayload,
}

#[async_trait]
impl GatewayEvent for ChannelCreateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        if let Some(guild) = channel_guild(client, &self.channel, "CHANNEL_CREATE") {
            upsert_channel(&guild, &self.channel);
        }
        Ok(())
    }
}

/// `CHANNEL_UPDATE`.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct ChannelUpdateEvent {
    /// The channel's new state.
    pub channel: ChannelPayload,
}

#[async_trait]
impl GatewayEvent for ChannelUpdateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        if let Some(guild) = channel_guild(client, &self.channel, "CHANNEL_UPDATE") {
            upsert_channel(&guild, &self.channel);
        }
        Ok(())
    }
}

/// `CHANNEL_DELETE`.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct ChannelDeleteEvent {
    /// The deleted channel.
    pub channel: ChannelPayload,
}

#[async_trait]
impl GatewayEvent for ChannelDeleteEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        if let Some(guild) = channel_guild(client, &self.channel, "CHANNEL_DELETE") {
            guild.channels().remove_from_server(self.channel.id);
        }
        Ok(())
    }
}

/// `CHANNEL_PINS_UPDATE`.
#[derive(Debug, Deserialize)]
pub struct ChannelPinsUpdateEvent {
    /// Guild id; absent for direct messages.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// Channel whose pins changed.
    pub channel_id: Snowflake,
    /// Time of the most recent pin, absent when the last pin was removed.
    #[serde(default)]
    pub last_pin_timestamp: Option<String>,
}

#[async_trait]
impl GatewayEvent for ChannelPinsUpdateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        let Some(guild_id) = self.guild_id else {
            return Ok(());
        };
        let channel = cached_guild(client.cache(), guild_id, "CHANNEL_PINS_UPDATE")
            .and_then(|guild| guild.channels().get(self.channel_id));
        if let Some(channel) = channel {
            channel.set_last_pin_timestamp(self.last_pin_timestamp.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Message events
// ---------------------------------------------------------------------------

/// `MESSAGE_CREATE`.
#[derive(Debug, Deserialize)]
pub struct MessageCreateEvent {
    /// Message id.
    pub id: Snowflake,
    /// Channel id.
    pub channel_id: Snowflake,
    /// Guild id; absent for direct messages.
    #[serde(default)]
    pub guild_id: Option<Snowflake>,
    /// The author.
    pub author: UserPayload,
    /// Raw text.
    #[serde(default)]
    pub content: String,
}

#[async_trait]
impl GatewayEvent for MessageCreateEvent {
    async fn execute(&self, client: &GatewayClient) -> Result<(), GatewayError> {
        let cache = client.cache();
        let author = cache.upsert_user(self.author.id, self.author.data());
        let member = self
            .guild_id
            .and_then(|id| cache.guild(id))
            .and_then(|guild| guild.member(author.id()));
        let message = Message {
            id: self.id,
            channel_id: self.channel_id,
            guild_id: self.guild_id,
            author,
            member,
            content: self.content.clone(),
        };
        client.signals().message_created.invoke(message).await?;
        Ok(())
    }
}
