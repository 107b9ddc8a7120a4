use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::common::Result;
use crate::common::types::{ChannelId, GuildId, UserId};

/// A raw `{op, t, d}` frame from the platform gateway, as surfaced by the
/// host framework's socket-event hook. `op` 0 is a dispatch; `t` names the
/// dispatched event.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGatewayEvent {
    pub op: i64,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

/// One shard's gateway transport, as exposed by the host framework.
#[async_trait]
pub trait ShardGateway: Send + Sync {
    /// Whether the shard's websocket is currently open.
    fn is_open(&self) -> bool;

    /// Send a raw JSON payload down the shard's websocket.
    async fn send(&self, payload: String) -> Result<()>;
}

/// The host bot framework, consumed at its boundary: readiness, identity,
/// shard transports, the raw event feed and the voice-state cache. The
/// bridge never mutates host state through this trait.
#[async_trait]
pub trait GatewayHost: Send + Sync {
    /// Blocks until the host reports its gateway connections ready.
    async fn wait_until_ready(&self);

    fn shard_count(&self) -> u64;

    fn user_id(&self) -> UserId;

    /// Transport handle for one shard, when the host has one.
    fn shard(&self, shard_id: u64) -> Option<Arc<dyn ShardGateway>>;

    /// Subscribe to the host's raw socket events. Each call returns an
    /// independent feed.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<RawGatewayEvent>;

    /// The bot's voice session id for a guild, from the host's voice-state
    /// cache. `None` when the bot has no voice state there yet.
    async fn voice_session_id(&self, guild_id: GuildId) -> Option<String>;

    /// Whether the guild is known to the host.
    async fn guild_exists(&self, guild_id: GuildId) -> bool;

    /// Whether the channel exists and the bot holds the connect permission
    /// for it.
    async fn can_connect(&self, guild_id: GuildId, channel_id: ChannelId) -> bool;
}
