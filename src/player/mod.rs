use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::types::{ChannelId, GuildId};
use crate::common::{Error, Result};
use crate::host::{GatewayHost, ShardGateway};
use crate::protocol::events::RemoteEvent;
use crate::protocol::messages::{OutgoingMessage, PlayerUpdateState};

pub const VOLUME_MAX: i64 = 150;
pub const VOLUME_DEFAULT: i64 = 100;

/// Outbound half of the control connection, as seen by players. The
/// bridge's `Connection` is the production implementation.
#[async_trait]
pub trait ControlLink: Send + Sync {
    async fn transmit(&self, message: OutgoingMessage) -> Result<()>;

    fn host(&self) -> Arc<dyn GatewayHost>;
}

/// Handler invoked when the current track ends naturally. Both variants
/// receive the player; the deferred one is awaited to completion.
pub enum TrackEndCallback {
    Sync(Box<dyn Fn(Arc<Player>) + Send + Sync>),
    Async(Box<dyn Fn(Arc<Player>) -> BoxFuture<'static, ()> + Send + Sync>),
}

struct PlaybackState {
    channel_id: Option<ChannelId>,
    paused: bool,
    playing: bool,
    /// Estimated offset in seconds, lag-compensated. Cleared when the node
    /// reports the track gone, not on a manual stop.
    position: Option<f64>,
    volume: i64,
}

/// Per-guild playback state machine. Obtained via
/// [`Connection::get_player`](crate::connection::Connection::get_player);
/// references do not survive a `disconnect` of the control connection, so
/// re-resolve rather than holding one long term.
pub struct Player {
    guild_id: GuildId,
    link: Weak<dyn ControlLink>,
    state: Mutex<PlaybackState>,
    callback: Mutex<Option<Arc<TrackEndCallback>>>,
}

impl Player {
    pub(crate) fn new(guild_id: GuildId, link: Weak<dyn ControlLink>) -> Self {
        Self {
            guild_id,
            link,
            state: Mutex::new(PlaybackState {
                channel_id: None,
                paused: false,
                playing: false,
                position: None,
                volume: VOLUME_DEFAULT,
            }),
            callback: Mutex::new(None),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Channel the player believes it occupies. A `Some` here does not
    /// guarantee the node still holds an active audio session.
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.state.lock().channel_id
    }

    pub fn connected(&self) -> bool {
        self.state.lock().channel_id.is_some()
    }

    pub fn paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Paused dominates: a paused player is not `playing`.
    pub fn playing(&self) -> bool {
        let state = self.state.lock();
        state.playing && !state.paused
    }

    /// Neither playing nor paused.
    pub fn stopped(&self) -> bool {
        let state = self.state.lock();
        !state.playing && !state.paused
    }

    /// Estimated playback offset in seconds.
    pub fn position(&self) -> Option<f64> {
        self.state.lock().position
    }

    pub fn volume(&self) -> i64 {
        self.state.lock().volume
    }

    /// Install (or clear) the single-slot track-end handler.
    pub fn set_track_end_callback(&self, callback: Option<TrackEndCallback>) {
        *self.callback.lock() = callback.map(Arc::new);
    }

    /// Ask the platform to place the bot in `channel_id`. Returns without
    /// waiting for confirmation; that arrives asynchronously through the
    /// voice-session listener.
    pub async fn connect(&self, channel_id: ChannelId) -> Result<()> {
        let shard = self.shard()?;
        shard
            .send(voice_state_update(self.guild_id, Some(channel_id)))
            .await?;
        self.state.lock().channel_id = Some(channel_id);
        Ok(())
    }

    /// Leave the voice channel. The believed channel is cleared whether or
    /// not the platform accepted the update.
    pub async fn disconnect(&self) -> Result<()> {
        let sent = match self.shard() {
            Ok(shard) => shard.send(voice_state_update(self.guild_id, None)).await,
            Err(e) => Err(e),
        };
        self.state.lock().channel_id = None;
        sent
    }

    /// Start a track, replacing whatever is playing. Offsets are whole
    /// milliseconds into the track.
    pub async fn play(
        &self,
        track: &str,
        start_time: Option<u64>,
        end_time: Option<u64>,
    ) -> Result<()> {
        self.transmit(OutgoingMessage::Play {
            guild_id: self.guild_id,
            track: track.to_string(),
            start_time,
            end_time,
        })
        .await?;
        self.state.lock().playing = true;
        Ok(())
    }

    /// Set the pause state. A request for the current state sends nothing.
    pub async fn set_pause(&self, pause: bool) -> Result<()> {
        if self.state.lock().paused == pause {
            return Ok(());
        }
        self.transmit(OutgoingMessage::Pause {
            guild_id: self.guild_id,
            pause,
        })
        .await?;
        self.state.lock().paused = pause;
        Ok(())
    }

    /// Stop playback. The last observed position is kept for inspection
    /// until the node reports the track ended.
    pub async fn stop(&self) -> Result<()> {
        self.transmit(OutgoingMessage::Stop {
            guild_id: self.guild_id,
        })
        .await?;
        self.state.lock().playing = false;
        Ok(())
    }

    /// Seek to an offset, in seconds.
    pub async fn seek(&self, position_secs: f64) -> Result<()> {
        self.transmit(OutgoingMessage::Seek {
            guild_id: self.guild_id,
            position: (position_secs * 1000.0) as u64,
        })
        .await
    }

    /// Set the volume, clamped to `[0, 150]`. Returns the value actually
    /// applied.
    pub async fn set_volume(&self, volume: i64) -> Result<i64> {
        let volume = volume.clamp(0, VOLUME_MAX);
        self.transmit(OutgoingMessage::Volume {
            guild_id: self.guild_id,
            volume,
        })
        .await?;
        self.state.lock().volume = volume;
        Ok(volume)
    }

    /// Apply a `playerUpdate` report, compensating for delivery lag:
    /// `estimated = reported_position + (now - reported_time)`.
    pub(crate) fn apply_position_update(&self, update: &PlayerUpdateState) {
        let Some(position) = update.position else {
            return;
        };
        let lag = unix_time_secs() - update.time as f64 / 1000.0;
        self.state.lock().position = Some(position as f64 / 1000.0 + lag);
    }

    /// Handle a player-scoped node event. Runs on its own task so a slow
    /// track-end handler cannot stall the dispatch loop.
    pub(crate) async fn process_event(self: Arc<Self>, event: RemoteEvent) {
        match event {
            RemoteEvent::TrackEnd { reason, .. } => {
                {
                    let mut state = self.state.lock();
                    state.playing = false;
                    state.position = None;
                }
                debug!(
                    "[{}] track ended ({})",
                    self.guild_id,
                    reason.as_deref().unwrap_or("unknown")
                );
                let callback = self.callback.lock().clone();
                if let Some(callback) = callback {
                    match &*callback {
                        TrackEndCallback::Sync(handler) => handler(self.clone()),
                        TrackEndCallback::Async(handler) => handler(self.clone()).await,
                    }
                }
            }
            RemoteEvent::TrackException { error, .. } => {
                warn!(
                    "[{}] track exception: {}",
                    self.guild_id,
                    error.as_deref().unwrap_or("unknown")
                );
            }
            RemoteEvent::TrackStuck { threshold_ms, .. } => {
                warn!(
                    "[{}] track stuck past {}ms",
                    self.guild_id,
                    threshold_ms.unwrap_or(0)
                );
            }
            RemoteEvent::WebSocketClosed { code, reason, .. } => {
                debug!(
                    "[{}] voice websocket closed: code={:?} reason={:?}",
                    self.guild_id, code, reason
                );
            }
            RemoteEvent::Unknown => {}
        }
    }

    /// The node rejected this player's channel; its believed connection is
    /// stale.
    pub(crate) fn clear_channel(&self) {
        self.state.lock().channel_id = None;
    }

    fn link(&self) -> Result<Arc<dyn ControlLink>> {
        self.link.upgrade().ok_or(Error::NotConnected)
    }

    async fn transmit(&self, message: OutgoingMessage) -> Result<()> {
        self.link()?.transmit(message).await
    }

    /// Transport of the shard that owns this guild.
    fn shard(&self) -> Result<Arc<dyn ShardGateway>> {
        let host = self.link()?.host();
        let shard = host
            .shard(self.guild_id.shard_id(host.shard_count()))
            .ok_or(Error::NotConnected)?;
        if !shard.is_open() {
            return Err(Error::NotConnected);
        }
        Ok(shard)
    }
}

/// Platform voice-state update (gateway op 4). Ids are stringified for the
/// same precision reasons as the control protocol; a null channel means
/// leave.
fn voice_state_update(guild_id: GuildId, channel_id: Option<ChannelId>) -> String {
    serde_json::json!({
        "op": 4,
        "d": {
            "guild_id": guild_id,
            "channel_id": channel_id,
            "self_mute": false,
            "self_deaf": false,
        }
    })
    .to_string()
}

fn unix_time_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
