//! Client-side bridge between a sharded platform gateway and a
//! Lavalink-class audio node.
//!
//! The bridge keeps per-guild playback state consistent across both sides:
//! a persistent control websocket carries command and event envelopes to
//! and from the node, a listener forwards the platform's voice-server
//! assignments, and a shard health monitor reconnects players after a
//! shard outage. Playback itself stays on the node; this crate neither
//! decodes audio nor queues tracks.

pub mod common;
pub mod config;
pub mod connection;
pub mod host;
pub mod player;
pub mod protocol;
pub mod rest;

pub use common::errors::{Error, Result};
pub use common::types::{ChannelId, GuildId, UserId};
pub use config::{Config, NodeConfig, TimingConfig};
pub use connection::Connection;
pub use host::{GatewayHost, RawGatewayEvent, ShardGateway};
pub use player::{Player, TrackEndCallback};
pub use rest::TrackQuery;
