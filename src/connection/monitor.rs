use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Inner;
use crate::common::types::{ChannelId, GuildId};

/// Periodic shard-liveness sampler.
///
/// Only transitions matter: a down-sample is recorded but nothing is torn
/// down, since the platform side usually self-heals; the matching
/// up-transition schedules a resync of every player that was mapped to
/// the shard at detection time.
pub(crate) async fn run(inner: Arc<Inner>, cancel: CancellationToken) {
    let mut down: HashSet<u64> = HashSet::new();
    let mut interval =
        tokio::time::interval(Duration::from_millis(inner.config.timing.health_poll_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    while inner.connected() {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let shard_count = inner.host.shard_count();
        let mut by_shard: HashMap<u64, Vec<(GuildId, ChannelId)>> = HashMap::new();
        for entry in inner.players.iter() {
            let player = entry.value();
            if let Some(channel_id) = player.channel_id() {
                by_shard
                    .entry(player.guild_id().shard_id(shard_count))
                    .or_default()
                    .push((player.guild_id(), channel_id));
            }
        }

        for (shard_id, members) in by_shard {
            if inner.shard_open(shard_id) {
                if down.remove(&shard_id) {
                    info!(
                        "shard {} recovered; scheduling resync of {} players",
                        shard_id,
                        members.len()
                    );
                    let task = tokio::spawn(resync_shard(
                        inner.clone(),
                        shard_id,
                        members,
                        cancel.clone(),
                    ));
                    if let Some(stale) = inner.resyncs.insert(shard_id, task) {
                        stale.abort();
                    }
                }
            } else if down.insert(shard_id) {
                debug!(
                    "shard {} went down; holding {} players",
                    shard_id,
                    members.len()
                );
            }
        }
    }
    debug!("shard health monitor stopped");
}

/// Reissues connects for one recovered shard. The settle period covers the
/// platform's own session-resume handshake; the pacing delay respects its
/// connection-rate limits. A failed send abandons the remainder quietly.
async fn resync_shard(
    inner: Arc<Inner>,
    shard_id: u64,
    members: Vec<(GuildId, ChannelId)>,
    cancel: CancellationToken,
) {
    let settle = Duration::from_millis(inner.config.timing.resync_settle_ms);
    let pace = Duration::from_millis(inner.config.timing.resync_pace_ms);

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(settle) => {}
    }

    for (guild_id, channel_id) in members {
        if cancel.is_cancelled() || !inner.connected() {
            break;
        }
        let Some(player) = inner.players.get(&guild_id).map(|p| Arc::clone(p.value())) else {
            continue;
        };
        if let Err(e) = player.connect(channel_id).await {
            debug!("[{}] resync aborted: {}", guild_id, e);
            break;
        }
        debug!(
            "[{}] reconnected to {} after shard {} recovery",
            guild_id, channel_id, shard_id
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pace) => {}
        }
    }
}
