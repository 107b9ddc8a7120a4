use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::types::{ChannelId, GuildId};

use super::events::RemoteEvent;

/// Envelopes sent to the audio node over the control websocket.
///
/// Guild and channel ids are string-typed on the wire by construction,
/// through the id newtypes' serde impls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
#[serde(rename_all = "camelCase")]
pub enum OutgoingMessage {
    #[serde(rename_all = "camelCase")]
    VoiceUpdate {
        guild_id: GuildId,
        session_id: String,
        /// The platform's raw `VOICE_SERVER_UPDATE` payload, forwarded
        /// verbatim.
        event: Value,
    },

    #[serde(rename_all = "camelCase")]
    Play {
        guild_id: GuildId,
        track: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
    },

    #[serde(rename_all = "camelCase")]
    Pause { guild_id: GuildId, pause: bool },

    #[serde(rename_all = "camelCase")]
    Stop { guild_id: GuildId },

    #[serde(rename_all = "camelCase")]
    Seek { guild_id: GuildId, position: u64 },

    #[serde(rename_all = "camelCase")]
    Volume { guild_id: GuildId, volume: i64 },

    /// Reply to a `validationReq` connectivity check.
    #[serde(rename_all = "camelCase")]
    ValidationRes {
        guild_id: GuildId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel_id: Option<ChannelId>,
        valid: bool,
    },

    /// Reply to an `isConnectedReq` shard liveness check.
    #[serde(rename_all = "camelCase")]
    IsConnectedRes { shard_id: u64, connected: bool },
}

/// Envelopes received from the audio node. Ops outside this set are
/// skipped by the dispatch loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op")]
#[serde(rename_all = "camelCase")]
pub enum IncomingMessage {
    /// Node-wide statistics, kept opaque; everything but the op tag.
    Stats {
        #[serde(flatten)]
        payload: serde_json::Map<String, Value>,
    },

    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        guild_id: GuildId,
        state: PlayerUpdateState,
    },

    #[serde(rename_all = "camelCase")]
    Event {
        guild_id: GuildId,
        #[serde(flatten)]
        event: RemoteEvent,
    },

    #[serde(rename_all = "camelCase")]
    ValidationReq {
        guild_id: GuildId,
        #[serde(default)]
        channel_id: Option<ChannelId>,
    },

    #[serde(rename_all = "camelCase")]
    IsConnectedReq { shard_id: u64 },

    #[serde(rename = "sendWS")]
    #[serde(rename_all = "camelCase")]
    SendWs { shard_id: u64, message: String },
}

/// Nested `state` object of a `playerUpdate` envelope, in milliseconds.
/// `position` is absent between tracks.
#[derive(Debug, Clone, Deserialize)]
pub struct PlayerUpdateState {
    /// Node-side wall clock at the time of the report.
    pub time: u64,
    #[serde(default)]
    pub position: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_envelope_stringifies_guild_id() {
        let msg = OutgoingMessage::Play {
            guild_id: GuildId(103735912054587392),
            track: "QAAAjQIAJVJp".into(),
            start_time: None,
            end_time: None,
        };
        let json: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["op"], "play");
        assert_eq!(json["guildId"], "103735912054587392");
        assert!(json.get("startTime").is_none());
        assert!(json.get("endTime").is_none());
    }

    #[test]
    fn play_envelope_carries_offsets_when_set() {
        let msg = OutgoingMessage::Play {
            guild_id: GuildId(1),
            track: "QAAAjQIAJVJp".into(),
            start_time: Some(15_000),
            end_time: Some(30_000),
        };
        let json: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["startTime"], 15_000);
        assert_eq!(json["endTime"], 30_000);
    }

    #[test]
    fn stats_payload_drops_op_tag() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"op":"stats","players":3,"playingPlayers":1}"#).unwrap();
        let IncomingMessage::Stats { payload } = msg else {
            panic!("expected stats");
        };
        assert_eq!(payload.get("players"), Some(&Value::from(3)));
        assert!(payload.get("op").is_none());
    }

    #[test]
    fn player_update_position_is_optional() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"op":"playerUpdate","guildId":"42","state":{"time":1500000000000}}"#,
        )
        .unwrap();
        let IncomingMessage::PlayerUpdate { guild_id, state } = msg else {
            panic!("expected playerUpdate");
        };
        assert_eq!(guild_id, GuildId(42));
        assert_eq!(state.position, None);
    }

    #[test]
    fn event_envelope_decodes_track_end() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"op":"event","guildId":"42","type":"TrackEndEvent","track":"QAAA","reason":"FINISHED"}"#,
        )
        .unwrap();
        let IncomingMessage::Event { guild_id, event } = msg else {
            panic!("expected event");
        };
        assert_eq!(guild_id, GuildId(42));
        assert!(matches!(
            event,
            RemoteEvent::TrackEnd { reason: Some(r), .. } if r == "FINISHED"
        ));
    }

    #[test]
    fn unknown_event_type_is_tolerated() {
        let msg: IncomingMessage = serde_json::from_str(
            r#"{"op":"event","guildId":"42","type":"SegmentSkippedEvent","segment":{}}"#,
        )
        .unwrap();
        let IncomingMessage::Event { event, .. } = msg else {
            panic!("expected event");
        };
        assert!(matches!(event, RemoteEvent::Unknown));
    }

    #[test]
    fn send_ws_op_tag_is_uppercased() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"op":"sendWS","shardId":2,"message":"{}"}"#).unwrap();
        assert!(matches!(
            msg,
            IncomingMessage::SendWs { shard_id: 2, .. }
        ));
    }
}
