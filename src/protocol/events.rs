use serde::Deserialize;

/// Player-scoped events emitted by the node, discriminated by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum RemoteEvent {
    /// The current track finished. `reason` distinguishes a natural finish
    /// from stops, replacements and load failures.
    #[serde(rename = "TrackEndEvent")]
    #[serde(rename_all = "camelCase")]
    TrackEnd {
        #[serde(default)]
        track: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "TrackExceptionEvent")]
    #[serde(rename_all = "camelCase")]
    TrackException {
        #[serde(default)]
        track: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },

    #[serde(rename = "TrackStuckEvent")]
    #[serde(rename_all = "camelCase")]
    TrackStuck {
        #[serde(default)]
        track: Option<String>,
        #[serde(default)]
        threshold_ms: Option<u64>,
    },

    #[serde(rename = "WebSocketClosedEvent")]
    #[serde(rename_all = "camelCase")]
    WebSocketClosed {
        #[serde(default)]
        code: Option<u16>,
        #[serde(default)]
        reason: Option<String>,
        #[serde(default)]
        by_remote: Option<bool>,
    },

    /// Event types this revision does not know about.
    #[serde(other)]
    Unknown,
}
