use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the bridge.
///
/// `NotConnected` is the one recoverable class callers are expected to
/// handle; it is raised synchronously by any operation that needed a
/// transport that is absent or closed, and is never retried internally.
#[derive(Debug, Error)]
pub enum Error {
    /// The control connection (or the shard transport a voice-state update
    /// required) is not open.
    #[error("not connected to the audio node")]
    NotConnected,

    /// Websocket handshake or send failure.
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// REST request failure from the track query client.
    #[error("rest request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An envelope could not be encoded.
    #[error("payload encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
