use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::{Error as WsError, http};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::types::{ChannelId, GuildId};
use crate::common::{Error, Result};
use crate::config::Config;
use crate::host::{GatewayHost, RawGatewayEvent};
use crate::player::{ControlLink, Player};
use crate::protocol::messages::{IncomingMessage, OutgoingMessage};
use crate::rest::TrackQuery;

pub mod monitor;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Client half of the control-plane connection to the audio node.
///
/// Owns the websocket, the per-guild player registry and the background
/// loops (event dispatch, shard health, voice-session listener). One per
/// bot process; cheap to clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) config: Config,
    pub(crate) host: Arc<dyn GatewayHost>,
    /// Write half of the control socket; `None` while disconnected. The
    /// mutex is the single choke point serializing outbound traffic.
    sink: Mutex<Option<WsSink>>,
    pub(crate) open: AtomicBool,
    /// Teardown signal for the loops of the current connect cycle.
    cancel: RwLock<CancellationToken>,
    stats: RwLock<serde_json::Map<String, Value>>,
    pub(crate) players: DashMap<GuildId, Arc<Player>>,
    /// In-flight per-shard resync tasks, replaced on flap and aborted on
    /// teardown.
    pub(crate) resyncs: DashMap<u64, JoinHandle<()>>,
    listener: parking_lot::Mutex<Option<JoinHandle<()>>>,
    rest: TrackQuery,
}

impl Connection {
    pub fn new(config: Config, host: Arc<dyn GatewayHost>) -> Result<Self> {
        let rest = TrackQuery::new(&config.node)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                host,
                sink: Mutex::new(None),
                open: AtomicBool::new(false),
                cancel: RwLock::new(CancellationToken::new()),
                stats: RwLock::new(serde_json::Map::new()),
                players: DashMap::new(),
                resyncs: DashMap::new(),
                listener: parking_lot::Mutex::new(None),
                rest,
            }),
        })
    }

    /// Open the control websocket and start the background loops. Blocks
    /// until the host gateway reports ready; a handshake failure
    /// propagates and is not retried here.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        inner.host.wait_until_ready().await;

        let mut request = inner.config.node.ws_url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header(&inner.config.node.password)?);
        headers.insert("Num-Shards", header(&inner.host.shard_count().to_string())?);
        headers.insert("User-Id", header(&inner.host.user_id().to_string())?);

        let (stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (write, read) = stream.split();

        *inner.sink.lock().await = Some(write);
        inner.open.store(true, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        *inner.cancel.write() = cancel.clone();

        tokio::spawn(run_dispatch(inner.clone(), read, cancel.clone()));
        tokio::spawn(monitor::run(inner.clone(), cancel.clone()));

        let events = inner.host.subscribe();
        let mut listener = inner.listener.lock();
        if let Some(task) = listener.take() {
            task.abort();
        }
        *listener = Some(tokio::spawn(run_voice_listener(
            inner.clone(),
            events,
            cancel,
        )));
        drop(listener);

        info!("connected to audio node at {}", inner.config.node.ws_url);
        Ok(())
    }

    /// Whether the control websocket is present and its transport open.
    pub fn connected(&self) -> bool {
        self.inner.connected()
    }

    /// Poll until the control connection is up.
    pub async fn wait_until_ready(&self) {
        let interval = Duration::from_millis(self.inner.config.timing.ready_poll_ms);
        while !self.connected() {
            tokio::time::sleep(interval).await;
        }
    }

    /// Send one envelope to the node. Refuses (rather than queues) while
    /// disconnected.
    pub async fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.inner.send(message).await
    }

    /// Tear down the control connection and discard the player registry.
    /// Player references obtained before this call no longer reflect
    /// node-side reality; re-resolve them via [`get_player`](Self::get_player).
    pub async fn disconnect(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.connected() {
            return Err(Error::NotConnected);
        }
        inner.open.store(false, Ordering::SeqCst);
        inner.cancel.read().cancel();

        let mut sink = inner.sink.lock().await;
        if let Some(mut ws) = sink.take() {
            let _ = ws.close().await;
        }
        drop(sink);

        inner.players.clear();
        inner.abort_resyncs();
        info!("disconnected from audio node; player registry discarded");
        Ok(())
    }

    /// The player for a guild, created and registered on first lookup.
    pub fn get_player(&self, guild_id: GuildId) -> Arc<Player> {
        self.inner.get_player(guild_id)
    }

    /// Last statistics blob pushed by the node.
    pub fn stats(&self) -> serde_json::Map<String, Value> {
        self.inner.stats.read().clone()
    }

    /// Search the node's REST endpoint. See [`TrackQuery::query`].
    pub async fn query(&self, identifier: &str) -> Result<Value> {
        self.inner.rest.query(identifier).await
    }

    /// Search with empty-result retries. See [`TrackQuery::query_with_retry`].
    pub async fn query_with_retry(
        &self,
        identifier: &str,
        retry_count: i32,
        retry_delay: Duration,
    ) -> Result<Value> {
        self.inner
            .rest
            .query_with_retry(identifier, retry_count, retry_delay)
            .await
    }
}

impl Inner {
    pub(crate) fn connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub(crate) async fn send(&self, message: OutgoingMessage) -> Result<()> {
        if !self.connected() {
            debug!("refusing to send while disconnected from the node");
            return Err(Error::NotConnected);
        }

        // A rejected channel means the player's believed connection is
        // stale; clear it before the reply leaves.
        if let OutgoingMessage::ValidationRes {
            guild_id,
            channel_id: Some(_),
            valid: false,
        } = &message
        {
            if let Some(player) = self.players.get(guild_id) {
                player.clear_channel();
            }
        }

        let text = serde_json::to_string(&message)?;
        let mut guard = self.sink.lock().await;
        let Some(ws) = guard.as_mut() else {
            return Err(Error::NotConnected);
        };
        if let Err(e) = ws.send(Message::Text(text.into())).await {
            self.open.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    pub(crate) fn get_player(self: &Arc<Self>, guild_id: GuildId) -> Arc<Player> {
        if let Some(player) = self.players.get(&guild_id) {
            return Arc::clone(player.value());
        }
        let link: Arc<dyn ControlLink> = self.clone();
        let player = Arc::new(Player::new(guild_id, Arc::downgrade(&link)));
        Arc::clone(&self.players.entry(guild_id).or_insert(player))
    }

    pub(crate) fn shard_open(&self, shard_id: u64) -> bool {
        self.host
            .shard(shard_id)
            .map(|shard| shard.is_open())
            .unwrap_or(false)
    }

    fn abort_resyncs(&self) {
        for entry in self.resyncs.iter() {
            entry.value().abort();
        }
        self.resyncs.clear();
    }

    /// Route one decoded envelope. Loop-level bookkeeping happens inline,
    /// in arrival order; event and validation handling is offloaded so a
    /// slow handler cannot stall the loop.
    fn dispatch(self: &Arc<Self>, message: IncomingMessage) {
        match message {
            IncomingMessage::Stats { payload } => {
                *self.stats.write() = payload;
            }
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                self.get_player(guild_id).apply_position_update(&state);
            }
            IncomingMessage::Event { guild_id, event } => {
                let player = self.get_player(guild_id);
                tokio::spawn(player.process_event(event));
            }
            IncomingMessage::ValidationReq {
                guild_id,
                channel_id,
            } => {
                let inner = self.clone();
                tokio::spawn(async move {
                    inner.answer_validation(guild_id, channel_id).await;
                });
            }
            IncomingMessage::IsConnectedReq { shard_id } => {
                let inner = self.clone();
                tokio::spawn(async move {
                    let connected = inner.shard_open(shard_id);
                    let _ = inner
                        .send(OutgoingMessage::IsConnectedRes {
                            shard_id,
                            connected,
                        })
                        .await;
                });
            }
            IncomingMessage::SendWs { shard_id, message } => {
                let host = self.host.clone();
                tokio::spawn(async move {
                    let Some(shard) = host.shard(shard_id) else {
                        return;
                    };
                    if !shard.is_open() {
                        return;
                    }
                    let _ = shard.send(message).await;
                });
            }
        }
    }

    async fn answer_validation(self: Arc<Self>, guild_id: GuildId, channel_id: Option<ChannelId>) {
        let valid = match channel_id {
            None => self.host.guild_exists(guild_id).await,
            Some(channel) => self.host.can_connect(guild_id, channel).await,
        };
        let _ = self
            .send(OutgoingMessage::ValidationRes {
                guild_id,
                channel_id,
                valid,
            })
            .await;
    }
}

#[async_trait]
impl ControlLink for Inner {
    async fn transmit(&self, message: OutgoingMessage) -> Result<()> {
        self.send(message).await
    }

    fn host(&self) -> Arc<dyn GatewayHost> {
        self.host.clone()
    }
}

fn header(value: &str) -> Result<http::HeaderValue> {
    http::HeaderValue::from_str(value)
        .map_err(|e| Error::Transport(WsError::HttpFormat(http::Error::from(e))))
}

/// Receives node envelopes until the transport closes or the connection is
/// torn down. Malformed frames and unknown ops are skipped; closure is a
/// quiet exit, not an error.
async fn run_dispatch(inner: Arc<Inner>, mut source: WsSource, cancel: CancellationToken) {
    while inner.connected() {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next() => frame,
        };
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!("control socket read error: {}", e);
                break;
            }
            None => break,
        };
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<IncomingMessage>(text.as_str()) {
            Ok(message) => inner.dispatch(message),
            Err(e) => {
                debug!("ignoring unhandled node payload: {}", e);
            }
        }
    }
    inner.open.store(false, Ordering::SeqCst);
    debug!("event dispatch loop stopped");
}

/// Forwards `VOICE_SERVER_UPDATE` dispatches to the node as `voiceUpdate`
/// envelopes. Anything else, or anything arriving while disconnected, is
/// dropped.
async fn run_voice_listener(
    inner: Arc<Inner>,
    mut events: mpsc::UnboundedReceiver<RawGatewayEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if !inner.connected() || event.op != 0 {
            continue;
        }
        if event.t.as_deref() != Some("VOICE_SERVER_UPDATE") {
            continue;
        }
        let guild_id = event
            .d
            .get("guild_id")
            .and_then(Value::as_str)
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(GuildId);
        let Some(guild_id) = guild_id else {
            continue;
        };
        let Some(session_id) = inner.host.voice_session_id(guild_id).await else {
            warn!("[{}] no cached voice session for server update", guild_id);
            continue;
        };
        let message = OutgoingMessage::VoiceUpdate {
            guild_id,
            session_id,
            event: event.d,
        };
        if let Err(e) = inner.send(message).await {
            debug!("[{}] dropping voice update: {}", guild_id, e);
        }
    }
}
