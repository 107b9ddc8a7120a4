#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

use lavabridge::host::{GatewayHost, RawGatewayEvent, ShardGateway};
use lavabridge::{ChannelId, Config, GuildId, Result, UserId};

pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

/// Config pointed at the in-process node, with intervals short enough for
/// tests to observe transitions quickly.
pub fn test_config(addr: SocketAddr) -> Config {
    let mut config = Config::new(
        format!("ws://{addr}"),
        format!("http://{addr}"),
        "youshallnotpass",
    );
    config.timing.health_poll_ms = 20;
    config.timing.ready_poll_ms = 5;
    config.timing.resync_settle_ms = 80;
    config.timing.resync_pace_ms = 40;
    config
}

/// Poll `predicate` until it holds or the timeout lapses.
pub async fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !predicate() {
        assert!(Instant::now() < deadline, "condition not met within 3s");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// One scripted shard transport.
pub struct MockShard {
    pub open: AtomicBool,
    /// Raw payloads with their arrival instants, for pacing assertions.
    pub sent: Mutex<Vec<(Instant, String)>>,
}

impl MockShard {
    pub fn new(open: bool) -> Arc<Self> {
        Arc::new(Self {
            open: AtomicBool::new(open),
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ShardGateway for MockShard {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, payload: String) -> Result<()> {
        if !self.is_open() {
            return Err(lavabridge::Error::NotConnected);
        }
        self.sent.lock().push((Instant::now(), payload));
        Ok(())
    }
}

/// Scripted host framework: always ready, fixed identity, togglable
/// shards, and a broadcastable raw event feed.
pub struct MockHost {
    pub shard_count: u64,
    pub shards: DashMap<u64, Arc<MockShard>>,
    pub session_id: Option<String>,
    /// Outcome of `can_connect` permission checks.
    pub allow_connect: AtomicBool,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RawGatewayEvent>>>,
}

impl MockHost {
    pub fn new(shard_count: u64) -> Arc<Self> {
        let shards = DashMap::new();
        for shard_id in 0..shard_count {
            shards.insert(shard_id, MockShard::new(true));
        }
        Arc::new(Self {
            shard_count,
            shards,
            session_id: Some("sess-1".into()),
            allow_connect: AtomicBool::new(true),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn shard_handle(&self, shard_id: u64) -> Arc<MockShard> {
        self.shards.get(&shard_id).unwrap().clone()
    }

    pub fn emit(&self, event: RawGatewayEvent) {
        for tx in self.subscribers.lock().iter() {
            let _ = tx.send(event.clone());
        }
    }
}

#[async_trait]
impl GatewayHost for MockHost {
    async fn wait_until_ready(&self) {}

    fn shard_count(&self) -> u64 {
        self.shard_count
    }

    fn user_id(&self) -> UserId {
        UserId(159985870458322944)
    }

    fn shard(&self, shard_id: u64) -> Option<Arc<dyn ShardGateway>> {
        self.shards
            .get(&shard_id)
            .map(|shard| shard.clone() as Arc<dyn ShardGateway>)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<RawGatewayEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    async fn voice_session_id(&self, _guild_id: GuildId) -> Option<String> {
        self.session_id.clone()
    }

    async fn guild_exists(&self, _guild_id: GuildId) -> bool {
        true
    }

    async fn can_connect(&self, _guild_id: GuildId, _channel_id: ChannelId) -> bool {
        self.allow_connect.load(Ordering::SeqCst)
    }
}

/// In-process stand-in for the audio node's control websocket: records
/// every envelope the bridge sends and pushes scripted frames back.
pub struct FakeNode {
    pub addr: SocketAddr,
    pub received: Arc<Mutex<Vec<Value>>>,
    outbound: mpsc::UnboundedSender<String>,
}

impl FakeNode {
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let sink = received.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                sink.lock().push(serde_json::from_str(text.as_str()).unwrap());
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        }
                    }
                    out = outbound_rx.recv() => {
                        let Some(out) = out else { break };
                        if write.send(Message::Text(out.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            addr,
            received,
            outbound,
        }
    }

    /// Push one frame to the connected bridge.
    pub fn push(&self, frame: Value) {
        self.outbound.send(frame.to_string()).unwrap();
    }

    pub fn received_ops(&self, op: &str) -> Vec<Value> {
        self.received
            .lock()
            .iter()
            .filter(|frame| frame["op"] == op)
            .cloned()
            .collect()
    }
}
