//! Line-framed TCP gossip between gateway nodes.
//!
//! ## Wire format
//!
//! One UTF-8 JSON envelope per line, newline-terminated:
//!
//! ```text
//! {"type": "NEW_BLOCK", "payload": {...}, "senderId": "..."}\n
//! ```
//!
//! JSON string escaping guarantees a serialised envelope never contains a
//! raw newline, so `\n` is an unambiguous frame delimiter. Lines are capped
//! at 1 MiB; a peer that overflows the cap is disconnected (unbounded lines
//! are a denial-of-service vector). Malformed lines are logged and skipped
//! without closing the socket.
//!
//! ## Protocol
//!
//! * Initiator sends `HANDSHAKE` then `REQUEST_CHAIN` on connect.
//! * `REQUEST_CHAIN` is answered with `RESPONSE_CHAIN` carrying the full
//!   local history; the receiver runs longest-valid-chain resolution.
//! * `NEW_BLOCK` is appended if it extends the tip, then re-broadcast to
//!   every connected peer. Flooding terminates because a re-delivered block
//!   collides with an already-appended index and is rejected.
//! * `NEW_TRANSACTION` is reserved.
//!
//! Failed dials are logged and abandoned; there is no reconnect loop. When
//! a broadcast finds zero live peers and an offline queue is wired, the
//! envelope is queued for later replay.

use crate::block::PatternBlock;
use crate::chain::ReplicationLog;
use crate::queue::{OfflineQueue, ProcessReport, QueueKind};
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maximum accepted line length.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Gossip message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Handshake,
    RequestChain,
    ResponseChain,
    NewBlock,
    /// Reserved for future use.
    NewTransaction,
}

/// The wire envelope: `{type, payload, senderId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub payload: Value,
    #[serde(rename = "senderId")]
    pub sender_id: String,
}

/// Events emitted to local observers.
#[derive(Debug, Clone)]
pub enum GossipEvent {
    /// A peer's block was appended to the local chain.
    BlockAppended(PatternBlock),
    /// The local chain was replaced by a longer valid peer chain.
    ChainReplaced { length: usize },
}

/// Network knobs.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Listen port; 0 picks an ephemeral port.
    pub listen_port: u16,
    /// Peers dialled once at startup, `host:port`.
    pub bootstrap: Vec<String>,
    /// Connection cap; accepts beyond it are dropped.
    pub max_peers: usize,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            listen_port: 7432,
            bootstrap: Vec::new(),
            max_peers: 16,
        }
    }
}

/// One gossip node: a listener plus outbound connections, sharing the
/// replication log with the rest of the gateway.
pub struct GossipNode {
    node_id: String,
    config: GossipConfig,
    chain: Arc<Mutex<ReplicationLog>>,
    /// Connected peers keyed `ip:port`; the value is the writer-task inbox.
    peers: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    events: broadcast::Sender<GossipEvent>,
    queue: Option<Arc<OfflineQueue>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl GossipNode {
    pub fn new(
        config: GossipConfig,
        chain: Arc<Mutex<ReplicationLog>>,
        queue: Option<Arc<OfflineQueue>>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            node_id: Uuid::new_v4().to_string(),
            config,
            chain,
            peers: Mutex::new(HashMap::new()),
            events,
            queue,
            tasks: Mutex::new(Vec::new()),
            local_addr: Mutex::new(None),
        })
    }

    /// This node's gossip identity.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Bound listener address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("local_addr lock poisoned")
    }

    /// Number of live peer connections.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Subscribes to locally observed replication events.
    pub fn subscribe(&self) -> broadcast::Receiver<GossipEvent> {
        self.events.subscribe()
    }

    /// Binds the listener, spawns the accept loop, and dials every
    /// bootstrap peer once. Dial failures are logged and abandoned.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.listen_port)).await?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().expect("local_addr lock poisoned") = Some(addr);
        info!("gossip listening on {addr} (node {})", self.node_id);

        let node = Arc::clone(self);
        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!("inbound peer {peer}");
                        node.register_peer(stream, peer.to_string(), false);
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                    }
                }
            }
        });
        self.tasks.lock().expect("tasks lock poisoned").push(accept_loop);

        for addr in self.config.bootstrap.clone() {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    debug!("outbound peer {addr}");
                    self.register_peer(stream, addr, true);
                }
                Err(e) => {
                    // No reconnect loop: a dead bootstrap peer is dropped.
                    warn!("bootstrap dial to {addr} failed: {e}");
                }
            }
        }
        Ok(addr)
    }

    /// Wires up the reader and writer tasks for one connection. When the
    /// peer cap is reached the stream is dropped on the floor.
    fn register_peer(self: &Arc<Self>, stream: TcpStream, key: String, initiator: bool) {
        {
            let peers = self.peers.lock().expect("peers lock poisoned");
            if peers.len() >= self.config.max_peers {
                warn!("peer cap {} reached; dropping {key}", self.config.max_peers);
                return;
            }
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        self.peers
            .lock()
            .expect("peers lock poisoned")
            .insert(key.clone(), tx);

        let writer = tokio::spawn(writer_loop(write_half, rx, key.clone()));
        let node = Arc::clone(self);
        let reader_key = key.clone();
        let reader = tokio::spawn(async move {
            let mut lines = LineReader::new(read_half);
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => node.handle_line(&line, &reader_key),
                    Ok(None) => {
                        debug!("peer {reader_key} closed");
                        break;
                    }
                    Err(e) => {
                        warn!("dropping peer {reader_key}: {e}");
                        break;
                    }
                }
            }
            node.remove_peer(&reader_key);
        });

        {
            let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
            tasks.push(writer);
            tasks.push(reader);
        }

        if initiator {
            self.send_to(&key, Envelope {
                kind: MessageKind::Handshake,
                payload: Value::Null,
                sender_id: self.node_id.clone(),
            });
            self.send_to(&key, Envelope {
                kind: MessageKind::RequestChain,
                payload: Value::Null,
                sender_id: self.node_id.clone(),
            });
        }
    }

    fn remove_peer(&self, key: &str) {
        if self.peers.lock().expect("peers lock poisoned").remove(key).is_some() {
            debug!("peer {key} removed");
        }
    }

    /// Dispatches one inbound line. Malformed lines are logged and skipped;
    /// the connection stays up.
    fn handle_line(self: &Arc<Self>, line: &str, peer_key: &str) {
        let envelope: Envelope = match serde_json::from_str(line) {
            Ok(env) => env,
            Err(e) => {
                warn!("malformed line from {peer_key}: {e}");
                return;
            }
        };

        match envelope.kind {
            MessageKind::Handshake => {
                debug!("handshake from {} via {peer_key}", envelope.sender_id);
            }
            MessageKind::RequestChain => {
                let blocks = {
                    let chain = self.chain.lock().expect("chain lock poisoned");
                    chain.blocks().to_vec()
                };
                let reply = Envelope {
                    kind: MessageKind::ResponseChain,
                    payload: serde_json::to_value(blocks).unwrap_or(Value::Null),
                    sender_id: self.node_id.clone(),
                };
                self.send_to(peer_key, reply);
            }
            MessageKind::ResponseChain => {
                let foreign: Vec<PatternBlock> = match serde_json::from_value(envelope.payload) {
                    Ok(blocks) => blocks,
                    Err(e) => {
                        warn!("undecodable chain from {peer_key}: {e}");
                        return;
                    }
                };
                let replaced = {
                    let mut chain = self.chain.lock().expect("chain lock poisoned");
                    chain.resolve(vec![foreign])
                };
                if replaced {
                    let length = self.chain.lock().expect("chain lock poisoned").len();
                    info!("adopted peer chain of length {length}");
                    let _ = self.events.send(GossipEvent::ChainReplaced { length });
                }
            }
            MessageKind::NewBlock => {
                let block: PatternBlock = match serde_json::from_value(envelope.payload) {
                    Ok(block) => block,
                    Err(e) => {
                        warn!("undecodable block from {peer_key}: {e}");
                        return;
                    }
                };
                let accepted = {
                    let mut chain = self.chain.lock().expect("chain lock poisoned");
                    chain.add_block(block.clone())
                };
                if accepted {
                    let _ = self.events.send(GossipEvent::BlockAppended(block.clone()));
                    // Flooding gossip: re-broadcast after local acceptance.
                    // The duplicate-index rejection above terminates loops.
                    if let Err(e) = self.broadcast_block(&block) {
                        warn!("re-broadcast of block {} failed: {e}", block.index);
                    }
                }
            }
            MessageKind::NewTransaction => {
                debug!("NEW_TRANSACTION from {peer_key} ignored (reserved)");
            }
        }
    }

    fn send_to(&self, key: &str, envelope: Envelope) {
        let line = match serde_json::to_string(&envelope) {
            Ok(line) => line,
            Err(e) => {
                warn!("envelope serialization failed: {e}");
                return;
            }
        };
        let peers = self.peers.lock().expect("peers lock poisoned");
        if let Some(tx) = peers.get(key) {
            let _ = tx.send(line);
        }
    }

    /// Serialises once and writes to every connected peer. With zero live
    /// peers and an offline queue wired, the envelope is queued instead.
    pub fn broadcast(&self, envelope: &Envelope) -> Result<()> {
        let line = serde_json::to_string(envelope)?;
        let mut dead = Vec::new();
        {
            let peers = self.peers.lock().expect("peers lock poisoned");
            if peers.is_empty() {
                if let Some(queue) = &self.queue {
                    let kind = match envelope.kind {
                        MessageKind::NewBlock => QueueKind::Block,
                        _ => QueueKind::Pattern,
                    };
                    let id = queue.enqueue(kind, serde_json::to_value(envelope)?)?;
                    debug!("no peers reachable; queued envelope {id}");
                }
                return Ok(());
            }
            for (key, tx) in peers.iter() {
                if tx.send(line.clone()).is_err() {
                    dead.push(key.clone());
                }
            }
        }
        for key in dead {
            self.remove_peer(&key);
        }
        Ok(())
    }

    /// Broadcasts a locally accepted block.
    pub fn broadcast_block(&self, block: &PatternBlock) -> Result<()> {
        self.broadcast(&Envelope {
            kind: MessageKind::NewBlock,
            payload: serde_json::to_value(block)?,
            sender_id: self.node_id.clone(),
        })
    }

    /// Replays queued envelopes to the now-reachable peers. Items are
    /// removed only when at least one peer holds a live connection.
    pub fn replay_offline(&self) -> Result<ProcessReport> {
        let Some(queue) = &self.queue else {
            return Ok(ProcessReport::default());
        };
        queue.process(|item| {
            if self.peer_count() == 0 {
                return false;
            }
            match serde_json::from_value::<Envelope>(item.payload.clone()) {
                Ok(envelope) => self.broadcast(&envelope).is_ok(),
                Err(e) => {
                    // An undecodable item can never be delivered; drop it.
                    warn!("dropping undecodable queue item {}: {e}", item.id);
                    true
                }
            }
        })
    }

    /// Destroys all sockets and the listener.
    pub fn stop(&self) {
        for task in self.tasks.lock().expect("tasks lock poisoned").drain(..) {
            task.abort();
        }
        self.peers.lock().expect("peers lock poisoned").clear();
        info!("gossip node {} stopped", self.node_id);
    }
}

/// Drains a peer's outbound inbox onto the socket.
async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<String>,
    key: String,
) {
    while let Some(line) = rx.recv().await {
        let framed = format!("{line}\n");
        if let Err(e) = write_half.write_all(framed.as_bytes()).await {
            warn!("write to {key} failed: {e}");
            break;
        }
    }
}

/// Newline framing with a hard length cap.
///
/// Reads raw chunks, splits on `\n`, and errors out (dropping the
/// connection) as soon as a line exceeds [`MAX_LINE_BYTES`].
struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    async fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // trailing \n
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            if self.buf.len() > MAX_LINE_BYTES {
                return Err(LedgerError::LineTooLong(MAX_LINE_BYTES));
            }
            let mut chunk = [0u8; 8192];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                // EOF; a partial trailing line is discarded.
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}
