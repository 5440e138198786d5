//! Multiplexed, addressable socket transport.
//!
//! A single `MuxSocket` accepts many client connections, frames each one
//! with a length-delimited codec, and funnels every inbound frame into one
//! shared queue tagged with the sender's [`ClientId`]. Responses are routed
//! back through a per-client writer task, so a frame sent with a given id
//! reaches exactly the client that owns it and no other.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Upper bound on a single framed message.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Depth of the shared inbound queue and each per-client outbound queue.
const CHANNEL_DEPTH: usize = 1024;

/// Opaque client-identity token minted by the transport per connection.
///
/// The core passes it through unchanged; it is only meaningful to the
/// transport's routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Live connections: client id to outbound frame queue.
struct Registry {
    writers: DashMap<ClientId, mpsc::Sender<Bytes>>,
    next_id: AtomicU64,
}

/// The listening end of the multiplexed socket.
pub struct MuxSocket {
    identity: String,
    local_addr: SocketAddr,
    inbound_rx: mpsc::Receiver<(ClientId, Bytes)>,
    registry: Arc<Registry>,
}

impl MuxSocket {
    /// Bind a listener and start accepting connections.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let identity = format!("server-{}", Uuid::new_v4());

        let registry = Arc::new(Registry {
            writers: DashMap::new(),
            next_id: AtomicU64::new(1),
        });
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_DEPTH);

        tokio::spawn(accept_loop(listener, Arc::clone(&registry), inbound_tx));

        info!("{}: listening on {}", identity, local_addr);

        Ok(Self {
            identity,
            local_addr,
            inbound_rx,
            registry,
        })
    }

    /// Yield the next inbound frame from any connected client.
    ///
    /// Suspends the caller without blocking other tasks. Fails only when
    /// the socket is torn down.
    pub async fn receive(&mut self) -> Result<(ClientId, Bytes)> {
        self.inbound_rx
            .recv()
            .await
            .ok_or_else(|| AppError::Transport("socket torn down".to_string()))
    }

    /// A cloneable handle for sending responses from concurrent tasks.
    pub fn sender(&self) -> MuxSender {
        MuxSender {
            registry: Arc::clone(&self.registry),
        }
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Process-unique identity token generated at bind time.
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

/// Sending half of the multiplexed socket. Safe to clone into many tasks;
/// each client's writer task serializes access to its connection.
#[derive(Clone)]
pub struct MuxSender {
    registry: Arc<Registry>,
}

impl MuxSender {
    /// Deliver a frame to the client identified by `client`.
    pub async fn send(&self, client: ClientId, frame: Bytes) -> Result<()> {
        let writer = self
            .registry
            .writers
            .get(&client)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::Transport(format!("{} is not connected", client)))?;
        writer
            .send(frame)
            .await
            .map_err(|_| AppError::Transport(format!("{} hung up", client)))
    }
}

pub(crate) fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec()
}

async fn accept_loop(
    listener: TcpListener,
    registry: Arc<Registry>,
    inbound_tx: mpsc::Sender<(ClientId, Bytes)>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let client = ClientId(registry.next_id.fetch_add(1, Ordering::Relaxed));
                debug!("{} connected from {}", client, peer);
                spawn_connection(stream, client, Arc::clone(&registry), inbound_tx.clone());
            }
            Err(e) => {
                warn!("accept failed: {}", e);
            }
        }
    }
}

fn spawn_connection(
    stream: TcpStream,
    client: ClientId,
    registry: Arc<Registry>,
    inbound_tx: mpsc::Sender<(ClientId, Bytes)>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut frames_in = FramedRead::new(read_half, frame_codec());
    let mut frames_out = FramedWrite::new(write_half, frame_codec());

    let (writer_tx, mut writer_rx) = mpsc::channel::<Bytes>(CHANNEL_DEPTH);
    registry.writers.insert(client, writer_tx);

    tokio::spawn(async move {
        while let Some(frame) = writer_rx.recv().await {
            if let Err(e) = frames_out.send(frame).await {
                debug!("{} write failed: {}", client, e);
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(next) = frames_in.next().await {
            match next {
                Ok(frame) => {
                    if inbound_tx.send((client, frame.freeze())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("{} read failed: {}", client, e);
                    break;
                }
            }
        }
        registry.writers.remove(&client);
        debug!("{} disconnected", client);
    });
}
