//! Websocket gossip hub and client
//!
//! Each node runs a hub peers connect to; outbound fan-out rides a
//! broadcast channel, direct sends ride a per-peer channel. Inbound
//! messages are decoded and handed to the node's routing task.

use crate::transport::{GossipMessage, PeerTransport, ResponseCallback};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use ledger_runtime::now_ms;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, connect_async, tungstenite::Message};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct PeerInfo {
    direct: mpsc::Sender<Vec<u8>>,
    #[allow(dead_code)]
    connected_at: u64,
}

#[derive(Debug, Default)]
struct HubStats {
    messages_broadcast: u64,
    peers_connected: usize,
}

/// Gossip hub (run by every node)
pub struct GossipHub {
    /// Fan-out channel to all connected peers
    tx: broadcast::Sender<Vec<u8>>,
    /// Connected peers keyed by remote address
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
    /// Known endpoints of other ledgers, keyed by network id
    networks: RwLock<HashMap<String, String>>,
    /// Decoded inbound messages for the node's routing task
    inbound: mpsc::Sender<GossipMessage>,
    stats: Arc<RwLock<HubStats>>,
}

impl GossipHub {
    pub fn new(inbound: mpsc::Sender<GossipMessage>) -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            tx,
            peers: Arc::new(RwLock::new(HashMap::new())),
            networks: RwLock::new(HashMap::new()),
            inbound,
            stats: Arc::new(RwLock::new(HubStats::default())),
        }
    }

    /// Record another ledger's gossip endpoint
    pub fn register_network(&self, network: &str, endpoint: &str) {
        self.networks
            .write()
            .insert(network.to_string(), endpoint.to_string());
    }

    /// Start listening for peer connections
    pub async fn start(&self, addr: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("Gossip hub listening on {}", addr);

        let tx = self.tx.clone();
        let peers = self.peers.clone();
        let stats = self.stats.clone();
        let inbound = self.inbound.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::info!("Peer connected from {}", peer_addr);
                        let rx = tx.subscribe();
                        let peers = peers.clone();
                        let stats = stats.clone();
                        let inbound = inbound.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_peer_connection(
                                stream,
                                peer_addr.to_string(),
                                rx,
                                peers,
                                stats,
                                inbound,
                            )
                            .await
                            {
                                tracing::warn!("Peer connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    pub fn connected_peers(&self) -> usize {
        self.stats.read().peers_connected
    }

    pub fn messages_broadcast(&self) -> u64 {
        self.stats.read().messages_broadcast
    }
}

#[async_trait]
impl PeerTransport for GossipHub {
    async fn broadcast(&self, message: GossipMessage) -> anyhow::Result<()> {
        let data = message.to_bytes();
        match self.tx.send(data) {
            Ok(n) => {
                self.stats.write().messages_broadcast += 1;
                tracing::debug!("Broadcast to {} peers", n);
            }
            Err(_) => {
                // No peers connected
            }
        }
        Ok(())
    }

    async fn send_to_peer(&self, peer: &str, message: GossipMessage) -> anyhow::Result<()> {
        let sender = self
            .peers
            .read()
            .get(peer)
            .map(|info| info.direct.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown peer {peer}"))?;
        sender.send(message.to_bytes()).await?;
        Ok(())
    }

    async fn send_to_network(
        &self,
        network: &str,
        message: GossipMessage,
        on_response: Option<ResponseCallback>,
    ) -> anyhow::Result<()> {
        let endpoint = self
            .networks
            .read()
            .get(network)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no endpoint registered for network {network}"))?;
        let data = message.to_bytes();
        let network = network.to_string();

        tokio::spawn(async move {
            if let Err(e) = deliver_to_network(&endpoint, data, on_response).await {
                tracing::warn!(network = %network, "Cross-network delivery failed: {}", e);
            }
        });

        Ok(())
    }
}

async fn deliver_to_network(
    endpoint: &str,
    data: Vec<u8>,
    on_response: Option<ResponseCallback>,
) -> anyhow::Result<()> {
    let url = format!("ws://{}", endpoint);
    let (ws_stream, _) = connect_async(&url).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    ws_sender.send(Message::Binary(data)).await?;

    if let Some(callback) = on_response {
        let reply = tokio::time::timeout(RESPONSE_TIMEOUT, async {
            while let Some(msg) = ws_receiver.next().await {
                if let Ok(Message::Binary(data)) = msg {
                    return Some(data);
                }
            }
            None
        })
        .await;
        match reply {
            Ok(Some(data)) => callback(data),
            Ok(None) => tracing::warn!("Peer closed before replying"),
            Err(_) => tracing::warn!("Cross-network response timed out"),
        }
    }

    let _ = ws_sender.close().await;
    Ok(())
}

async fn handle_peer_connection(
    stream: TcpStream,
    peer_addr: String,
    mut rx: broadcast::Receiver<Vec<u8>>,
    peers: Arc<RwLock<HashMap<String, PeerInfo>>>,
    stats: Arc<RwLock<HubStats>>,
    inbound: mpsc::Sender<GossipMessage>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (direct_tx, mut direct_rx) = mpsc::channel::<Vec<u8>>(100);
    peers.write().insert(
        peer_addr.clone(),
        PeerInfo {
            direct: direct_tx,
            connected_at: now_ms(),
        },
    );
    stats.write().peers_connected = peers.read().len();

    // Forward fan-out and direct sends to this peer
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                broadcast = rx.recv() => match broadcast {
                    Ok(data) => {
                        if ws_sender.send(Message::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Peer lagged {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                direct = direct_rx.recv() => match direct {
                    Some(data) => {
                        if ws_sender.send(Message::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    // Decode inbound traffic and hand it to the routing task
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => match GossipMessage::from_bytes(&data) {
                Ok(message) => {
                    if inbound.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Undecodable gossip from {}: {}", peer_addr, e);
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup
    send_task.abort();
    peers.write().remove(&peer_addr);
    stats.write().peers_connected = peers.read().len();
    tracing::info!("Peer {} disconnected", peer_addr);

    Ok(())
}

/// Outbound gossip connection to another node's hub
pub struct GossipClient {
    out: mpsc::Sender<Vec<u8>>,
}

impl GossipClient {
    /// Connect to a hub; decoded inbound messages flow into `inbound`
    pub async fn connect(
        addr: &str,
        inbound: mpsc::Sender<GossipMessage>,
    ) -> anyhow::Result<Self> {
        let url = format!("ws://{}", addr);
        let (ws_stream, _) = connect_async(&url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        tracing::info!("Connected to gossip hub at {}", addr);

        let (out, mut out_rx) = mpsc::channel::<Vec<u8>>(100);

        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match GossipMessage::from_bytes(&data) {
                        Ok(message) => {
                            if inbound.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Undecodable gossip: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::warn!("Hub closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_sender.send(Message::Binary(data)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self { out })
    }

    /// Send a message to the hub
    pub async fn send(&self, message: GossipMessage) -> anyhow::Result<()> {
        self.out.send(message.to_bytes()).await?;
        Ok(())
    }
}
