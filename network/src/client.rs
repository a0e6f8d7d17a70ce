//! Client side of the peer protocol: dialing, discovery, synchronization,
//! and the device-facing block creation flow.

use crate::node::Node;
use fleet_core::{Block, ChainError, ProofOfWork, Transaction};
use fleet_rpc::MinerApiClient;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Outbound dial timeout.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How many miners a device tries before giving up on a block.
pub const MINE_ATTEMPTS: usize = 5;

/// Dials a peer over WebSocket.
pub async fn connect(addr: &str) -> Result<Arc<WsClient>, ChainError> {
    let url = format!("ws://{addr}");
    let client = WsClientBuilder::default()
        .connection_timeout(CONNECT_TIMEOUT)
        .build(&url)
        .await
        .map_err(|err| ChainError::Unknown(format!("dial {addr}: {err}")))?;
    Ok(Arc::new(client))
}

/// Announces our own address to a peer and records the connection when the
/// peer acknowledges. Failures are logged and swallowed; discovery treats
/// unreachable peers as absent.
pub async fn send_address(node: &Arc<Node>, peer_addr: &str) {
    let Ok(client) = connect(peer_addr).await else {
        warn!(peer = %peer_addr, "dial failed");
        return;
    };

    match client.send_address(node.addr.clone()).await {
        Ok(reply) if reply.status_code == 200 => {
            node.peers
                .insert_connection(peer_addr.to_string(), client)
                .await;
            info!(peer = %peer_addr, "connected");
        }
        Ok(reply) => {
            warn!(peer = %peer_addr, status = reply.status_code, "address rejected");
        }
        Err(err) => {
            warn!(peer = %peer_addr, error = %err, "send address failed");
        }
    }
}

/// Drains the peer's address stream.
pub async fn peer_addresses(client: &WsClient) -> Vec<String> {
    let mut list = Vec::new();
    match client.addresses().await {
        Ok(mut sub) => {
            // The stream ends with a null terminator.
            while let Some(Ok(Some(addr))) = sub.next().await {
                list.push(addr);
            }
        }
        Err(err) => warn!(error = %err, "address stream failed"),
    }
    list
}

/// Breadth-first discovery that announces our address to every newly learned
/// peer, so they dial back and the mesh stays bidirectional.
pub async fn discover_and_connect(node: &Arc<Node>) {
    let mut queue: VecDeque<String> = node.peers.connected_addrs().await.into();
    while let Some(addr) = queue.pop_front() {
        let Some(client) = node.peers.connection(&addr).await else {
            continue;
        };
        for learned in peer_addresses(&client).await {
            if learned != node.addr && !node.peers.is_connected(&learned).await {
                send_address(node, &learned).await;
                queue.push_back(learned);
            }
        }
    }
}

/// Connect-only breadth-first discovery used by the device client role,
/// which has no listening address to announce.
pub async fn discover(node: &Arc<Node>, seed: &str) {
    if !node.peers.is_connected(seed).await {
        if let Ok(client) = connect(seed).await {
            node.peers.insert_connection(seed.to_string(), client).await;
        }
    }

    let mut queue: VecDeque<String> = node.peers.connected_addrs().await.into();
    while let Some(addr) = queue.pop_front() {
        let Some(client) = node.peers.connection(&addr).await else {
            continue;
        };
        for learned in peer_addresses(&client).await {
            if learned != node.addr && !node.peers.is_connected(&learned).await {
                let Ok(peer) = connect(&learned).await else {
                    continue;
                };
                node.peers.insert_connection(learned.clone(), peer).await;
                queue.push_back(learned);
            }
        }
    }
}

/// Picks the connected peer with the greatest store-wide height, strictly
/// greater than our own. Ties keep the local chain.
pub async fn find_best_height_node(node: &Arc<Node>) -> Option<String> {
    let mut max = node.engine.full_height().unwrap_or(0);
    let mut best = None;

    for (addr, client) in node.peers.connections().await {
        match client.full_height().await {
            Ok(height) if height > max => {
                max = height;
                best = Some(addr);
            }
            Ok(_) => {}
            Err(err) => warn!(peer = %addr, error = %err, "full height query failed"),
        }
    }
    best
}

/// Like `find_best_height_node`, but compares one token's chain length.
pub async fn find_best_height_node_by_token(node: &Arc<Node>, token: &[u8]) -> Option<String> {
    let mut max = node.engine.height(token).unwrap_or(0);
    let mut best = None;
    let token_hex = hex::encode(token);

    for (addr, client) in node.peers.connections().await {
        match client.height(token_hex.clone()).await {
            Ok(height) if height > max => {
                max = height;
                best = Some(addr);
            }
            Ok(_) => {}
            Err(err) => warn!(peer = %addr, error = %err, "height query failed"),
        }
    }
    best
}

/// Streams a peer's raw store dump into the local store, verbatim. Callers
/// clear the local store first.
pub async fn download_full_chain(node: &Arc<Node>, peer: &str) -> Result<(), ChainError> {
    let client = node
        .peers
        .connection(peer)
        .await
        .ok_or_else(|| ChainError::Unknown(format!("not connected to {peer}")))?;

    let mut stream = client
        .full_chain()
        .await
        .map_err(ChainError::unknown)?;
    let mut entries = 0usize;
    while let Some(item) = stream.next().await {
        let Some(dto) = item.map_err(ChainError::unknown)? else {
            break;
        };
        node.engine.import(&dto.decode()?)?;
        entries += 1;
    }
    info!(peer = %peer, entries, "full chain downloaded");
    Ok(())
}

/// Streams one token's chain from a peer and runs every block through the
/// admission pipeline. Blocks arrive oldest-first, so each one finds its
/// parent already stored.
pub async fn sync_chain(node: &Arc<Node>, peer: &str, token: &[u8]) -> Result<(), ChainError> {
    let client = node
        .peers
        .connection(peer)
        .await
        .ok_or_else(|| ChainError::Unknown(format!("not connected to {peer}")))?;

    let mut stream = client
        .chain(hex::encode(token))
        .await
        .map_err(ChainError::unknown)?;
    while let Some(item) = stream.next().await {
        let Some(block_hex) = item.map_err(ChainError::unknown)? else {
            break;
        };
        let bytes = hex::decode(block_hex).map_err(ChainError::codec)?;
        let block = Block::deserialize(&bytes)?;
        node.engine.admit(&block).await?;
    }
    Ok(())
}

/// Device-facing block creation: assembles a block on the local tail, signs
/// it with the local key, and asks a randomly chosen miner to seal it.
/// Retries with another random miner up to `MINE_ATTEMPTS` times.
pub async fn create_block(
    node: &Arc<Node>,
    token: &[u8],
    payloads: Vec<Vec<u8>>,
) -> Result<Block, ChainError> {
    let prev_hash = node.engine.tail_hash(token)?;
    let transactions = payloads.into_iter().map(Transaction::new).collect();

    let mut block = Block::new(
        prev_hash,
        token.to_vec(),
        node.key.public_key.clone(),
        transactions,
    );
    block.sign(node.key.signing_key())?;
    let encoded = hex::encode(block.serialize()?);

    let peers = node.peers.connections().await;
    if peers.is_empty() {
        return Err(ChainError::Unknown(
            "unable to discover at least one miner node".into(),
        ));
    }

    for attempt in 1..=MINE_ATTEMPTS {
        let (addr, client) = &peers[rand::thread_rng().gen_range(0..peers.len())];
        info!(miner = %addr, attempt, "requesting mine");

        match client.mine(encoded.clone()).await {
            Ok(sealed_hex) => {
                let bytes = hex::decode(sealed_hex).map_err(ChainError::codec)?;
                let sealed = Block::deserialize(&bytes)?;
                if !ProofOfWork::with_difficulty(&sealed, node.engine.difficulty()).validate() {
                    warn!(miner = %addr, "returned block fails proof of work");
                    continue;
                }
                node.engine.admit(&sealed).await?;
                return Ok(sealed);
            }
            Err(err) => {
                warn!(miner = %addr, attempt, error = %err, "mine request failed, retrying");
            }
        }
    }

    Err(ChainError::Unknown("unable to mine block".into()))
}

/// Fire-and-forget gossip: hands the serialized block to every connected
/// peer in its own task. The originator does not wait for acks; failures
/// are logged only.
pub fn propagate(node: &Arc<Node>, encoded_block: String) {
    let node = Arc::clone(node);
    tokio::spawn(async move {
        for (addr, client) in node.peers.connections().await {
            let encoded = encoded_block.clone();
            tokio::spawn(async move {
                if let Err(err) = client.propagate_block(encoded).await {
                    warn!(peer = %addr, error = %err, "propagate failed");
                }
            });
        }
    });
}

/// Requests a device token (and its genesis block) from a miner.
pub async fn get_token(addr: &str, username: &str, password: &str) -> Result<Vec<u8>, ChainError> {
    let client = connect(addr).await?;
    let token_hex = client
        .issue_token(username.to_string(), password.to_string())
        .await
        .map_err(ChainError::unknown)?;
    hex::decode(token_hex).map_err(ChainError::codec)
}

/// Liveness probe against a peer that may not be connected yet.
pub async fn ping(addr: &str) -> bool {
    match connect(addr).await {
        Ok(client) => client.ping().await.is_ok(),
        Err(_) => false,
    }
}
