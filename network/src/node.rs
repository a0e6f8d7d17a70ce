use fleet_chain::ChainEngine;
use fleet_keystore::Key;
use jsonrpsee::ws_client::WsClient;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Peer membership, read and written from every RPC handler.
///
/// `known` is every address this node has ever learned; `connected` maps an
/// address to its open client connection.
#[derive(Default)]
pub struct Peers {
    known: RwLock<HashSet<String>>,
    connected: RwLock<HashMap<String, Arc<WsClient>>>,
}

impl Peers {
    pub async fn learn(&self, addr: &str) {
        self.known.write().await.insert(addr.to_string());
    }

    pub async fn known_addrs(&self) -> Vec<String> {
        self.known.read().await.iter().cloned().collect()
    }

    pub async fn is_connected(&self, addr: &str) -> bool {
        self.connected.read().await.contains_key(addr)
    }

    pub async fn insert_connection(&self, addr: String, client: Arc<WsClient>) {
        self.known.write().await.insert(addr.clone());
        self.connected.write().await.insert(addr, client);
    }

    pub async fn connection(&self, addr: &str) -> Option<Arc<WsClient>> {
        self.connected.read().await.get(addr).cloned()
    }

    pub async fn connected_addrs(&self) -> Vec<String> {
        self.connected.read().await.keys().cloned().collect()
    }

    /// Snapshot of every open connection, for fan-out and height scans.
    pub async fn connections(&self) -> Vec<(String, Arc<WsClient>)> {
        self.connected
            .read()
            .await
            .iter()
            .map(|(addr, client)| (addr.clone(), Arc::clone(client)))
            .collect()
    }

    pub async fn connected_count(&self) -> usize {
        self.connected.read().await.len()
    }
}

/// One miner node: listen address, chain engine, miner key bundle, and the
/// peer registry. Handlers receive this value explicitly instead of
/// reaching for process globals.
pub struct Node {
    /// The address this node announces to peers. Empty for a client-role
    /// node that never serves.
    pub addr: String,
    pub engine: Arc<ChainEngine>,
    pub key: Key,
    pub peers: Peers,
}

impl Node {
    pub fn new(addr: String, engine: Arc<ChainEngine>, key: Key) -> Arc<Node> {
        Arc::new(Node {
            addr,
            engine,
            key,
            peers: Peers::default(),
        })
    }
}
