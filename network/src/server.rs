//! The miner RPC server: admission, mining, enrollment, and the streaming
//! producers for discovery and synchronization.

use crate::client;
use crate::node::Node;
use fleet_chain::Admission;
use fleet_core::{crypto, Block, ProofOfWork, Transaction};
use fleet_rpc::{to_rpc_error, KvEntryDto, MinerApiServer, SendAddressReply};
use jsonrpsee::core::{async_trait, RpcResult, SubscriptionResult};
use jsonrpsee::server::{PendingSubscriptionSink, Server, ServerHandle, SubscriptionMessage};
use jsonrpsee::types::ErrorObjectOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;

/// RPC server implementation over one node.
pub struct MinerRpc {
    node: Arc<Node>,
}

impl MinerRpc {
    pub fn new(node: Arc<Node>) -> Self {
        MinerRpc { node }
    }

    fn decode_block(block_hex: &str) -> RpcResult<Block> {
        let bytes = hex::decode(block_hex)
            .map_err(|err| ErrorObjectOwned::owned(INVALID_PARAMS, err.to_string(), None::<()>))?;
        Block::deserialize(&bytes).map_err(|err| to_rpc_error(&err))
    }

    fn encode_block(block: &Block) -> RpcResult<String> {
        Ok(hex::encode(block.serialize().map_err(|err| to_rpc_error(&err))?))
    }

    /// Seals a block on a blocking worker so the PoW scan cannot monopolize
    /// the runtime.
    async fn seal_block(&self, mut block: Block) -> RpcResult<Block> {
        let difficulty = self.node.engine.difficulty();
        tokio::task::spawn_blocking(move || {
            let (nonce, hash) = ProofOfWork::with_difficulty(&block, difficulty).run();
            block.nonce = nonce;
            block.hash = hash;
            block
        })
        .await
        .map_err(|err| ErrorObjectOwned::owned(INTERNAL_ERROR, err.to_string(), None::<()>))
    }
}

#[async_trait]
impl MinerApiServer for MinerRpc {
    async fn ping(&self) -> RpcResult<()> {
        Ok(())
    }

    async fn send_address(&self, addr: String) -> RpcResult<SendAddressReply> {
        self.node.peers.learn(&addr).await;

        if addr != self.node.addr && !self.node.peers.is_connected(&addr).await {
            let node = Arc::clone(&self.node);
            tokio::spawn(async move {
                client::send_address(&node, &addr).await;
            });
        }

        Ok(SendAddressReply {
            response_text: "OK".to_string(),
            status_code: 200,
        })
    }

    async fn full_height(&self) -> RpcResult<i64> {
        self.node.engine.full_height().map_err(|err| to_rpc_error(&err))
    }

    async fn height(&self, token: String) -> RpcResult<i64> {
        let token = hex::decode(&token)
            .map_err(|err| ErrorObjectOwned::owned(INVALID_PARAMS, err.to_string(), None::<()>))?;
        self.node.engine.height(&token).map_err(|err| to_rpc_error(&err))
    }

    async fn propagate_block(&self, block: String) -> RpcResult<bool> {
        let decoded = Self::decode_block(&block)?;

        match self.node.engine.admit(&decoded).await {
            Ok(Admission::Accepted) => {
                client::propagate(&self.node, block);
                Ok(true)
            }
            // Duplicate arrivals succeed without re-propagating, so gossip
            // loops terminate.
            Ok(Admission::AlreadyPresent) => Ok(true),
            Err(err) => {
                warn!(code = err.status_code(), error = %err, "block rejected");
                Err(to_rpc_error(&err))
            }
        }
    }

    async fn mine(&self, block: String) -> RpcResult<String> {
        let decoded = Self::decode_block(&block)?;
        let sealed = self.seal_block(decoded).await?;

        let admission = self
            .node
            .engine
            .admit(&sealed)
            .await
            .map_err(|err| to_rpc_error(&err))?;

        let encoded = Self::encode_block(&sealed)?;
        if admission == Admission::Accepted {
            client::propagate(&self.node, encoded.clone());
        }
        info!(hash = %hex::encode(&sealed.hash), "block mined");
        Ok(encoded)
    }

    async fn issue_token(&self, username: String, password: String) -> RpcResult<String> {
        if username.is_empty() || password.is_empty() {
            return Err(ErrorObjectOwned::owned(
                INVALID_PARAMS,
                "invalid username or password",
                None::<()>,
            ));
        }

        let mut credentials = username.into_bytes();
        credentials.extend_from_slice(password.as_bytes());
        let token = crypto::sign(self.node.key.signing_key(), &credentials);

        let engine = Arc::clone(&self.node.engine);
        let signing_key = self.node.key.signing_key().clone();
        let token_for_genesis = token.clone();
        let genesis = tokio::task::spawn_blocking(move || {
            engine.genesis_block(&token_for_genesis, &signing_key)
        })
        .await
        .map_err(|err| ErrorObjectOwned::owned(INTERNAL_ERROR, err.to_string(), None::<()>))?
        .map_err(|err| to_rpc_error(&err))?;

        self.node
            .engine
            .admit(&genesis)
            .await
            .map_err(|err| to_rpc_error(&err))?;

        client::propagate(&self.node, Self::encode_block(&genesis)?);
        info!(address = %genesis.address(), "device enrolled");
        Ok(hex::encode(token))
    }

    async fn test(&self) -> RpcResult<String> {
        let block = Block::new(
            b"hash".to_vec(),
            b"token".to_vec(),
            b"pubkey".to_vec(),
            vec![Transaction::new(&b"data"[..])],
        );
        let sealed = self.seal_block(block).await?;

        if !ProofOfWork::with_difficulty(&sealed, self.node.engine.difficulty()).validate() {
            warn!("diagnostic block failed proof of work");
        }
        Self::encode_block(&sealed)
    }

    async fn addresses(&self, pending: PendingSubscriptionSink) -> SubscriptionResult {
        let addrs = self.node.peers.connected_addrs().await;
        let Ok(sink) = pending.accept().await else {
            return Ok(());
        };

        stream_items(&sink, addrs).await;
        Ok(())
    }

    async fn chain(&self, pending: PendingSubscriptionSink, token: String) -> SubscriptionResult {
        let token = match hex::decode(&token) {
            Ok(token) => token,
            Err(err) => {
                pending
                    .reject(ErrorObjectOwned::owned(
                        INVALID_PARAMS,
                        err.to_string(),
                        None::<()>,
                    ))
                    .await;
                return Ok(());
            }
        };

        let blocks = match self.node.engine.chain(&token) {
            Ok(blocks) => blocks,
            Err(err) => {
                pending.reject(to_rpc_error(&err)).await;
                return Ok(());
            }
        };

        let Ok(sink) = pending.accept().await else {
            return Ok(());
        };

        // The walk is newest-first; consumers apply in stream order, so
        // emit oldest-first.
        let mut encoded = Vec::with_capacity(blocks.len());
        for block in blocks.iter().rev() {
            match block.serialize() {
                Ok(bytes) => encoded.push(hex::encode(bytes)),
                Err(err) => {
                    warn!(error = %err, "chain stream aborted");
                    return Ok(());
                }
            }
        }
        stream_items(&sink, encoded).await;
        Ok(())
    }

    async fn full_chain(&self, pending: PendingSubscriptionSink) -> SubscriptionResult {
        let entries = match self.node.engine.export() {
            Ok(entries) => entries,
            Err(err) => {
                pending.reject(to_rpc_error(&err)).await;
                return Ok(());
            }
        };

        let Ok(sink) = pending.accept().await else {
            return Ok(());
        };

        let items: Vec<KvEntryDto> = entries.iter().map(KvEntryDto::from).collect();
        stream_items(&sink, items).await;
        Ok(())
    }
}

/// Emits every item wrapped in `Some`, then the `null` end-of-stream
/// terminator the consumers stop on.
async fn stream_items<T: serde::Serialize>(
    sink: &jsonrpsee::server::SubscriptionSink,
    items: Vec<T>,
) {
    for item in items {
        let Ok(msg) = SubscriptionMessage::from_json(&Some(item)) else {
            return;
        };
        if sink.send(msg).await.is_err() {
            return;
        }
    }
    if let Ok(msg) = SubscriptionMessage::from_json(&None::<T>) {
        let _ = sink.send(msg).await;
    }
}

/// Binds the node's listen address and starts serving the miner API.
pub async fn serve(node: Arc<Node>) -> anyhow::Result<(ServerHandle, SocketAddr)> {
    let server = Server::builder().build(node.addr.as_str()).await?;
    let addr = server.local_addr()?;
    let handle = server.start(MinerRpc::new(node).into_rpc());
    info!(%addr, "miner RPC listening");
    Ok((handle, addr))
}
