// fleet-rpc: the peer RPC surface
// Unary calls plus server-streaming subscriptions over WebSocket. Block and
// key/value bytes are bincode underneath, hex-armored on the JSON wire.

use fleet_chain::{KeyFamily, KvEntry};
use fleet_core::ChainError;
use jsonrpsee::core::{RpcResult, SubscriptionResult};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

/// Reply to a peer announcing its listening address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendAddressReply {
    pub response_text: String,
    pub status_code: i32,
}

/// One raw store entry streamed by the full-chain dump.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KvEntryDto {
    /// `"blocks"` or `"tails"`.
    pub family: String,
    /// Hex-encoded key bytes.
    pub key: String,
    /// Hex-encoded value bytes.
    pub value: String,
}

impl From<&KvEntry> for KvEntryDto {
    fn from(entry: &KvEntry) -> Self {
        let family = match entry.family {
            KeyFamily::Blocks => "blocks",
            KeyFamily::Tails => "tails",
        };
        KvEntryDto {
            family: family.to_string(),
            key: hex::encode(&entry.key),
            value: hex::encode(&entry.value),
        }
    }
}

impl KvEntryDto {
    pub fn decode(&self) -> Result<KvEntry, ChainError> {
        let family = match self.family.as_str() {
            "blocks" => KeyFamily::Blocks,
            "tails" => KeyFamily::Tails,
            other => {
                return Err(ChainError::Codec(format!("unknown key family '{other}'")));
            }
        };
        Ok(KvEntry {
            family,
            key: hex::decode(&self.key).map_err(ChainError::codec)?,
            value: hex::decode(&self.value).map_err(ChainError::codec)?,
        })
    }
}

/// Maps a chain error onto a JSON-RPC error carrying its status code.
pub fn to_rpc_error(err: &ChainError) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(err.status_code(), err.to_string(), None::<()>)
}

/// The miner peer API.
///
/// Subscriptions act as server-streams: the callee emits every item wrapped
/// in `Some`, then a final `null` terminator so consumers know the stream is
/// complete.
#[rpc(server, client)]
pub trait MinerApi {
    /// Liveness probe.
    #[method(name = "miner_ping")]
    async fn ping(&self) -> RpcResult<()>;

    /// Caller announces its own listening address; the callee records it and
    /// dials back asynchronously when not yet connected.
    #[method(name = "miner_sendAddress")]
    async fn send_address(&self, addr: String) -> RpcResult<SendAddressReply>;

    /// Store-wide block count, used for fresh-node sync.
    #[method(name = "miner_fullHeight")]
    async fn full_height(&self) -> RpcResult<i64>;

    /// Chain length for one token (hex).
    #[method(name = "miner_height")]
    async fn height(&self, token: String) -> RpcResult<i64>;

    /// Runs a serialized block through the admission pipeline and gossips it
    /// onward on fresh acceptance.
    #[method(name = "miner_propagateBlock")]
    async fn propagate_block(&self, block: String) -> RpcResult<bool>;

    /// Proof-of-work-seals a partially formed block, admits it locally,
    /// gossips it, and returns the finalized serialized block.
    #[method(name = "miner_mine")]
    async fn mine(&self, block: String) -> RpcResult<String>;

    /// Enrolls a device: issues a token for the credentials and creates the
    /// token's genesis block.
    #[method(name = "miner_token")]
    async fn issue_token(&self, username: String, password: String) -> RpcResult<String>;

    /// Diagnostic echo: seals and returns a throwaway block.
    #[method(name = "miner_test")]
    async fn test(&self) -> RpcResult<String>;

    /// Streams every currently connected peer address.
    #[subscription(name = "miner_subscribeAddresses", unsubscribe = "miner_unsubscribeAddresses", item = Option<String>)]
    async fn addresses(&self) -> SubscriptionResult;

    /// Streams one token's chain, oldest block first, so consumers can apply
    /// each block in stream order.
    #[subscription(name = "miner_subscribeChain", unsubscribe = "miner_unsubscribeChain", item = Option<String>)]
    async fn chain(&self, token: String) -> SubscriptionResult;

    /// Streams the raw store dump for fresh-node synchronization.
    #[subscription(name = "miner_subscribeFullChain", unsubscribe = "miner_unsubscribeFullChain", item = Option<KvEntryDto>)]
    async fn full_chain(&self) -> SubscriptionResult;
}
