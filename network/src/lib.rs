// fleet-network: binds miner peers into a coherent fleet
// The Node value, the RPC server implementation, and the peer client side
// (discovery, synchronization, mining, gossip).

pub mod client;
pub mod node;
pub mod server;

pub use node::{Node, Peers};
pub use server::{serve, MinerRpc};
