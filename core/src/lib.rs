// fleet-core: consensus-local data model and crypto primitives
// Blocks, transactions, ECDSA P-256 signing, device addresses, proof-of-work

pub mod address;
pub mod block;
pub mod crypto;
pub mod error;
pub mod pow;
pub mod seal;
pub mod transaction;

pub use address::address_from_token;
pub use block::Block;
pub use error::ChainError;
pub use pow::{ProofOfWork, DIFFICULTY};
pub use transaction::Transaction;
