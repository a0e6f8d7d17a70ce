use p256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::address::address_from_token;
use crate::error::ChainError;
use crate::transaction::Transaction;
use crate::{crypto, seal};

/// One unit of append on a device chain. A block with an empty `prev_hash`
/// is the genesis of its token's chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub prev_hash: Vec<u8>,
    pub hash: Vec<u8>,
    pub nonce: i64,
    /// ECDSA `r ‖ s`, both halves padded to the coordinate width.
    pub signature: Vec<u8>,
    /// Device identity this block belongs to.
    pub token: Vec<u8>,
    /// Miner's public key as `X ‖ Y`, both coordinates padded.
    pub public_key: Vec<u8>,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        prev_hash: Vec<u8>,
        token: Vec<u8>,
        public_key: Vec<u8>,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            prev_hash,
            token,
            public_key,
            transactions,
            ..Block::default()
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }

    /// Base58 chain lookup key derived from the token.
    pub fn address(&self) -> String {
        address_from_token(&self.token)
    }

    /// SHA-256 over the concatenation of every transaction payload in order.
    pub fn tx_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for tx in &self.transactions {
            hasher.update(&tx.data);
        }
        hasher.finalize().into()
    }

    /// Signs the transaction digest and stamps the signature.
    pub fn sign(&mut self, key: &SigningKey) -> Result<(), ChainError> {
        self.signature = crypto::sign(key, &self.tx_digest());
        Ok(())
    }

    /// Verifies the stored signature over the transaction digest under the
    /// stored public key.
    pub fn verify_signature(&self) -> Result<bool, ChainError> {
        crypto::verify(&self.public_key, &self.tx_digest(), &self.signature)
    }

    /// Canonical byte form shared by the store and the wire: bincode with
    /// default configuration.
    pub fn serialize(&self) -> Result<Vec<u8>, ChainError> {
        bincode::serialize(self).map_err(ChainError::codec)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Block, ChainError> {
        bincode::deserialize(bytes).map_err(ChainError::codec)
    }

    /// Seals every transaction payload in place under a passphrase.
    pub fn seal_transactions(&mut self, passphrase: &[u8]) -> Result<(), ChainError> {
        for tx in &mut self.transactions {
            tx.data = seal::seal(passphrase, &tx.data)?;
        }
        Ok(())
    }

    /// Reverses `seal_transactions`. Fails when the passphrase is wrong or
    /// a payload was tampered with.
    pub fn unseal_transactions(&mut self, passphrase: &[u8]) -> Result<(), ChainError> {
        for tx in &mut self.transactions {
            tx.data = seal::unseal(passphrase, &tx.data)?;
        }
        Ok(())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " --------- Block {}", hex::encode(&self.hash))?;
        writeln!(f, " PrevHash     : {}", hex::encode(&self.prev_hash))?;
        writeln!(f, " Nonce        : {}", self.nonce)?;
        writeln!(f, " Token        : {}", hex::encode(&self.token))?;
        write!(f, " Transactions : {}", self.transactions.len())
    }
}
