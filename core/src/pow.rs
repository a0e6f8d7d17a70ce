use num_bigint::BigUint;
use sha2::{Digest, Sha256};

use crate::block::Block;

/// Default proof-of-work difficulty: valid hashes, read as 256-bit unsigned
/// big-endian integers, must be below `2^(256 - DIFFICULTY)`. Every peer in
/// a fleet must run the same value or block validation diverges.
pub const DIFFICULTY: i64 = 12;

/// Proof-of-work context for one block.
pub struct ProofOfWork<'a> {
    block: &'a Block,
    target: BigUint,
    difficulty: i64,
}

impl<'a> ProofOfWork<'a> {
    pub fn new(block: &'a Block) -> Self {
        Self::with_difficulty(block, DIFFICULTY)
    }

    pub fn with_difficulty(block: &'a Block, difficulty: i64) -> Self {
        let target = BigUint::from(1u8) << (256 - difficulty as usize);
        ProofOfWork {
            block,
            target,
            difficulty,
        }
    }

    /// The hashed input: `prev_hash ‖ SHA256(concat_tx_data) ‖ be(nonce) ‖
    /// be(difficulty)`.
    fn input(&self, nonce: i64) -> Vec<u8> {
        let tx_digest = self.block.tx_digest();
        let mut data =
            Vec::with_capacity(self.block.prev_hash.len() + tx_digest.len() + 16);
        data.extend_from_slice(&self.block.prev_hash);
        data.extend_from_slice(&tx_digest);
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&self.difficulty.to_be_bytes());
        data
    }

    /// Scans nonces from zero until the hash meets the target. Compute-bound;
    /// callers on async runtimes should run this on a blocking worker.
    pub fn run(&self) -> (i64, Vec<u8>) {
        let mut nonce: i64 = 0;
        let mut hash = Sha256::digest(self.input(nonce));
        while BigUint::from_bytes_be(&hash) >= self.target && nonce < i64::MAX {
            nonce += 1;
            hash = Sha256::digest(self.input(nonce));
        }
        (nonce, hash.to_vec())
    }

    /// Recomputes the hash with the stored nonce and checks the target
    /// inequality.
    pub fn validate(&self) -> bool {
        let hash = Sha256::digest(self.input(self.block.nonce));
        BigUint::from_bytes_be(&hash) < self.target
    }
}
