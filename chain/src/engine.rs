use std::sync::Arc;
use std::time::Duration;

use fleet_core::crypto::SigningKey;
use fleet_core::{address_from_token, crypto, Block, ChainError, ProofOfWork};
use tracing::{debug, warn};

use crate::repository::{AppendOutcome, KvEntry, Repository};

/// Pause between retries when the store reports a transient write conflict.
pub const CONFLICT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Outcome of running a block through the admission pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// The block hash was already stored; state is unchanged and the block
    /// must not be re-propagated.
    AlreadyPresent,
}

/// The consensus-local chain engine: admission pipeline plus height and
/// traversal queries over a pluggable repository.
pub struct ChainEngine {
    repo: Arc<dyn Repository>,
    difficulty: i64,
}

impl ChainEngine {
    pub fn new(repo: Arc<dyn Repository>, difficulty: i64) -> Self {
        ChainEngine { repo, difficulty }
    }

    pub fn difficulty(&self) -> i64 {
        self.difficulty
    }

    /// Runs a candidate block through verification and commits it.
    ///
    /// Pipeline: signature check, proof-of-work check, then genesis routing
    /// or linked append. Re-receipt of an already-stored hash succeeds as
    /// `AlreadyPresent` without touching state. A transient store conflict
    /// restarts the check-then-write sequence after a short sleep; the
    /// taxonomy errors are final and never retried.
    pub async fn admit(&self, block: &Block) -> Result<Admission, ChainError> {
        if !block.verify_signature()? {
            return Err(ChainError::InvalidSignature);
        }
        if !ProofOfWork::with_difficulty(block, self.difficulty).validate() {
            return Err(ChainError::InvalidProofOfWork);
        }

        let address = block.address();
        loop {
            if self.repo.get(&block.hash)?.is_some() {
                debug!(hash = %hex::encode(&block.hash), "duplicate block dropped");
                return Ok(Admission::AlreadyPresent);
            }

            let result = if block.is_genesis() {
                self.repo
                    .store_genesis(&address, block)
                    .map(|_| Admission::Accepted)
            } else {
                self.repo.append(block).map(|outcome| match outcome {
                    AppendOutcome::Appended => Admission::Accepted,
                    AppendOutcome::AlreadyPresent => Admission::AlreadyPresent,
                })
            };

            match result {
                Err(ChainError::Conflict) => {
                    warn!(address = %address, "store conflict, retrying admission");
                    tokio::time::sleep(CONFLICT_RETRY_DELAY).await;
                }
                Err(err) => {
                    // A concurrent admission of the same block can slip past
                    // the duplicate check above; re-receipt still succeeds.
                    if self.repo.get(&block.hash)?.is_some() {
                        return Ok(Admission::AlreadyPresent);
                    }
                    return Err(err);
                }
                Ok(admission) => return Ok(admission),
            }
        }
    }

    /// Builds, signs, and seals the first block of a token's chain.
    pub fn genesis_block(&self, token: &[u8], key: &SigningKey) -> Result<Block, ChainError> {
        let mut block = Block::new(
            Vec::new(),
            token.to_vec(),
            crypto::encode_public_key(key.verifying_key()),
            Vec::new(),
        );
        block.sign(key)?;
        let (nonce, hash) = ProofOfWork::with_difficulty(&block, self.difficulty).run();
        block.nonce = nonce;
        block.hash = hash;
        Ok(block)
    }

    /// Chain length for a token; 0 when no chain exists yet.
    pub fn height(&self, token: &[u8]) -> Result<i64, ChainError> {
        Ok(self.repo.fetch(&address_from_token(token))?.len() as i64)
    }

    /// Store-wide block count, used for fresh-node best-height selection.
    pub fn full_height(&self) -> Result<i64, ChainError> {
        self.repo.block_count()
    }

    /// The token's chain, newest-first.
    pub fn chain(&self, token: &[u8]) -> Result<Vec<Block>, ChainError> {
        self.repo.fetch(&address_from_token(token))
    }

    /// Hash of the most recent block for a token. Fails when the token has
    /// no chain, which callers resolve by creating a genesis first.
    pub fn tail_hash(&self, token: &[u8]) -> Result<Vec<u8>, ChainError> {
        self.repo
            .tail(&address_from_token(token))?
            .ok_or(ChainError::PreviousHashNotFound)
    }

    pub fn contains(&self, hash: &[u8]) -> Result<bool, ChainError> {
        Ok(self.repo.get(hash)?.is_some())
    }

    pub fn export(&self) -> Result<Vec<KvEntry>, ChainError> {
        self.repo.export()
    }

    pub fn import(&self, entry: &KvEntry) -> Result<(), ChainError> {
        self.repo.import(entry)
    }

    pub fn clear(&self) -> Result<(), ChainError> {
        self.repo.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use fleet_core::{Transaction, DIFFICULTY};
    use rand::rngs::OsRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> ChainEngine {
        ChainEngine::new(Arc::new(MemoryRepository::default()), DIFFICULTY)
    }

    fn sealed_child(engine: &ChainEngine, prev: &Block, key: &SigningKey, data: &[u8]) -> Block {
        let mut block = Block::new(
            prev.hash.clone(),
            prev.token.clone(),
            crypto::encode_public_key(key.verifying_key()),
            vec![Transaction::new(data.to_vec())],
        );
        block.sign(key).unwrap();
        let (nonce, hash) = ProofOfWork::with_difficulty(&block, engine.difficulty()).run();
        block.nonce = nonce;
        block.hash = hash;
        block
    }

    #[tokio::test]
    async fn test_genesis_and_child_admission() {
        let engine = engine();
        let key = SigningKey::random(&mut OsRng);
        let token = crypto::sign(&key, b"adminpass");

        let genesis = engine.genesis_block(&token, &key).unwrap();
        assert_eq!(engine.admit(&genesis).await.unwrap(), Admission::Accepted);

        let child = sealed_child(&engine, &genesis, &key, b"temp=21.5");
        assert_eq!(engine.admit(&child).await.unwrap(), Admission::Accepted);

        assert_eq!(engine.height(&token).unwrap(), 2);
        assert_eq!(engine.tail_hash(&token).unwrap(), child.hash);
        assert_eq!(engine.full_height().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_admission_is_idempotent() {
        let engine = engine();
        let key = SigningKey::random(&mut OsRng);
        let token = crypto::sign(&key, b"adminpass");

        let genesis = engine.genesis_block(&token, &key).unwrap();
        engine.admit(&genesis).await.unwrap();
        let child = sealed_child(&engine, &genesis, &key, b"temp=21.5");
        engine.admit(&child).await.unwrap();

        assert_eq!(
            engine.admit(&child).await.unwrap(),
            Admission::AlreadyPresent
        );
        assert_eq!(engine.height(&token).unwrap(), 2);

        // Same for a re-received genesis.
        assert_eq!(
            engine.admit(&genesis).await.unwrap(),
            Admission::AlreadyPresent
        );
    }

    #[tokio::test]
    async fn test_tampered_signature_rejected() {
        let engine = engine();
        let key = SigningKey::random(&mut OsRng);
        let token = crypto::sign(&key, b"adminpass");

        let genesis = engine.genesis_block(&token, &key).unwrap();
        engine.admit(&genesis).await.unwrap();

        let mut child = sealed_child(&engine, &genesis, &key, b"temp=21.5");
        child.transactions[0].data = b"forged".to_vec();
        // Re-seal so only the signature check can catch the tamper.
        let (nonce, hash) = ProofOfWork::with_difficulty(&child, engine.difficulty()).run();
        child.nonce = nonce;
        child.hash = hash;

        let err = engine.admit(&child).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidSignature));
    }

    #[tokio::test]
    async fn test_invalid_pow_rejected() {
        let engine = engine();
        let key = SigningKey::random(&mut OsRng);
        let token = crypto::sign(&key, b"adminpass");

        let genesis = engine.genesis_block(&token, &key).unwrap();
        engine.admit(&genesis).await.unwrap();

        let mut child = sealed_child(&engine, &genesis, &key, b"temp=21.5");
        child.nonce -= 1;

        let err = engine.admit(&child).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidProofOfWork));
    }

    #[tokio::test]
    async fn test_orphan_block_rejected() {
        let engine = engine();
        let key = SigningKey::random(&mut OsRng);
        let token = crypto::sign(&key, b"adminpass");

        let genesis = engine.genesis_block(&token, &key).unwrap();
        engine.admit(&genesis).await.unwrap();

        let mut fake_parent = genesis.clone();
        fake_parent.hash = vec![0xAB; 32];
        let orphan = sealed_child(&engine, &fake_parent, &key, b"orphan");

        let err = engine.admit(&orphan).await.unwrap_err();
        assert!(matches!(err, ChainError::PreviousHashNotFound));
    }

    #[tokio::test]
    async fn test_second_genesis_rejected() {
        let engine = engine();
        let key = SigningKey::random(&mut OsRng);
        let token = crypto::sign(&key, b"adminpass");

        let first = engine.genesis_block(&token, &key).unwrap();
        engine.admit(&first).await.unwrap();

        // A different genesis for the same token: a payload changes the
        // digest, the signature, and the hash.
        let mut second = Block::new(
            Vec::new(),
            token.clone(),
            crypto::encode_public_key(key.verifying_key()),
            vec![Transaction::new(&b"other boot"[..])],
        );
        second.sign(&key).unwrap();
        let (nonce, hash) = ProofOfWork::with_difficulty(&second, engine.difficulty()).run();
        second.nonce = nonce;
        second.hash = hash;
        assert_ne!(second.hash, first.hash);

        let err = engine.admit(&second).await.unwrap_err();
        assert!(matches!(err, ChainError::GenesisExists(_)));
        assert_eq!(engine.tail_hash(&token).unwrap(), first.hash);
    }

    #[tokio::test]
    async fn test_unknown_token_height_is_zero() {
        let engine = engine();
        assert_eq!(engine.height(b"nobody").unwrap(), 0);
        assert!(engine.tail_hash(b"nobody").is_err());
    }

    /// Repository wrapper that reports a conflict on the first N mutating
    /// calls, then delegates.
    struct ConflictingRepository {
        inner: MemoryRepository,
        conflicts_left: AtomicUsize,
    }

    impl ConflictingRepository {
        fn new(conflicts: usize) -> Self {
            ConflictingRepository {
                inner: MemoryRepository::default(),
                conflicts_left: AtomicUsize::new(conflicts),
            }
        }

        fn take_conflict(&self) -> bool {
            self.conflicts_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl Repository for ConflictingRepository {
        fn get(&self, hash: &[u8]) -> Result<Option<Block>, ChainError> {
            self.inner.get(hash)
        }
        fn tail(&self, address: &str) -> Result<Option<Vec<u8>>, ChainError> {
            self.inner.tail(address)
        }
        fn store_genesis(&self, address: &str, block: &Block) -> Result<(), ChainError> {
            if self.take_conflict() {
                return Err(ChainError::Conflict);
            }
            self.inner.store_genesis(address, block)
        }
        fn append(&self, block: &Block) -> Result<AppendOutcome, ChainError> {
            if self.take_conflict() {
                return Err(ChainError::Conflict);
            }
            self.inner.append(block)
        }
        fn block_count(&self) -> Result<i64, ChainError> {
            self.inner.block_count()
        }
        fn export(&self) -> Result<Vec<KvEntry>, ChainError> {
            self.inner.export()
        }
        fn import(&self, entry: &KvEntry) -> Result<(), ChainError> {
            self.inner.import(entry)
        }
        fn clear(&self) -> Result<(), ChainError> {
            self.inner.clear()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_is_retried_not_surfaced() {
        let engine = ChainEngine::new(Arc::new(ConflictingRepository::new(2)), DIFFICULTY);
        let key = SigningKey::random(&mut OsRng);
        let token = crypto::sign(&key, b"adminpass");

        let genesis = engine.genesis_block(&token, &key).unwrap();
        assert_eq!(engine.admit(&genesis).await.unwrap(), Admission::Accepted);
        assert_eq!(engine.height(&token).unwrap(), 1);
    }
}
