use fleet_core::{Block, ChainError};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

// Two key families of the store: content-addressed block records and one
// tail pointer per device address.
const BLOCKS_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("blocks");
const TAILS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tails");

/// Result of an `append`: freshly written, or dropped because the block
/// hash was already present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    AlreadyPresent,
}

/// Which table a raw store entry belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyFamily {
    Blocks,
    Tails,
}

/// One raw store entry, the unit of the full-chain dump used by fresh-node
/// synchronization. Entries are written back verbatim on the consumer side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvEntry {
    pub family: KeyFamily,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Per-token chain persistence.
///
/// Admission logic is written against this interface so tests and
/// in-process harnesses can swap the file-backed store for an in-memory one.
pub trait Repository: Send + Sync {
    /// Looks up a block record by hash.
    fn get(&self, hash: &[u8]) -> Result<Option<Block>, ChainError>;

    /// Tail pointer for a device address, if the chain exists.
    fn tail(&self, address: &str) -> Result<Option<Vec<u8>>, ChainError>;

    /// Stores the first block of a chain and its tail pointer atomically.
    /// Fails with `GenesisExists` when the address already has a tail.
    fn store_genesis(&self, address: &str, block: &Block) -> Result<(), ChainError>;

    /// Appends a linked block: checks the duplicate-hash and prev-hash
    /// preconditions and writes the block record plus the advanced tail
    /// pointer in one transaction.
    fn append(&self, block: &Block) -> Result<AppendOutcome, ChainError>;

    /// Number of block records stored (tail pointers are not counted).
    fn block_count(&self) -> Result<i64, ChainError>;

    /// Raw dump of every store entry.
    fn export(&self) -> Result<Vec<KvEntry>, ChainError>;

    /// Writes one raw entry verbatim into its table.
    fn import(&self, entry: &KvEntry) -> Result<(), ChainError>;

    /// Drops every entry in both tables.
    fn clear(&self) -> Result<(), ChainError>;

    /// Walks a device chain from its tail, newest-first. An unknown address
    /// yields an empty chain.
    fn fetch(&self, address: &str) -> Result<Vec<Block>, ChainError> {
        let mut blocks = Vec::new();
        let Some(mut cursor) = self.tail(address)? else {
            return Ok(blocks);
        };
        loop {
            let Some(block) = self.get(&cursor)? else {
                break;
            };
            let prev = block.prev_hash.clone();
            blocks.push(block);
            if prev.is_empty() {
                break;
            }
            cursor = prev;
        }
        Ok(blocks)
    }
}

/// File-backed repository on a single redb database.
pub struct RedbRepository {
    db: Database,
}

impl RedbRepository {
    /// Opens (or creates) the database and makes sure both tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ChainError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(ChainError::storage)?;
        }
        let db = Database::create(path).map_err(ChainError::storage)?;

        let txn = db.begin_write().map_err(ChainError::storage)?;
        {
            let _ = txn.open_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
            let _ = txn.open_table(TAILS_TABLE).map_err(ChainError::storage)?;
        }
        txn.commit().map_err(ChainError::storage)?;

        Ok(RedbRepository { db })
    }
}

impl Repository for RedbRepository {
    fn get(&self, hash: &[u8]) -> Result<Option<Block>, ChainError> {
        let txn = self.db.begin_read().map_err(ChainError::storage)?;
        let table = txn.open_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
        match table.get(hash).map_err(ChainError::storage)? {
            Some(guard) => Ok(Some(Block::deserialize(guard.value())?)),
            None => Ok(None),
        }
    }

    fn tail(&self, address: &str) -> Result<Option<Vec<u8>>, ChainError> {
        let txn = self.db.begin_read().map_err(ChainError::storage)?;
        let table = txn.open_table(TAILS_TABLE).map_err(ChainError::storage)?;
        Ok(table
            .get(address)
            .map_err(ChainError::storage)?
            .map(|guard| guard.value().to_vec()))
    }

    fn store_genesis(&self, address: &str, block: &Block) -> Result<(), ChainError> {
        let encoded = block.serialize()?;

        let txn = self.db.begin_write().map_err(ChainError::storage)?;
        {
            let mut tails = txn.open_table(TAILS_TABLE).map_err(ChainError::storage)?;
            if tails.get(address).map_err(ChainError::storage)?.is_some() {
                return Err(ChainError::GenesisExists(address.to_string()));
            }
            tails
                .insert(address, block.hash.as_slice())
                .map_err(ChainError::storage)?;

            let mut blocks = txn.open_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
            blocks
                .insert(block.hash.as_slice(), encoded.as_slice())
                .map_err(ChainError::storage)?;
        }
        txn.commit().map_err(ChainError::storage)?;
        Ok(())
    }

    fn append(&self, block: &Block) -> Result<AppendOutcome, ChainError> {
        let encoded = block.serialize()?;
        let address = block.address();

        let txn = self.db.begin_write().map_err(ChainError::storage)?;
        {
            let mut blocks = txn.open_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
            if blocks
                .get(block.hash.as_slice())
                .map_err(ChainError::storage)?
                .is_some()
            {
                // Duplicate propagation must not double-append.
                return Ok(AppendOutcome::AlreadyPresent);
            }
            if blocks
                .get(block.prev_hash.as_slice())
                .map_err(ChainError::storage)?
                .is_none()
            {
                return Err(ChainError::PreviousHashNotFound);
            }
            blocks
                .insert(block.hash.as_slice(), encoded.as_slice())
                .map_err(ChainError::storage)?;

            let mut tails = txn.open_table(TAILS_TABLE).map_err(ChainError::storage)?;
            tails
                .insert(address.as_str(), block.hash.as_slice())
                .map_err(ChainError::storage)?;
        }
        txn.commit().map_err(ChainError::storage)?;
        Ok(AppendOutcome::Appended)
    }

    fn block_count(&self) -> Result<i64, ChainError> {
        let txn = self.db.begin_read().map_err(ChainError::storage)?;
        let table = txn.open_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
        Ok(table.len().map_err(ChainError::storage)? as i64)
    }

    fn export(&self) -> Result<Vec<KvEntry>, ChainError> {
        let txn = self.db.begin_read().map_err(ChainError::storage)?;
        let mut entries = Vec::new();

        let blocks = txn.open_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
        for item in blocks.iter().map_err(ChainError::storage)? {
            let (key, value) = item.map_err(ChainError::storage)?;
            entries.push(KvEntry {
                family: KeyFamily::Blocks,
                key: key.value().to_vec(),
                value: value.value().to_vec(),
            });
        }

        let tails = txn.open_table(TAILS_TABLE).map_err(ChainError::storage)?;
        for item in tails.iter().map_err(ChainError::storage)? {
            let (key, value) = item.map_err(ChainError::storage)?;
            entries.push(KvEntry {
                family: KeyFamily::Tails,
                key: key.value().as_bytes().to_vec(),
                value: value.value().to_vec(),
            });
        }

        Ok(entries)
    }

    fn import(&self, entry: &KvEntry) -> Result<(), ChainError> {
        let txn = self.db.begin_write().map_err(ChainError::storage)?;
        {
            match entry.family {
                KeyFamily::Blocks => {
                    let mut table =
                        txn.open_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
                    table
                        .insert(entry.key.as_slice(), entry.value.as_slice())
                        .map_err(ChainError::storage)?;
                }
                KeyFamily::Tails => {
                    let address =
                        std::str::from_utf8(&entry.key).map_err(ChainError::storage)?;
                    let mut table =
                        txn.open_table(TAILS_TABLE).map_err(ChainError::storage)?;
                    table
                        .insert(address, entry.value.as_slice())
                        .map_err(ChainError::storage)?;
                }
            }
        }
        txn.commit().map_err(ChainError::storage)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), ChainError> {
        let txn = self.db.begin_write().map_err(ChainError::storage)?;
        txn.delete_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
        txn.delete_table(TAILS_TABLE).map_err(ChainError::storage)?;
        {
            let _ = txn.open_table(BLOCKS_TABLE).map_err(ChainError::storage)?;
            let _ = txn.open_table(TAILS_TABLE).map_err(ChainError::storage)?;
        }
        txn.commit().map_err(ChainError::storage)?;
        Ok(())
    }
}

/// In-memory repository used by tests and in-process harnesses. Stores the
/// same serialized form as the file-backed store so dumps are verbatim.
#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    blocks: HashMap<Vec<u8>, Vec<u8>>,
    tails: HashMap<String, Vec<u8>>,
}

impl Repository for MemoryRepository {
    fn get(&self, hash: &[u8]) -> Result<Option<Block>, ChainError> {
        let inner = self.inner.lock().map_err(ChainError::storage)?;
        inner
            .blocks
            .get(hash)
            .map(|bytes| Block::deserialize(bytes))
            .transpose()
    }

    fn tail(&self, address: &str) -> Result<Option<Vec<u8>>, ChainError> {
        let inner = self.inner.lock().map_err(ChainError::storage)?;
        Ok(inner.tails.get(address).cloned())
    }

    fn store_genesis(&self, address: &str, block: &Block) -> Result<(), ChainError> {
        let encoded = block.serialize()?;
        let mut inner = self.inner.lock().map_err(ChainError::storage)?;
        if inner.tails.contains_key(address) {
            return Err(ChainError::GenesisExists(address.to_string()));
        }
        inner.blocks.insert(block.hash.clone(), encoded);
        inner.tails.insert(address.to_string(), block.hash.clone());
        Ok(())
    }

    fn append(&self, block: &Block) -> Result<AppendOutcome, ChainError> {
        let encoded = block.serialize()?;
        let address = block.address();
        let mut inner = self.inner.lock().map_err(ChainError::storage)?;
        if inner.blocks.contains_key(&block.hash) {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        if !inner.blocks.contains_key(&block.prev_hash) {
            return Err(ChainError::PreviousHashNotFound);
        }
        inner.blocks.insert(block.hash.clone(), encoded);
        inner.tails.insert(address, block.hash.clone());
        Ok(AppendOutcome::Appended)
    }

    fn block_count(&self) -> Result<i64, ChainError> {
        let inner = self.inner.lock().map_err(ChainError::storage)?;
        Ok(inner.blocks.len() as i64)
    }

    fn export(&self) -> Result<Vec<KvEntry>, ChainError> {
        let inner = self.inner.lock().map_err(ChainError::storage)?;
        let mut entries: Vec<KvEntry> = inner
            .blocks
            .iter()
            .map(|(key, value)| KvEntry {
                family: KeyFamily::Blocks,
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        entries.extend(inner.tails.iter().map(|(key, value)| KvEntry {
            family: KeyFamily::Tails,
            key: key.as_bytes().to_vec(),
            value: value.clone(),
        }));
        Ok(entries)
    }

    fn import(&self, entry: &KvEntry) -> Result<(), ChainError> {
        let mut inner = self.inner.lock().map_err(ChainError::storage)?;
        match entry.family {
            KeyFamily::Blocks => {
                inner.blocks.insert(entry.key.clone(), entry.value.clone());
            }
            KeyFamily::Tails => {
                let address =
                    std::str::from_utf8(&entry.key).map_err(ChainError::storage)?;
                inner.tails.insert(address.to_string(), entry.value.clone());
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), ChainError> {
        let mut inner = self.inner.lock().map_err(ChainError::storage)?;
        inner.blocks.clear();
        inner.tails.clear();
        Ok(())
    }
}
