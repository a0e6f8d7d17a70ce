// fleet-chain: per-token chain persistence and the admission engine

pub mod engine;
pub mod repository;

pub use engine::{Admission, ChainEngine};
pub use repository::{
    AppendOutcome, KeyFamily, KvEntry, MemoryRepository, RedbRepository, Repository,
};
