use thiserror::Error;

/// Chain-level error taxonomy. Each admission failure carries a status code
/// that travels with the message across the RPC boundary.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid proof of work")]
    InvalidProofOfWork,
    #[error("previous hash not found")]
    PreviousHashNotFound,
    #[error("genesis block already exists for {0}")]
    GenesisExists(String),
    /// Transient write conflict reported by the store. Retried by the
    /// engine, never surfaced to callers.
    #[error("storage write conflict")]
    Conflict,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("{0}")]
    Unknown(String),
}

impl ChainError {
    /// Status code carried alongside the message (401-404 for the admission
    /// taxonomy, 420 for everything else).
    pub fn status_code(&self) -> i32 {
        match self {
            ChainError::InvalidSignature => 401,
            ChainError::InvalidProofOfWork => 402,
            ChainError::PreviousHashNotFound => 403,
            ChainError::GenesisExists(_) => 404,
            ChainError::Conflict
            | ChainError::Storage(_)
            | ChainError::Codec(_)
            | ChainError::Unknown(_) => 420,
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        ChainError::Storage(err.to_string())
    }

    pub fn codec(err: impl std::fmt::Display) -> Self {
        ChainError::Codec(err.to_string())
    }

    pub fn unknown(err: impl std::fmt::Display) -> Self {
        ChainError::Unknown(err.to_string())
    }
}
