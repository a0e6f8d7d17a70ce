use serde::{Deserialize, Serialize};

/// Opaque telemetry payload. The chain imposes no structure beyond length
/// and bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub data: Vec<u8>,
}

impl Transaction {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Transaction { data: data.into() }
    }
}
