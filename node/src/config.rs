// Runtime configuration shared by every subcommand.

use std::path::PathBuf;

/// Resolved paths and consensus parameters for one invocation.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Directory holding the chain database.
    pub data_dir: PathBuf,
    /// Location of the key bundle file.
    pub key_file: PathBuf,
    /// Proof-of-work difficulty; must match across the fleet.
    pub difficulty: i64,
}

impl NodeConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chain.redb")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.difficulty < 1 || self.difficulty > 64 {
            return Err("difficulty must be between 1 and 64".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let config = NodeConfig {
            data_dir: PathBuf::from("tmp/database"),
            key_file: PathBuf::from("tmp/key/key.data"),
            difficulty: 12,
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.db_path(), PathBuf::from("tmp/database/chain.redb"));
    }

    #[test]
    fn test_out_of_range_difficulty_rejected() {
        let config = NodeConfig {
            data_dir: PathBuf::from("tmp/database"),
            key_file: PathBuf::from("tmp/key/key.data"),
            difficulty: 0,
        };
        assert!(config.validate().is_err());

        let config = NodeConfig {
            difficulty: 65,
            ..config
        };
        assert!(config.validate().is_err());
    }
}
