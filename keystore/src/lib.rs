// fleet-keystore: per-device key bundles
// Generates and persists the {secret, P-256 keypair, token} bundle a miner
// or device identifies itself with.

use anyhow::{anyhow, Context, Result};
use fleet_core::crypto;
use p256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Curve identity recorded in the key file; load refuses anything else.
const CURVE: &str = "p256";

/// Default location of the key bundle.
pub const DEFAULT_KEY_PATH: &str = "tmp/key/key.data";

/// A device key bundle: symmetric secret for payload sealing, ECDSA keypair
/// for block signing, and the enrollment token once one has been issued.
pub struct Key {
    signing_key: SigningKey,
    /// `X ‖ Y`, both coordinates padded to 32 bytes.
    pub public_key: Vec<u8>,
    /// Symmetric secret reserved for sealing telemetry payloads.
    pub secret_key: [u8; 32],
    pub token: Option<Vec<u8>>,
}

/// On-disk form: hex-armored key material plus the curve identity.
#[derive(Serialize, Deserialize)]
struct StoredKey {
    curve: String,
    private_key: String,
    public_key: String,
    secret_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    created_at: i64,
}

impl Key {
    /// Generates a fresh secret and P-256 keypair.
    pub fn generate() -> Self {
        let mut secret_key = [0u8; 32];
        OsRng.fill_bytes(&mut secret_key);

        let signing_key = SigningKey::random(&mut OsRng);
        let public_key = crypto::encode_public_key(signing_key.verifying_key());

        Key {
            signing_key,
            public_key,
            secret_key,
            token: None,
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Persists the bundle, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating key directory for {}", path.display()))?;
        }

        let stored = StoredKey {
            curve: CURVE.to_string(),
            private_key: hex::encode(self.signing_key.to_bytes()),
            public_key: hex::encode(&self.public_key),
            secret_key: hex::encode(self.secret_key),
            token: self.token.as_ref().map(hex::encode),
            created_at: chrono::Utc::now().timestamp(),
        };

        fs::write(path, serde_json::to_string_pretty(&stored)?)
            .with_context(|| format!("writing key file {}", path.display()))?;
        Ok(())
    }

    /// Restores a bundle from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Key> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("key file {} does not exist", path.display()))?;
        let stored: StoredKey = serde_json::from_str(&raw)
            .with_context(|| format!("parsing key file {}", path.display()))?;

        if stored.curve != CURVE {
            return Err(anyhow!("unsupported curve '{}' in key file", stored.curve));
        }

        let private_key = hex::decode(&stored.private_key)?;
        let signing_key = SigningKey::from_slice(&private_key)
            .map_err(|err| anyhow!("invalid private key: {err}"))?;
        let public_key = hex::decode(&stored.public_key)?;
        let secret_key: [u8; 32] = hex::decode(&stored.secret_key)?
            .try_into()
            .map_err(|_| anyhow!("secret key must be 32 bytes"))?;
        let token = stored
            .token
            .map(|t| hex::decode(t))
            .transpose()
            .context("invalid token encoding")?;

        Ok(Key {
            signing_key,
            public_key,
            secret_key,
            token,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " --------- Device Key Information:")?;
        writeln!(f, " PubKey     : {}", hex::encode(&self.public_key))?;
        writeln!(f, " SecretKey  : {}", hex::encode(self.secret_key))?;
        write!(
            f,
            " Token      : {}",
            self.token.as_ref().map(hex::encode).unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_key_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fleet-keystore-test-{tag}-{}", rand::random::<u64>()))
    }

    #[test]
    fn test_generate_produces_padded_public_key() {
        let key = Key::generate();
        assert_eq!(key.public_key.len(), 64);
        assert_eq!(key.secret_key.len(), 32);
        assert!(key.token.is_none());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = temp_key_path("roundtrip");
        let path = dir.join("key.data");

        let mut key = Key::generate();
        key.token = Some(vec![0xAA, 0xBB, 0xCC]);
        key.save(&path).unwrap();

        let loaded = Key::load(&path).unwrap();
        assert_eq!(loaded.public_key, key.public_key);
        assert_eq!(loaded.secret_key, key.secret_key);
        assert_eq!(loaded.token, key.token);
        assert_eq!(
            loaded.signing_key().to_bytes(),
            key.signing_key().to_bytes()
        );

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let path = temp_key_path("missing").join("key.data");
        assert!(Key::load(path).is_err());
    }

    #[test]
    fn test_load_rejects_unknown_curve() {
        let dir = temp_key_path("curve");
        let path = dir.join("key.data");
        let key = Key::generate();
        key.save(&path).unwrap();

        let tampered = fs::read_to_string(&path)
            .unwrap()
            .replace("\"p256\"", "\"p384\"");
        fs::write(&path, tampered).unwrap();

        assert!(Key::load(&path).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
