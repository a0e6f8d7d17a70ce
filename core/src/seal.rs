use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::error::ChainError;

/// AES-GCM nonce length; the nonce is prepended to each sealed payload.
pub const NONCE_LEN: usize = 12;

fn cipher_for(passphrase: &[u8]) -> Aes256Gcm {
    // Stretch the passphrase to the 256-bit key width.
    let digest = Sha256::digest(passphrase);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest))
}

/// Seals a payload under a passphrase-derived key. Output layout:
/// `nonce ‖ ciphertext ‖ tag`.
pub fn seal(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, ChainError> {
    let cipher = cipher_for(passphrase);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| ChainError::Unknown("payload sealing failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Opens a sealed payload. Fails when the passphrase is wrong or the
/// ciphertext was tampered with.
pub fn unseal(passphrase: &[u8], sealed: &[u8]) -> Result<Vec<u8>, ChainError> {
    if sealed.len() < NONCE_LEN {
        return Err(ChainError::Unknown("sealed payload too short".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let cipher = cipher_for(passphrase);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ChainError::Unknown("payload authentication failed".into()))
}
