use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::Signature;
use p256::{EncodedPoint, FieldBytes};

pub use p256::ecdsa::{SigningKey, VerifyingKey};

use crate::error::ChainError;

/// Width of a P-256 coordinate and of each signature half.
pub const COORDINATE_LEN: usize = 32;

/// Signs `msg` with deterministic (RFC 6979) ECDSA over P-256. The message
/// is prehashed with SHA-256 inside the signer. Returns `r ‖ s` with both
/// halves zero-padded to the coordinate width.
pub fn sign(key: &SigningKey, msg: &[u8]) -> Vec<u8> {
    let signature: Signature = key.sign(msg);
    signature.to_bytes().to_vec()
}

/// Verifies an `r ‖ s` signature over `msg` under `public_key` (`X ‖ Y`).
///
/// Both byte strings are split at `len / 2`; halves shorter than the
/// coordinate width are left-padded with zeros so that historical encodings
/// produced without padding still parse. Odd-length or oversized inputs are
/// rejected as `InvalidSignature`.
pub fn verify(public_key: &[u8], msg: &[u8], signature: &[u8]) -> Result<bool, ChainError> {
    let key = decode_public_key(public_key)?;

    if signature.is_empty() || signature.len() % 2 != 0 {
        return Err(ChainError::InvalidSignature);
    }
    let (r, s) = signature.split_at(signature.len() / 2);
    let mut sig_bytes = [0u8; COORDINATE_LEN * 2];
    sig_bytes[..COORDINATE_LEN].copy_from_slice(&pad_half(r)?);
    sig_bytes[COORDINATE_LEN..].copy_from_slice(&pad_half(s)?);
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| ChainError::InvalidSignature)?;

    Ok(key.verify(msg, &signature).is_ok())
}

/// Serializes a verifying key as `X ‖ Y`, each coordinate 32 bytes.
pub fn encode_public_key(key: &VerifyingKey) -> Vec<u8> {
    // SEC1 uncompressed form is 0x04 ‖ X ‖ Y with full-width coordinates.
    let point = key.to_encoded_point(false);
    point.as_bytes()[1..].to_vec()
}

/// Parses `X ‖ Y` bytes back into a verifying key, padding short halves.
pub fn decode_public_key(bytes: &[u8]) -> Result<VerifyingKey, ChainError> {
    if bytes.is_empty() || bytes.len() % 2 != 0 {
        return Err(ChainError::InvalidSignature);
    }
    let (x, y) = bytes.split_at(bytes.len() / 2);
    let x = FieldBytes::from(pad_half(x)?);
    let y = FieldBytes::from(pad_half(y)?);
    let point = EncodedPoint::from_affine_coordinates(&x, &y, false);
    VerifyingKey::from_encoded_point(&point).map_err(|_| ChainError::InvalidSignature)
}

fn pad_half(half: &[u8]) -> Result<[u8; COORDINATE_LEN], ChainError> {
    if half.len() > COORDINATE_LEN {
        return Err(ChainError::InvalidSignature);
    }
    let mut out = [0u8; COORDINATE_LEN];
    out[COORDINATE_LEN - half.len()..].copy_from_slice(half);
    Ok(out)
}
