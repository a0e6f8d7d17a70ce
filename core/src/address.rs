use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Version byte prepended to the hashed token.
const VERSION: u8 = 0x00;
/// Bytes of the double-SHA-256 checksum appended to the payload.
const CHECKSUM_LEN: usize = 4;

/// Derives the base58 chain lookup key for a device token:
/// `bs58(version ‖ RIPEMD160(SHA256(token)) ‖ checksum)`.
///
/// Pure function; the address is the key under which a device's tail
/// pointer lives.
pub fn address_from_token(token: &[u8]) -> String {
    let sha = Sha256::digest(token);
    let pub_hash = Ripemd160::digest(sha);

    let mut payload = Vec::with_capacity(1 + pub_hash.len() + CHECKSUM_LEN);
    payload.push(VERSION);
    payload.extend_from_slice(&pub_hash);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);

    bs58::encode(payload).into_string()
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}
