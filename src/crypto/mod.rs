mod identity_key;
pub use identity_key::*;
mod pre_key;
pub use pre_key::*;
mod x25519;
pub use x25519::*;

use crate::Error;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::TryRngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Generates a cryptographically secure random 32-byte seed.
pub(crate) fn generate_random_seed() -> Result<Box<[u8; 32]>, Error> {
    let mut seed = Box::new([0u8; 32]);
    OsRng
        .try_fill_bytes(seed.as_mut_slice())
        .map_err(|_| Error::Random)?;
    Ok(seed)
}

/// Fills a fixed-size array from the operating system RNG.
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N], Error> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| Error::Random)?;
    Ok(bytes)
}

/// SHA-256 of `data`.
pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Performs X25519 key agreement and returns the raw shared bytes.
pub fn diffie_hellman(my_secret: &X25519Secret, their_public: &X25519PublicKey) -> [u8; 32] {
    my_secret.dh(their_public).to_bytes()
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn decode_base64(token: &str) -> Result<Vec<u8>, Error> {
    Ok(STANDARD.decode(token)?)
}

/// Decodes a base64 token that must hold exactly 32 bytes.
pub(crate) fn decode_key_bytes(token: &str) -> Result<[u8; 32], Error> {
    let bytes = decode_base64(token)?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| Error::Decode(format!("expected 32 key bytes, got {}", bytes.len())))
}
