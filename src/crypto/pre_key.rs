use crate::{Error, X25519PublicKey, X25519Secret};
use x25519_dalek::SharedSecret;

use super::generate_random_seed;

/// A numbered X25519 pre-key published in the device bundle.
///
/// Pre-keys are addressed by id and stay in the pool after use; a peer picks
/// one at random for each handshake.
pub struct PreKey {
    pre_key: X25519Secret,
    id: u32,
}

impl PreKey {
    /// Creates a new pre-key with the given ID.
    pub fn generate(id: u32) -> Result<Self, Error> {
        let seed = generate_random_seed()?;

        Ok(Self {
            pre_key: X25519Secret::from(seed),
            id,
        })
    }

    /// Rebuilds a pre-key from its stored private bytes.
    pub fn from_secret_bytes(id: u32, bytes: &[u8]) -> Result<Self, Error> {
        let secret = <[u8; 32]>::try_from(bytes)
            .map_err(|_| Error::Decode(format!("pre-key {id} must be 32 bytes")))?;

        Ok(Self {
            pre_key: X25519Secret::from(Box::new(secret)),
            id,
        })
    }

    /// Returns the public component of this pre-key.
    pub fn public_key(&self) -> X25519PublicKey {
        self.pre_key.public_key()
    }

    /// Returns the identifier peers reference in session headers.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Performs Diffie-Hellman key agreement with the other party's public key.
    pub fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.pre_key.dh(public_key)
    }

    pub(crate) fn secret_bytes(&self) -> &[u8; 32] {
        self.pre_key.as_bytes()
    }
}
