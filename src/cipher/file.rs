use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{open, seal};
use crate::Error;
use crate::crypto::{decode_key_bytes, encode_base64, generate_random_seed};

/// Independent key for one file. Never taken from the message ratchet.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FileKey(Box<[u8; 32]>);

impl FileKey {
    /// Creates a fresh random file key.
    pub fn generate() -> Result<Self, Error> {
        Ok(Self(generate_random_seed()?))
    }

    /// Encodes the key for an attachment descriptor.
    pub fn to_base64(&self) -> String {
        encode_base64(self.0.as_slice())
    }

    /// Decodes a key from an attachment descriptor.
    pub fn from_base64(token: &str) -> Result<Self, Error> {
        let mut bytes = decode_key_bytes(token)?;
        let key = Self(Box::new(bytes));
        bytes.zeroize();
        Ok(key)
    }
}

/// Encrypts file contents under a freshly generated key.
///
/// Returns `nonce || ciphertext || tag` and the key that opens it.
pub fn encrypt_file(contents: &[u8]) -> Result<(Vec<u8>, FileKey), Error> {
    let key = FileKey::generate()?;
    let ciphertext = seal(&key.0, contents, b"")?;
    Ok((ciphertext, key))
}

/// Decrypts file contents produced by [`encrypt_file`].
pub fn decrypt_file(ciphertext: &[u8], key: &FileKey) -> Result<Vec<u8>, Error> {
    open(&key.0, ciphertext, b"")
}
