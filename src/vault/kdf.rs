use aes_gcm_siv::aead::{AeadInPlace, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Key, Nonce, Tag};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::Error;
use crate::crypto::{decode_base64, encode_base64, random_bytes};

pub(crate) const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// 256-bit key derived from the vault password. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct VaultKey(Box<[u8; 32]>);

impl VaultKey {
    /// Stretches `password` with PBKDF2-HMAC-SHA256.
    pub(crate) fn derive(password: &[u8], salt: &[u8], iterations: u32) -> Self {
        let mut key = Box::new([0u8; 32]);
        pbkdf2_hmac::<Sha256>(password, salt, iterations, key.as_mut_slice());
        Self(key)
    }

    fn cipher(&self) -> Aes256GcmSiv {
        Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(self.0.as_slice()))
    }

    /// Encrypts `plaintext` under a fresh nonce.
    ///
    /// Token layout (base64): `nonce (12) || tag (16) || ciphertext`.
    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<String, Error> {
        let nonce = random_bytes::<NONCE_SIZE>()?;
        let mut buffer = Zeroizing::new(plaintext.to_vec());

        let tag = self
            .cipher()
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
            .map_err(|_| Error::Crypto("vault encryption failed".to_string()))?;

        let mut token = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + buffer.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&tag);
        token.extend_from_slice(&buffer);

        Ok(encode_base64(&token))
    }

    /// Decrypts a token produced by [`VaultKey::seal`].
    pub(crate) fn open(&self, token: &str) -> Result<Zeroizing<Vec<u8>>, Error> {
        let bytes = decode_base64(token)?;
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(Error::AuthenticationFailure);
        }

        let (nonce, rest) = bytes.split_at(NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);
        let mut buffer = Zeroizing::new(ciphertext.to_vec());

        self.cipher().decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )?;

        Ok(buffer)
    }
}

/// Generates a fresh random salt. Salts are stored in the clear.
pub(crate) fn generate_salt() -> Result<[u8; SALT_SIZE], Error> {
    random_bytes::<SALT_SIZE>()
}
