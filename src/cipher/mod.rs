mod envelope;
pub use envelope::*;
mod file;
pub use file::*;

use aes_gcm_siv::aead::{Aead, KeyInit, Payload};
use aes_gcm_siv::{Aes256GcmSiv, Key, Nonce};

use crate::crypto::{decode_base64, encode_base64, random_bytes};
use crate::{Error, MessageKey};

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;

/// Encrypts a message body under a ratchet key.
///
/// `aad` is bound to the ciphertext and must be presented again to decrypt.
/// Output is base64 of `nonce || ciphertext || tag`.
pub fn encrypt_text(key: &MessageKey, plaintext: &str, aad: &[u8]) -> Result<String, Error> {
    seal(key.as_bytes(), plaintext.as_bytes(), aad).map(|bytes| encode_base64(&bytes))
}

/// Decrypts a body produced by [`encrypt_text`].
pub fn decrypt_text(key: &MessageKey, ciphertext: &str, aad: &[u8]) -> Result<String, Error> {
    let bytes = decode_base64(ciphertext).map_err(|_| Error::AuthenticationFailure)?;
    let plaintext = open(key.as_bytes(), &bytes, aad)?;
    String::from_utf8(plaintext).map_err(|_| Error::AuthenticationFailure)
}

fn cipher(key: &[u8; 32]) -> Aes256GcmSiv {
    Aes256GcmSiv::new(Key::<Aes256GcmSiv>::from_slice(key))
}

pub(crate) fn seal(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    let nonce = random_bytes::<NONCE_SIZE>()?;
    let ciphertext = cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| Error::Crypto("encryption failed".to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

pub(crate) fn open(key: &[u8; 32], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::AuthenticationFailure);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    Ok(cipher(key).decrypt(
        Nonce::from_slice(nonce),
        Payload {
            msg: ciphertext,
            aad,
        },
    )?)
}
