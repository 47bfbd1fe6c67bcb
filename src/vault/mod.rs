mod kdf;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::crypto::{decode_base64, encode_base64};
use crate::config::MIN_KDF_ITERATIONS;
use crate::{Config, Error};
use kdf::{VaultKey, generate_salt};

/// Unencrypted vault metadata persisted next to the wrapped keys.
#[derive(Clone, PartialEq, prost::Message)]
pub struct VaultMeta {
    /// PBKDF2 salt, base64.
    #[prost(string, tag = "1")]
    pub salt: String,
    /// Known plaintext sealed under the derived key.
    #[prost(string, tag = "2")]
    pub verifier: String,
    /// Creation time in unix milliseconds.
    #[prost(uint64, tag = "3")]
    pub created_at: u64,
    /// PBKDF2 rounds used when the vault was created.
    #[prost(uint32, tag = "4")]
    pub iterations: u32,
    /// The known plaintext behind `verifier`. Empty in metadata written
    /// before it was recorded; the configured value applies then.
    #[prost(bytes = "vec", tag = "5")]
    pub verifier_plaintext: Vec<u8>,
}

/// Capability handle over the password-derived key.
///
/// The key lives in a volatile slot between [`Vault::unlock`] and
/// [`Vault::lock`]. Clones share the slot; it is never written to storage.
#[derive(Clone)]
pub struct Vault {
    slot: Arc<RwLock<Option<VaultKey>>>,
    iterations: u32,
    verifier_plaintext: Arc<[u8]>,
}

impl Vault {
    /// Creates a locked vault handle.
    pub fn new(config: &Config) -> Self {
        Self {
            slot: Arc::new(RwLock::new(None)),
            iterations: config.effective_kdf_iterations(),
            verifier_plaintext: Arc::from(config.verifier_plaintext.as_slice()),
        }
    }

    /// Creates vault metadata for `password` and leaves the vault unlocked.
    pub async fn initialize(&self, password: &str) -> Result<VaultMeta, Error> {
        let salt = generate_salt()?;
        let key = VaultKey::derive(password.as_bytes(), &salt, self.iterations);
        let verifier = key.seal(&self.verifier_plaintext)?;

        *self.slot.write().await = Some(key);
        tracing::info!(iterations = self.iterations, "vault initialized");

        Ok(VaultMeta {
            salt: encode_base64(&salt),
            verifier,
            created_at: unix_millis(),
            iterations: self.iterations,
            verifier_plaintext: self.verifier_plaintext.to_vec(),
        })
    }

    /// Re-derives the key from `password` and checks it against the verifier.
    ///
    /// Any failure (malformed salt, failed tag check, verifier mismatch) is
    /// reported as `false` and leaves the vault locked.
    pub async fn unlock(&self, password: &str, meta: &VaultMeta) -> bool {
        let expected: &[u8] = if meta.verifier_plaintext.is_empty() {
            &self.verifier_plaintext[..]
        } else {
            meta.verifier_plaintext.as_slice()
        };

        let key = decode_base64(&meta.salt).ok().and_then(|salt| {
            let iterations = meta.iterations.max(MIN_KDF_ITERATIONS);
            let key = VaultKey::derive(password.as_bytes(), &salt, iterations);
            let opened = key.open(&meta.verifier).ok()?;
            (opened.as_slice() == expected).then_some(key)
        });

        let unlocked = key.is_some();
        *self.slot.write().await = key;
        if unlocked {
            tracing::info!("vault unlocked");
        } else {
            tracing::warn!("vault unlock rejected");
        }

        unlocked
    }

    /// Drops the derived key.
    pub async fn lock(&self) {
        *self.slot.write().await = None;
        tracing::info!("vault locked");
    }

    /// Returns whether a derived key is currently held.
    pub async fn is_unlocked(&self) -> bool {
        self.slot.read().await.is_some()
    }

    /// Seals an opaque value under the derived key.
    pub async fn encrypt_value(&self, plaintext: &[u8]) -> Result<String, Error> {
        match self.slot.read().await.as_ref() {
            Some(key) => key.seal(plaintext),
            None => Err(Error::VaultLocked),
        }
    }

    /// Opens a value sealed by [`Vault::encrypt_value`].
    pub async fn decrypt_value(&self, token: &str) -> Result<Zeroizing<Vec<u8>>, Error> {
        match self.slot.read().await.as_ref() {
            Some(key) => key.open(token),
            None => Err(Error::VaultLocked),
        }
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_unlock_lock() {
        let vault = Vault::new(&Config::default());
        let meta = vault.initialize("correct horse").await.unwrap();
        assert!(vault.is_unlocked().await);

        let token = vault.encrypt_value(b"secret").await.unwrap();
        assert_eq!(
            vault.decrypt_value(&token).await.unwrap().as_slice(),
            b"secret"
        );

        vault.lock().await;
        assert!(!vault.is_unlocked().await);
        assert!(matches!(
            vault.encrypt_value(b"secret").await,
            Err(Error::VaultLocked)
        ));
        assert!(matches!(
            vault.decrypt_value(&token).await,
            Err(Error::VaultLocked)
        ));

        assert!(!vault.unlock("wrong horse", &meta).await);
        assert!(!vault.is_unlocked().await);

        assert!(vault.unlock("correct horse", &meta).await);
        assert_eq!(
            vault.decrypt_value(&token).await.unwrap().as_slice(),
            b"secret"
        );
    }

    #[tokio::test]
    async fn test_unlock_rejects_tampered_meta() {
        let vault = Vault::new(&Config::default());
        let meta = vault.initialize("pw").await.unwrap();
        vault.lock().await;

        let mut bad_salt = meta.clone();
        bad_salt.salt = "%%%".to_string();
        assert!(!vault.unlock("pw", &bad_salt).await);

        let mut bad_verifier = meta.clone();
        bad_verifier.verifier = vault_token_with_flipped_byte(&meta.verifier);
        assert!(!vault.unlock("pw", &bad_verifier).await);
        assert!(!vault.is_unlocked().await);
    }

    #[tokio::test]
    async fn test_failed_unlock_locks() {
        let vault = Vault::new(&Config::default());
        let meta = vault.initialize("pw").await.unwrap();
        assert!(vault.is_unlocked().await);

        assert!(!vault.unlock("not pw", &meta).await);
        assert!(!vault.is_unlocked().await);
        assert!(matches!(
            vault.encrypt_value(b"secret").await,
            Err(Error::VaultLocked)
        ));
    }

    #[tokio::test]
    async fn test_verifier_plaintext_travels_with_meta() {
        let vault = Vault::new(&Config::default());
        let meta = vault.initialize("pw").await.unwrap();
        assert_eq!(
            meta.verifier_plaintext,
            Config::default().verifier_plaintext
        );

        let reconfigured = Vault::new(&Config {
            verifier_plaintext: b"another-verifier".to_vec(),
            ..Config::default()
        });
        assert!(reconfigured.unlock("pw", &meta).await);

        // Metadata without the recorded plaintext falls back to the config.
        let mut legacy = meta.clone();
        legacy.verifier_plaintext.clear();
        assert!(!reconfigured.unlock("pw", &legacy).await);
        assert!(Vault::new(&Config::default()).unlock("pw", &legacy).await);
    }

    #[tokio::test]
    async fn test_clones_share_slot() {
        let vault = Vault::new(&Config::default());
        let other = vault.clone();

        vault.initialize("pw").await.unwrap();
        assert!(other.is_unlocked().await);

        other.lock().await;
        assert!(!vault.is_unlocked().await);
    }

    fn vault_token_with_flipped_byte(token: &str) -> String {
        let mut bytes = decode_base64(token).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        encode_base64(&bytes)
    }
}
