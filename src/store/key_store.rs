use std::collections::HashMap;
use std::sync::Arc;

use prost::Message;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use super::{
    IDENTITY_KEY, KeyMaterial, KeyType, KeyValueStore, PRE_KEY_PREFIX, SESSION_BY_KEY_PREFIX,
    SESSION_CHAIN_PREFIX, SESSION_COUNTER_PREFIX, SESSION_PREFIX, StoredKeyRecord, VAULT_META,
    pre_key_id, session_chain_id, session_counter_id,
};
use crate::crypto::{decode_base64, encode_base64};
use crate::vault::{Vault, VaultMeta};
use crate::{Chain, Error, IdentityKey, MessageKey, PreKey};

/// A record with its private material already unwrapped.
pub struct StoredKey {
    /// Table key of the record.
    pub id: String,
    /// Kind of secret.
    pub key_type: KeyType,
    /// Public half, when the record has one.
    pub public_key: Option<Vec<u8>>,
    /// Private material.
    pub secret: Zeroizing<Vec<u8>>,
}

/// Key store over a flat [`KeyValueStore`].
///
/// Private material passes through the [`Vault`] on every write and read once
/// a vault exists. Without a vault, records are written in the legacy
/// plaintext form; the mode is decided per write and recorded in the record
/// itself, so a reader always knows which path a record took.
pub struct KeyStore {
    backend: Arc<dyn KeyValueStore>,
    vault: Vault,
    counter_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyStore {
    /// Creates a key store over `backend`, guarded by `vault`.
    pub fn new(backend: Arc<dyn KeyValueStore>, vault: Vault) -> Self {
        Self {
            backend,
            vault,
            counter_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the vault handle this store wraps records with.
    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// Reads the persisted vault metadata.
    pub async fn vault_meta(&self) -> Result<Option<VaultMeta>, Error> {
        match self.backend.get(VAULT_META).await? {
            Some(value) => {
                let bytes = decode_base64(&value)?;
                Ok(Some(VaultMeta::decode(bytes.as_slice())?))
            }
            None => Ok(None),
        }
    }

    /// Returns whether a vault was ever initialized. Locking does not change
    /// this.
    pub async fn has_vault(&self) -> Result<bool, Error> {
        Ok(self.backend.get(VAULT_META).await?.is_some())
    }

    /// Creates the vault, persists its metadata and leaves it unlocked.
    pub async fn initialize_vault(&self, password: &str) -> Result<VaultMeta, Error> {
        if self.has_vault().await? {
            return Err(Error::Protocol("vault already initialized".to_string()));
        }

        let meta = self.vault.initialize(password).await?;
        self.backend
            .put(VAULT_META, encode_base64(&meta.encode_to_vec()))
            .await?;

        Ok(meta)
    }

    /// Unlocks the vault. Returns `false` for a wrong password or when no
    /// vault exists.
    pub async fn unlock_vault(&self, password: &str) -> Result<bool, Error> {
        match self.vault_meta().await? {
            Some(meta) => Ok(self.vault.unlock(password, &meta).await),
            None => Ok(false),
        }
    }

    /// Drops the derived key. Vault metadata stays.
    pub async fn lock_vault(&self) {
        self.vault.lock().await;
    }

    /// Writes a record, wrapping `secret` through the vault when one exists.
    pub async fn store_key(
        &self,
        id: &str,
        key_type: KeyType,
        public_key: Option<&[u8]>,
        secret: &[u8],
    ) -> Result<(), Error> {
        let material = if self.has_vault().await? {
            KeyMaterial::Wrapped(self.vault.encrypt_value(secret).await?)
        } else {
            KeyMaterial::Plain(secret.to_vec())
        };

        let record = StoredKeyRecord {
            id: id.to_string(),
            public_key: public_key.map(<[u8]>::to_vec),
            key_type: key_type as i32,
            material: Some(material),
        };

        self.backend.put(id, record.to_table_value()).await
    }

    /// Reads a record and unwraps its private material.
    ///
    /// A wrapped record read while the vault is locked fails with
    /// [`Error::VaultLocked`].
    pub async fn get_key(&self, id: &str) -> Result<Option<StoredKey>, Error> {
        let Some(value) = self.backend.get(id).await? else {
            return Ok(None);
        };
        let record = StoredKeyRecord::from_table_value(&value)?;
        let key_type = record.kind()?;

        let secret = match record.material {
            Some(KeyMaterial::Wrapped(token)) => self.vault.decrypt_value(&token).await?,
            Some(KeyMaterial::Plain(bytes)) => {
                if self.has_vault().await? {
                    tracing::warn!(record = id, "reading legacy plaintext record");
                }
                Zeroizing::new(bytes)
            }
            None => return Err(Error::Serde(format!("record {id} has no key material"))),
        };

        Ok(Some(StoredKey {
            id: record.id,
            key_type,
            public_key: record.public_key,
            secret,
        }))
    }

    /// Removes a record.
    pub async fn delete_key(&self, id: &str) -> Result<(), Error> {
        self.backend.delete(id).await
    }

    /// Rewrites every legacy plaintext record through the vault. Returns the
    /// number of records sealed.
    pub async fn seal_legacy_records(&self) -> Result<usize, Error> {
        if !self.has_vault().await? {
            return Err(Error::Protocol("no vault to seal records with".to_string()));
        }
        if !self.vault.is_unlocked().await {
            return Err(Error::VaultLocked);
        }

        let mut sealed = 0;
        for id in self.record_ids().await? {
            let Some(value) = self.backend.get(&id).await? else {
                continue;
            };
            let mut record = StoredKeyRecord::from_table_value(&value)?;
            if let Some(KeyMaterial::Plain(bytes)) = record.material.take() {
                let bytes = Zeroizing::new(bytes);
                record.material = Some(KeyMaterial::Wrapped(self.vault.encrypt_value(&bytes).await?));
                self.backend.put(&id, record.to_table_value()).await?;
                sealed += 1;
            }
        }

        tracing::info!(sealed, "sealed legacy records");
        Ok(sealed)
    }

    /// Destroys every key, session, counter and the vault metadata, then
    /// locks the vault.
    pub async fn reset(&self) -> Result<(), Error> {
        let mut ids = self.record_ids().await?;
        ids.extend(self.backend.keys_with_prefix(SESSION_COUNTER_PREFIX).await?);
        ids.push(VAULT_META.to_string());

        for id in ids {
            self.backend.delete(&id).await?;
        }
        self.counter_locks.lock().await.clear();
        self.vault.lock().await;

        tracing::info!("key store reset");
        Ok(())
    }

    /// Persists the device identity key.
    pub async fn store_identity_key(&self, identity_key: &IdentityKey) -> Result<(), Error> {
        let public = identity_key.public_key().to_bytes();
        self.store_key(
            IDENTITY_KEY,
            KeyType::Identity,
            Some(public.as_slice()),
            identity_key.to_bytes().as_slice(),
        )
        .await
    }

    /// Loads the device identity key.
    pub async fn load_identity_key(&self) -> Result<IdentityKey, Error> {
        let stored = self
            .get_key(IDENTITY_KEY)
            .await?
            .ok_or_else(|| Error::KeyNotFound(IDENTITY_KEY.to_string()))?;
        IdentityKey::from_bytes(&stored.secret)
    }

    /// Persists a pre-key under `prekey:<id>`.
    pub async fn store_pre_key(&self, pre_key: &PreKey) -> Result<(), Error> {
        let public = pre_key.public_key().to_bytes();
        self.store_key(
            &pre_key_id(pre_key.id()),
            KeyType::PreKey,
            Some(public.as_slice()),
            pre_key.secret_bytes(),
        )
        .await
    }

    /// Loads the pre-key with the given id, if we still have it.
    pub async fn load_pre_key(&self, id: u32) -> Result<Option<PreKey>, Error> {
        match self.get_key(&pre_key_id(id)).await? {
            Some(stored) => PreKey::from_secret_bytes(id, &stored.secret).map(Some),
            None => Ok(None),
        }
    }

    /// Loads every pre-key in the local pool, ordered by id.
    pub async fn load_pre_keys(&self) -> Result<Vec<PreKey>, Error> {
        let mut pre_keys = Vec::new();
        for id in self.backend.keys_with_prefix(PRE_KEY_PREFIX).await? {
            let numeric = id[PRE_KEY_PREFIX.len()..]
                .parse::<u32>()
                .map_err(|err| Error::Serde(format!("bad pre-key id {id}: {err}")))?;
            if let Some(pre_key) = self.load_pre_key(numeric).await? {
                pre_keys.push(pre_key);
            }
        }
        pre_keys.sort_by_key(PreKey::id);
        Ok(pre_keys)
    }

    /// Reads the next message index for a session without reserving it.
    pub async fn peek_counter(&self, ephemeral_key: &str) -> Result<u64, Error> {
        match self.backend.get(&session_counter_id(ephemeral_key)).await? {
            Some(value) => value
                .parse::<u64>()
                .map_err(|err| Error::Serde(format!("bad session counter: {err}"))),
            None => Ok(0),
        }
    }

    /// Reserves the next message index for `ephemeral_key`, runs `produce`
    /// with it, and commits the increment only if `produce` succeeds.
    ///
    /// Calls for the same ephemeral key are serialized, so no two callers
    /// observe the same index. A failed or abandoned call leaves the counter
    /// untouched and the index is handed out again.
    pub async fn with_next_counter<T, F>(&self, ephemeral_key: &str, produce: F) -> Result<T, Error>
    where
        F: FnOnce(u64) -> Result<T, Error>,
    {
        let lock = self.counter_lock(ephemeral_key).await;
        let _guard = lock.lock().await;

        let index = self.peek_counter(ephemeral_key).await?;
        let next = index
            .checked_add(1)
            .ok_or_else(|| Error::Protocol("session counter exhausted".to_string()))?;

        let output = produce(index)?;
        self.backend
            .put(&session_counter_id(ephemeral_key), next.to_string())
            .await?;

        Ok(output)
    }

    /// Hands the next sender message key of a session to `produce`.
    ///
    /// The chain is resumed from its persisted position under
    /// `session_chain:<ephemeralKey>` and stepped once with
    /// [`Chain::ratchet_for_send`]. When the stored position does not match
    /// the counter, the chain is rebuilt from `root`. The advanced chain and
    /// the counter are written only after `produce` succeeds, chain first.
    pub async fn with_next_send_key<T, F>(
        &self,
        ephemeral_key: &str,
        root: &[u8; 32],
        produce: F,
    ) -> Result<T, Error>
    where
        F: FnOnce(u64, &MessageKey) -> Result<T, Error>,
    {
        let lock = self.counter_lock(ephemeral_key).await;
        let _guard = lock.lock().await;

        let index = self.peek_counter(ephemeral_key).await?;
        let next = index
            .checked_add(1)
            .ok_or_else(|| Error::Protocol("session counter exhausted".to_string()))?;

        let chain_id = session_chain_id(ephemeral_key);
        let mut chain = match self.get_key(&chain_id).await? {
            Some(stored) => Chain::from_bytes(&stored.secret)?,
            None => Chain::new(root),
        };
        if chain.index() != index {
            tracing::debug!(
                stored = chain.index(),
                index,
                "rebuilding sender chain from root"
            );
            chain = Chain::at_index(root, index);
        }

        let message_key = chain.ratchet_for_send();
        let output = produce(index, &message_key)?;

        self.store_key(&chain_id, KeyType::ChainKey, None, chain.to_bytes().as_slice())
            .await?;
        self.backend
            .put(&session_counter_id(ephemeral_key), next.to_string())
            .await?;

        Ok(output)
    }

    /// Reserves and commits the next index for `ephemeral_key`.
    pub async fn increment_counter(&self, ephemeral_key: &str) -> Result<u64, Error> {
        self.with_next_counter(ephemeral_key, Ok).await
    }

    async fn counter_lock(&self, ephemeral_key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.counter_locks.lock().await;
        // Entries only the map still holds have no caller in flight.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(ephemeral_key.to_string())
            .or_default()
            .clone()
    }

    async fn record_ids(&self) -> Result<Vec<String>, Error> {
        let mut ids = Vec::new();
        if self.backend.get(IDENTITY_KEY).await?.is_some() {
            ids.push(IDENTITY_KEY.to_string());
        }
        for prefix in [
            PRE_KEY_PREFIX,
            SESSION_PREFIX,
            SESSION_BY_KEY_PREFIX,
            SESSION_CHAIN_PREFIX,
        ] {
            ids.extend(self.backend.keys_with_prefix(prefix).await?);
        }
        Ok(ids)
    }
}
