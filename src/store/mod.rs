mod key_store;
pub use key_store::*;
mod record;
pub use record::*;

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;

// One flat table backs every record; families are kept apart by prefix.
//
// | key                              | contents                              |
// |----------------------------------|---------------------------------------|
// | `identity_key`                   | identity key record                   |
// | `prekey:<id>`                    | pre-key record                        |
// | `session:<peerId>`               | active session toward a peer          |
// | `session_by_key:<ephemeralKey>`  | shared secret addressed by header     |
// | `session_counter:<ephemeralKey>` | next message index, decimal           |
// | `session_chain:<ephemeralKey>`   | sender chain key and its index        |
// | `vault_meta`                     | vault metadata, unencrypted           |
pub(crate) const IDENTITY_KEY: &str = "identity_key";
pub(crate) const PRE_KEY_PREFIX: &str = "prekey:";
pub(crate) const SESSION_PREFIX: &str = "session:";
pub(crate) const SESSION_BY_KEY_PREFIX: &str = "session_by_key:";
pub(crate) const SESSION_COUNTER_PREFIX: &str = "session_counter:";
pub(crate) const SESSION_CHAIN_PREFIX: &str = "session_chain:";
pub(crate) const VAULT_META: &str = "vault_meta";

/// Storage backend for the key store.
///
/// Every call may suspend on I/O. Implementations must not interpret values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Writes `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: String) -> Result<(), Error>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Error>;

    /// Lists every key that starts with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Error>;
}

/// In-process [`KeyValueStore`].
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the raw table contents.
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), Error> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

pub(crate) fn pre_key_id(id: u32) -> String {
    format!("{PRE_KEY_PREFIX}{id}")
}

pub(crate) fn session_id(peer_id: &str) -> String {
    format!("{SESSION_PREFIX}{peer_id}")
}

pub(crate) fn session_by_key_id(ephemeral_key: &str) -> String {
    format!("{SESSION_BY_KEY_PREFIX}{ephemeral_key}")
}

pub(crate) fn session_counter_id(ephemeral_key: &str) -> String {
    format!("{SESSION_COUNTER_PREFIX}{ephemeral_key}")
}

pub(crate) fn session_chain_id(ephemeral_key: &str) -> String {
    format!("{SESSION_CHAIN_PREFIX}{ephemeral_key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);

        store.put("session:bob", "1".to_string()).await.unwrap();
        store.put("session_by_key:xyz", "2".to_string()).await.unwrap();
        store.put("prekey:1", "3".to_string()).await.unwrap();

        assert_eq!(store.get("prekey:1").await.unwrap().as_deref(), Some("3"));
        assert_eq!(
            store.keys_with_prefix(SESSION_PREFIX).await.unwrap(),
            vec!["session:bob".to_string()]
        );

        store.delete("prekey:1").await.unwrap();
        store.delete("prekey:1").await.unwrap();
        assert_eq!(store.get("prekey:1").await.unwrap(), None);
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[test]
    fn test_prefixes_do_not_collide() {
        let key = "abc";
        let ids = [
            session_id(key),
            session_by_key_id(key),
            session_counter_id(key),
            session_chain_id(key),
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(i + 1) {
                assert!(!a.starts_with(b.as_str()) && !b.starts_with(a.as_str()));
            }
        }
        assert!(!session_by_key_id(key).starts_with(SESSION_PREFIX));
        assert_eq!(pre_key_id(4), "prekey:4");
    }
}
