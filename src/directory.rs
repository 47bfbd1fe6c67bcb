use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::crypto::random_bytes;
use crate::{Error, IdentityPublicKey, PeerKeys, PreKey, X25519PublicKey};

/// Public half of one pre-key in a bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePreKey {
    /// Pre-key id.
    pub id: u32,
    /// X25519 public key, base64.
    pub public_key: String,
}

/// Everything a peer needs to open a session toward a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBundle {
    /// Ed25519 identity key, base64.
    pub identity_key: String,
    /// Published pre-key pool.
    pub pre_keys: Vec<BundlePreKey>,
    /// Publication time in unix milliseconds.
    pub created_at: u64,
}

impl DeviceBundle {
    pub(crate) fn new(identity_key: IdentityPublicKey, pre_keys: &[PreKey], created_at: u64) -> Self {
        Self {
            identity_key: identity_key.to_base64(),
            pre_keys: pre_keys
                .iter()
                .map(|pre_key| BundlePreKey {
                    id: pre_key.id(),
                    public_key: pre_key.public_key().to_base64(),
                })
                .collect(),
            created_at,
        }
    }

    /// Decodes the identity key.
    pub fn identity(&self) -> Result<IdentityPublicKey, Error> {
        IdentityPublicKey::from_base64(&self.identity_key)
    }

    /// Picks a pre-key from the pool at random and returns the keys to
    /// initiate against.
    pub fn peer_keys(&self, peer_id: &str) -> Result<PeerKeys, Error> {
        if self.pre_keys.is_empty() {
            return Err(Error::PeerHasNoPreKeys(peer_id.to_string()));
        }

        let draw = u64::from_le_bytes(random_bytes::<8>()?);
        let len = u64::try_from(self.pre_keys.len())
            .map_err(|_| Error::Protocol("pre-key pool too large".to_string()))?;
        let position = usize::try_from(draw % len)
            .map_err(|_| Error::Protocol("pre-key pool too large".to_string()))?;
        let chosen = self
            .pre_keys
            .get(position)
            .ok_or_else(|| Error::PeerHasNoPreKeys(peer_id.to_string()))?;

        Ok(PeerKeys {
            identity_key: self.identity()?,
            pre_key_id: chosen.id,
            pre_key: X25519PublicKey::from_base64(&chosen.public_key)?,
        })
    }
}

/// Where device bundles are published and looked up.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Fetches the bundle `peer_id` last published, if any.
    async fn fetch_device_bundle(&self, peer_id: &str) -> Result<Option<DeviceBundle>, Error>;

    /// Publishes `bundle` for `owner_id`, replacing the previous one.
    async fn publish_device_bundle(&self, owner_id: &str, bundle: DeviceBundle) -> Result<(), Error>;
}

/// In-process [`DeviceDirectory`].
#[derive(Default)]
pub struct MemoryDirectory {
    bundles: RwLock<HashMap<String, DeviceBundle>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeviceDirectory for MemoryDirectory {
    async fn fetch_device_bundle(&self, peer_id: &str) -> Result<Option<DeviceBundle>, Error> {
        Ok(self.bundles.read().await.get(peer_id).cloned())
    }

    async fn publish_device_bundle(&self, owner_id: &str, bundle: DeviceBundle) -> Result<(), Error> {
        self.bundles
            .write()
            .await
            .insert(owner_id.to_string(), bundle);
        Ok(())
    }
}
