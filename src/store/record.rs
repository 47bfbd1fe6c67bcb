use std::fmt;

use prost::Message;

use crate::Error;
use crate::crypto::{decode_base64, encode_base64};

/// What kind of secret a stored record carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum KeyType {
    /// Ed25519 identity seed.
    Identity = 0,
    /// X25519 pre-key secret.
    PreKey = 1,
    /// Per-peer session.
    Session = 2,
    /// Shared secret addressed by ephemeral key.
    SessionSecret = 3,
    /// Sender chain position addressed by ephemeral key.
    ChainKey = 4,
}

/// Private material of a stored record, either in the clear (legacy, no
/// vault) or wrapped by the vault.
#[derive(Clone, PartialEq, prost::Oneof)]
#[prost(skip_debug)]
pub enum KeyMaterial {
    /// Raw bytes written before any vault existed.
    #[prost(bytes = "vec", tag = "4")]
    Plain(Vec<u8>),
    /// Vault token.
    #[prost(string, tag = "5")]
    Wrapped(String),
}

/// The unit of storage for anything that holds private key material.
#[derive(Clone, PartialEq, prost::Message)]
#[prost(skip_debug)]
pub struct StoredKeyRecord {
    /// Table key of the record.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Public half, when the record has one.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub public_key: Option<Vec<u8>>,
    /// [`KeyType`] discriminant.
    #[prost(enumeration = "KeyType", tag = "3")]
    pub key_type: i32,
    /// Private material.
    #[prost(oneof = "KeyMaterial", tags = "4, 5")]
    pub material: Option<KeyMaterial>,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(bytes) => write!(f, "Plain(<{} bytes>)", bytes.len()),
            Self::Wrapped(token) => write!(f, "Wrapped(<{} chars>)", token.len()),
        }
    }
}

impl fmt::Debug for StoredKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredKeyRecord")
            .field("id", &self.id)
            .field("key_type", &self.key_type)
            .field("material", &self.material)
            .finish_non_exhaustive()
    }
}

impl StoredKeyRecord {
    /// Returns the decoded key type.
    pub fn kind(&self) -> Result<KeyType, Error> {
        KeyType::try_from(self.key_type)
            .map_err(|_| Error::Serde(format!("unknown key type {}", self.key_type)))
    }

    pub(crate) fn to_table_value(&self) -> String {
        encode_base64(&self.encode_to_vec())
    }

    pub(crate) fn from_table_value(value: &str) -> Result<Self, Error> {
        let bytes = decode_base64(value)?;
        Ok(Self::decode(bytes.as_slice())?)
    }
}
