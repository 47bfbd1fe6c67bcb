/// Errors that can occur while establishing sessions, ratcheting keys or
/// touching the local vault.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum Error {
    /// An identity key or pre-key is absent from the local key store.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The vault exists but holds no derived key. Unlock it first.
    #[error("Vault is locked")]
    VaultLocked,

    /// The password did not unlock the vault.
    #[error("Wrong password")]
    WrongPassword,

    /// The peer has not published a device bundle.
    #[error("Peer {0} has no published device")]
    PeerHasNoDevice(String),

    /// The peer's device bundle carries no pre-keys.
    #[error("Peer {0} has no pre-keys")]
    PeerHasNoPreKeys(String),

    /// An AEAD integrity check failed.
    #[error("Authentication failure")]
    AuthenticationFailure,

    /// A cached session no longer matches the peer's published device.
    #[error("Stale session for peer {0}")]
    StaleSession(String),

    /// A key or token could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A cryptographic operation failed.
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    /// A protocol rule was violated.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Random number generation failed.
    #[error("Random number generation failed")]
    Random,

    /// The backing key-value store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization or deserialization failed.
    #[error("Serialization/deserialization failed: {0}")]
    Serde(String),
}

impl From<aes_gcm_siv::Error> for Error {
    fn from(_: aes_gcm_siv::Error) -> Self {
        Self::AuthenticationFailure
    }
}

impl From<base64::DecodeError> for Error {
    fn from(value: base64::DecodeError) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<prost::DecodeError> for Error {
    fn from(value: prost::DecodeError) -> Self {
        Self::Serde(value.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value.to_string())
    }
}
