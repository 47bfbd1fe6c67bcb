use serde::{Deserialize, Serialize};

use crate::{Error, IdentityPublicKey, X25519PublicKey};

const AAD_LABEL: &[u8] = b"Quill-Header-v1";

/// Routing header that travels next to every ciphertext.
///
/// Carries what a receiver needs to find or rebuild the session and to seek
/// to the message key. All fields are public key material or indices; nothing
/// here is secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHeader {
    /// Sender's Ed25519 identity key, base64.
    pub sender_identity_key: String,
    /// Sender's ephemeral X25519 key, base64. Addresses the session.
    pub ephemeral_key: String,
    /// Receiver pre-key the sender agreed against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_key_id: Option<u32>,
    /// Position of the message key in the session chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_index: Option<u64>,
}

impl SessionHeader {
    /// Parses and validates a header received from the wire.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let header: Self = serde_json::from_str(json)?;
        header.keys()?;
        Ok(header)
    }

    /// Serializes the header for the wire.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns a copy addressed to `index`.
    pub fn with_message_index(&self, index: u64) -> Self {
        Self {
            message_index: Some(index),
            ..self.clone()
        }
    }

    /// Message index, absent meaning the first message.
    pub fn index(&self) -> u64 {
        self.message_index.unwrap_or(0)
    }

    /// Decodes the sender identity and ephemeral keys.
    pub fn keys(&self) -> Result<(IdentityPublicKey, X25519PublicKey), Error> {
        let identity = IdentityPublicKey::from_base64(&self.sender_identity_key)?;
        let ephemeral = X25519PublicKey::from_base64(&self.ephemeral_key)?;
        Ok((identity, ephemeral))
    }

    /// Canonical byte form bound into every ciphertext as associated data.
    ///
    /// Built from the decoded keys, so two encodings of the same header agree
    /// and any change to a field changes the bytes.
    pub fn associated_data(&self) -> Result<Vec<u8>, Error> {
        let (identity, ephemeral) = self.keys()?;

        let mut aad = Vec::with_capacity(AAD_LABEL.len() + 32 + 32 + 5 + 8);
        aad.extend_from_slice(AAD_LABEL);
        aad.extend_from_slice(&identity.to_bytes());
        aad.extend_from_slice(ephemeral.as_bytes());
        match self.pre_key_id {
            Some(id) => {
                aad.push(1);
                aad.extend_from_slice(&id.to_be_bytes());
            }
            None => aad.extend_from_slice(&[0; 5]),
        }
        aad.extend_from_slice(&self.index().to_be_bytes());
        Ok(aad)
    }
}
