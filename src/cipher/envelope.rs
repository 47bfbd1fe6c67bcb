use serde::{Deserialize, Serialize};

use crate::Error;

/// Descriptor of an encrypted file travelling inside a message body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Blob store path of the ciphertext.
    pub path: String,
    /// File key, base64.
    pub key: String,
    /// Original file name.
    pub name: String,
    /// Media type.
    pub mime_type: String,
    /// Plaintext size in bytes.
    pub size: u64,
}

/// Structured message body, encrypted as the message plaintext.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Text content.
    pub text: String,
    /// Attached files.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl MessageEnvelope {
    /// A text-only body.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub(crate) fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}
