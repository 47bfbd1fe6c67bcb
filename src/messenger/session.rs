use std::fmt;

use prost::Message;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{DeviceBundle, Error, EstablishedSession, SessionHeader, SessionSecret};

/// Outbound session toward one peer, persisted under `session:<peerId>`.
///
/// Holds the root and enough of the original header to re-emit it on every
/// later message, plus the bundle fingerprint it was built against.
#[derive(Clone, PartialEq, prost::Message, Zeroize, ZeroizeOnDrop)]
#[prost(skip_debug)]
pub struct Session {
    /// Session root.
    #[prost(bytes = "vec", tag = "1")]
    pub shared_secret: Vec<u8>,
    /// Peer identity key the session was built against, base64.
    #[prost(string, tag = "2")]
    pub peer_identity_key: String,
    /// `createdAt` of the peer bundle the session was built against.
    #[prost(uint64, tag = "3")]
    pub peer_bundle_timestamp: u64,
    /// Our identity key as sent in the header, base64.
    #[prost(string, tag = "4")]
    pub sender_identity_key: String,
    /// Our ephemeral key as sent in the header, base64.
    #[prost(string, tag = "5")]
    pub ephemeral_key: String,
    /// Peer pre-key used in the handshake.
    #[prost(uint32, optional, tag = "6")]
    pub pre_key_id: Option<u32>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer_identity_key", &self.peer_identity_key)
            .field("peer_bundle_timestamp", &self.peer_bundle_timestamp)
            .field("sender_identity_key", &self.sender_identity_key)
            .field("ephemeral_key", &self.ephemeral_key)
            .field("pre_key_id", &self.pre_key_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn from_established(established: &EstablishedSession, bundle: &DeviceBundle) -> Self {
        let header = established.header();
        Self {
            shared_secret: established.shared_secret().as_bytes().to_vec(),
            peer_identity_key: bundle.identity_key.clone(),
            peer_bundle_timestamp: bundle.created_at,
            sender_identity_key: header.sender_identity_key.clone(),
            ephemeral_key: header.ephemeral_key.clone(),
            pre_key_id: header.pre_key_id,
        }
    }

    /// Whether the peer still publishes the device this session was built
    /// against.
    pub fn matches(&self, bundle: &DeviceBundle) -> bool {
        self.peer_identity_key == bundle.identity_key
            && self.peer_bundle_timestamp == bundle.created_at
    }

    pub(crate) fn to_established(&self) -> Result<EstablishedSession, Error> {
        let header = SessionHeader {
            sender_identity_key: self.sender_identity_key.clone(),
            ephemeral_key: self.ephemeral_key.clone(),
            pre_key_id: self.pre_key_id,
            message_index: None,
        };
        Ok(EstablishedSession::new(
            SessionSecret::from_slice(&self.shared_secret)?,
            header,
        ))
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        Ok(Self::decode(bytes)?)
    }
}
