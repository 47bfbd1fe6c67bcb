mod header;
pub use header::*;

use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{generate_random_seed, hash};
use crate::{Error, IdentityKey, IdentityPublicKey, PreKey, X25519PublicKey, X25519Secret};

/// Session root derived from the three Diffie-Hellman outputs.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionSecret(Box<[u8; 32]>);

impl SessionSecret {
    /// Borrows the raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub(crate) fn from_slice(bytes: &[u8]) -> Result<Self, Error> {
        let bytes = <[u8; 32]>::try_from(bytes)
            .map_err(|_| Error::Serde(format!("expected 32 secret bytes, got {}", bytes.len())))?;
        Ok(Self(Box::new(bytes)))
    }
}

impl PartialEq for SessionSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// The peer keys an initiator agrees against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerKeys {
    /// Peer's Ed25519 identity key.
    pub identity_key: IdentityPublicKey,
    /// Id of the chosen peer pre-key.
    pub pre_key_id: u32,
    /// The chosen peer pre-key.
    pub pre_key: X25519PublicKey,
}

/// Outcome of a successful initiation: the session root plus the header the
/// responder needs to rebuild it.
pub struct EstablishedSession {
    shared_secret: SessionSecret,
    header: SessionHeader,
}

impl EstablishedSession {
    pub(crate) fn new(shared_secret: SessionSecret, header: SessionHeader) -> Self {
        Self {
            shared_secret,
            header,
        }
    }

    /// The session root.
    pub fn shared_secret(&self) -> &SessionSecret {
        &self.shared_secret
    }

    /// The header to send with the first and every later message.
    pub fn header(&self) -> &SessionHeader {
        &self.header
    }
}

/// Initiates a session toward `peer` as the sender.
///
/// A fresh ephemeral key is generated for every call, so two initiations never
/// share a root.
pub fn initiate(own_identity: &IdentityKey, peer: &PeerKeys) -> Result<EstablishedSession, Error> {
    let own_exchange = own_identity.exchange_secret();
    let peer_exchange = peer.identity_key.to_exchange_key();
    let ephemeral = X25519Secret::from(generate_random_seed()?);

    // DH1 = DH(IKa, PKb)
    let dh1 = own_exchange.dh(&peer.pre_key);
    // DH2 = DH(EKa, IKb)
    let dh2 = ephemeral.dh(&peer_exchange);
    // DH3 = DH(EKa, PKb)
    let dh3 = ephemeral.dh(&peer.pre_key);

    let shared_secret = calculate_shared_secret(dh1, dh2, dh3)?;
    let header = SessionHeader {
        sender_identity_key: own_identity.public_key().to_base64(),
        ephemeral_key: ephemeral.public_key().to_base64(),
        pre_key_id: Some(peer.pre_key_id),
        message_index: None,
    };

    Ok(EstablishedSession::new(shared_secret, header))
}

/// Rebuilds the sender's session root from a received header.
///
/// `own_pre_key` must be the pre-key named by `header.pre_key_id`.
pub fn respond(
    own_identity: &IdentityKey,
    own_pre_key: &PreKey,
    header: &SessionHeader,
) -> Result<SessionSecret, Error> {
    if header.pre_key_id.is_some_and(|id| id != own_pre_key.id()) {
        return Err(Error::Protocol(format!(
            "header names pre-key {:?}, got {}",
            header.pre_key_id,
            own_pre_key.id()
        )));
    }

    let (sender_identity, sender_ephemeral) = header.keys()?;
    let sender_exchange = sender_identity.to_exchange_key();

    // DH1 = DH(PKb, IKa)
    let dh1 = own_pre_key.dh(&sender_exchange);
    // DH2 = DH(IKb, EKa)
    let dh2 = own_identity.exchange_secret().dh(&sender_ephemeral);
    // DH3 = DH(PKb, EKa)
    let dh3 = own_pre_key.dh(&sender_ephemeral);

    calculate_shared_secret(dh1, dh2, dh3)
}

fn calculate_shared_secret(
    dh1: SharedSecret,
    dh2: SharedSecret,
    dh3: SharedSecret,
) -> Result<SessionSecret, Error> {
    if ![&dh1, &dh2, &dh3].iter().all(|dh| dh.was_contributory()) {
        return Err(Error::Crypto("non-contributory key agreement".to_string()));
    }

    // IKM = DH1 || DH2 || DH3
    let mut key_material = Zeroizing::new([0u8; 96]);
    key_material[0..32].copy_from_slice(dh1.as_bytes());
    key_material[32..64].copy_from_slice(dh2.as_bytes());
    key_material[64..96].copy_from_slice(dh3.as_bytes());

    Ok(SessionSecret(Box::new(hash(key_material.as_slice()))))
}
