use crate::Error;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Public half of an X25519 key-exchange pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct X25519PublicKey(PublicKey);

impl X25519PublicKey {
    /// Borrows the raw Montgomery bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Copies out the raw Montgomery bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Encodes the key the way it travels in headers and bundles.
    pub fn to_base64(&self) -> String {
        super::encode_base64(self.as_bytes())
    }

    /// Decodes a base64 key, rejecting anything that is not 32 bytes.
    pub fn from_base64(token: &str) -> Result<Self, Error> {
        super::decode_key_bytes(token).map(Self::from)
    }
}

impl From<[u8; 32]> for X25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(value: PublicKey) -> Self {
        Self(value)
    }
}

impl AsRef<PublicKey> for X25519PublicKey {
    fn as_ref(&self) -> &PublicKey {
        &self.0
    }
}

/// Private half of an X25519 key-exchange pair. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct X25519Secret(Box<StaticSecret>);

impl X25519Secret {
    pub(crate) fn dh(&self, public_key: &X25519PublicKey) -> SharedSecret {
        self.0.diffie_hellman(public_key.as_ref())
    }

    /// Derives the matching public key.
    pub fn public_key(&self) -> X25519PublicKey {
        PublicKey::from(self.0.as_ref()).into()
    }

    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl From<[u8; 32]> for X25519Secret {
    fn from(bytes: [u8; 32]) -> Self {
        Self(Box::new(StaticSecret::from(bytes)))
    }
}

impl From<Box<[u8; 32]>> for X25519Secret {
    fn from(mut bytes: Box<[u8; 32]>) -> Self {
        let secret = StaticSecret::from(*bytes);
        bytes.zeroize();
        Self(Box::new(secret))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_base64() {
        let secret = X25519Secret::from([9u8; 32]);
        let public = secret.public_key();

        let decoded = X25519PublicKey::from_base64(&public.to_base64()).unwrap();
        assert_eq!(decoded, public);
        assert!(X25519PublicKey::from_base64("AAAA").is_err());
    }
}
