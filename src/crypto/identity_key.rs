use crate::{Error, X25519PublicKey, X25519Secret};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use zeroize::{Zeroize, Zeroizing};

use super::{decode_base64, decode_key_bytes, encode_base64, generate_random_seed};

/// Long-term Ed25519 identity of a device.
///
/// The same key also takes part in X25519 key agreement: the signing scalar
/// and the Edwards public point are converted to their Montgomery forms, so a
/// device publishes a single identity key.
pub struct IdentityKey {
    signing_key: Box<SigningKey>,
}

impl IdentityKey {
    /// Creates a new identity key from a fresh random seed.
    pub fn generate() -> Result<Self, Error> {
        let mut seed = generate_random_seed()?;
        let signing_key = Box::new(SigningKey::from_bytes(&seed));
        seed.zeroize();

        Ok(Self { signing_key })
    }

    /// Signs a message with the Ed25519 key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Returns the public identity key.
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key())
    }

    /// Converts the signing key into an X25519 secret for key agreement.
    pub fn exchange_secret(&self) -> X25519Secret {
        let scalar = Zeroizing::new(self.signing_key.to_scalar_bytes());
        X25519Secret::from(Box::new(*scalar))
    }

    /// Returns the 32-byte seed for storage.
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }

    /// Rebuilds an identity key from its 32-byte seed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let seed = Zeroizing::new(
            <[u8; 32]>::try_from(bytes)
                .map_err(|_| Error::Decode("identity key seed must be 32 bytes".to_string()))?,
        );
        let signing_key = Box::new(SigningKey::from_bytes(&seed));

        Ok(Self { signing_key })
    }
}

/// Public Ed25519 identity key of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdentityPublicKey(VerifyingKey);

impl IdentityPublicKey {
    /// Verifies a signature made by the matching [`IdentityKey`].
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), Error> {
        self.0
            .verify_strict(message, signature)
            .map_err(|err| Error::Crypto(err.to_string()))
    }

    /// Converts the Edwards point into the X25519 public key it corresponds to.
    pub fn to_exchange_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(self.0.to_montgomery().to_bytes())
    }

    /// Returns the compressed point.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// Encodes the key the way it travels in headers and bundles.
    pub fn to_base64(&self) -> String {
        encode_base64(self.0.as_bytes())
    }

    /// Decodes a base64 identity key. Points that are not on the curve are
    /// rejected.
    pub fn from_base64(token: &str) -> Result<Self, Error> {
        let bytes = decode_key_bytes(token)?;
        VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|err| Error::Decode(err.to_string()))
    }
}

/// Verifies a base64-encoded Ed25519 signature against a public identity key.
pub fn verify_signature(
    public_key: &IdentityPublicKey,
    message: &[u8],
    signature: &str,
) -> Result<(), Error> {
    let bytes = decode_base64(signature)?;
    let signature = Signature::from_slice(&bytes).map_err(|err| Error::Decode(err.to_string()))?;
    public_key.verify(message, &signature)
}
