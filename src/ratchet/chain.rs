use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::Error;
use crate::crypto::hash;

const ADVANCE: u8 = 0x01;
const MESSAGE: u8 = 0x02;

/// Single-use key for one message. Zeroized on drop and never stored.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MessageKey(Box<[u8; 32]>);

impl MessageKey {
    /// Borrows the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl PartialEq for MessageKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Symmetric hash chain seeded with a session root.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Chain {
    chain_key: Box<[u8; 32]>,
    index: u64,
}

impl Chain {
    /// Starts a chain at index 0 from the session root.
    pub fn new(root: &[u8; 32]) -> Self {
        Self {
            chain_key: Box::new(*root),
            index: 0,
        }
    }

    /// Starts a chain from the session root and seeks it to `index`.
    pub fn at_index(root: &[u8; 32], index: u64) -> Self {
        let mut chain = Self::new(root);
        for _ in 0..index {
            chain.advance();
        }
        chain
    }

    /// Index of the key the next [`Chain::ratchet_for_send`] returns.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Derives the key for the current index, then advances the chain.
    pub fn ratchet_for_send(&mut self) -> MessageKey {
        let message_key = message_key(&self.chain_key);
        self.advance();
        message_key
    }

    fn advance(&mut self) {
        let mut next = step(&self.chain_key, ADVANCE);
        self.chain_key.copy_from_slice(next.as_slice());
        next.zeroize();
        self.index = self.index.wrapping_add(1);
    }

    /// Persisted form: `index (u64 BE) || chain key`.
    pub(crate) fn to_bytes(&self) -> Zeroizing<[u8; 40]> {
        let mut bytes = Zeroizing::new([0u8; 40]);
        bytes[..8].copy_from_slice(&self.index.to_be_bytes());
        bytes[8..].copy_from_slice(self.chain_key.as_slice());
        bytes
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != 40 {
            return Err(Error::Serde(format!(
                "expected 40 chain bytes, got {}",
                bytes.len()
            )));
        }
        let (index, chain_key) = bytes.split_at(8);
        let mut index_bytes = [0u8; 8];
        index_bytes.copy_from_slice(index);
        let mut key = Box::new([0u8; 32]);
        key.copy_from_slice(chain_key);

        Ok(Self {
            chain_key: key,
            index: u64::from_be_bytes(index_bytes),
        })
    }
}

/// Seeks from the session root to `index` and returns that message key.
///
/// Costs `index` hash evaluations. Agrees with the `index + 1`-th call to
/// [`Chain::ratchet_for_send`] on a chain started from the same root.
pub fn derive_key_at_index(root: &[u8; 32], index: u64) -> MessageKey {
    Chain::at_index(root, index).ratchet_for_send()
}

fn message_key(chain_key: &[u8; 32]) -> MessageKey {
    MessageKey(Box::new(*step(chain_key, MESSAGE)))
}

fn step(chain_key: &[u8; 32], label: u8) -> Zeroizing<[u8; 32]> {
    let mut input = Zeroizing::new([0u8; 33]);
    input[..32].copy_from_slice(chain_key);
    input[32] = label;
    Zeroizing::new(hash(input.as_slice()))
}
