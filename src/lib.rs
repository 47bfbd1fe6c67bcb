mod crypto;
pub use crypto::*;

mod vault;
pub use vault::{Vault, VaultMeta};

mod store;
pub use store::*;

mod x3dh;
pub use x3dh::*;

mod ratchet;
pub use ratchet::*;

mod cipher;
pub use cipher::*;

mod directory;
pub use directory::*;

mod blob;
pub use blob::*;

mod messenger;
pub use messenger::*;

mod error;
pub use error::Error;

mod config;
pub use config::{Config, MIN_KDF_ITERATIONS};

#[cfg(test)]
mod proptests;
