/// Lowest PBKDF2 iteration count the vault accepts.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Tunables for a [`Messenger`](crate::Messenger) and the vault behind it.
#[derive(Clone, Debug)]
pub struct Config {
    /// PBKDF2-HMAC-SHA256 rounds used to stretch the vault password.
    /// Values below [`MIN_KDF_ITERATIONS`] are raised to it.
    pub kdf_iterations: u32,
    /// Number of pre-keys generated at device registration.
    pub pre_key_pool_size: u32,
    /// Highest message index an inbound header may ask the ratchet to seek to.
    pub max_message_index: u64,
    /// Known plaintext sealed into the verifier of newly created vaults.
    /// Existing vaults keep the one recorded in their metadata.
    pub verifier_plaintext: Vec<u8>,
}

impl Config {
    pub(crate) fn effective_kdf_iterations(&self) -> u32 {
        self.kdf_iterations.max(MIN_KDF_ITERATIONS)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kdf_iterations: MIN_KDF_ITERATIONS,
            pre_key_pool_size: 10,
            max_message_index: 1_000_000,
            verifier_plaintext: b"Quill-Vault-Verifier-v1".to_vec(),
        }
    }
}
