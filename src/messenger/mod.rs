mod session;
pub use session::*;

use std::sync::Arc;

use prost::Message;
use tokio::sync::Mutex;

use crate::cipher::{decrypt_file, decrypt_text, encrypt_file, encrypt_text};
use crate::store::{session_by_key_id, session_id};
use crate::vault::unix_millis;
use crate::{
    Attachment, BlobStore, Config, DeviceBundle, DeviceDirectory, Error, EstablishedSession,
    FileKey, IdentityKey, KeyStore, KeyType, KeyValueStore, MessageEnvelope, PreKey,
    SessionHeader, SessionSecret, Vault, derive_key_at_index, initiate, respond,
};

/// Ciphertext and the header it must travel with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    /// base64 of `nonce || ciphertext || tag`.
    pub ciphertext: String,
    /// Header carrying the message index.
    pub header: SessionHeader,
}

/// Outcome of decrypting a received message.
///
/// Failures that a conversation view shows as a placeholder are values here,
/// not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decrypted {
    /// The message body.
    Plaintext(String),
    /// The ciphertext, the header or the key did not authenticate.
    AuthFailure,
    /// No session or pre-key is available to derive the message key.
    NoKeyAvailable,
}

/// Outcome of opening a received envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Opened {
    /// The decoded body.
    Envelope(MessageEnvelope),
    /// See [`Decrypted::AuthFailure`].
    AuthFailure,
    /// See [`Decrypted::NoKeyAvailable`].
    NoKeyAvailable,
}

/// A file to attach to an outgoing envelope.
pub struct OutgoingFile {
    /// File name shown to the receiver.
    pub name: String,
    /// Media type.
    pub mime_type: String,
    /// Plaintext contents.
    pub contents: Vec<u8>,
}

/// Messaging endpoint for one local user.
pub struct Messenger {
    user_id: String,
    config: Config,
    keys: KeyStore,
    directory: Arc<dyn DeviceDirectory>,
    blobs: Arc<dyn BlobStore>,
    establish_lock: Mutex<()>,
}

impl Messenger {
    /// Creates a messenger for `user_id` over the given collaborators. The
    /// vault starts locked.
    pub fn new(
        user_id: impl Into<String>,
        config: Config,
        store: Arc<dyn KeyValueStore>,
        directory: Arc<dyn DeviceDirectory>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let vault = Vault::new(&config);
        Self {
            user_id: user_id.into(),
            config,
            keys: KeyStore::new(store, vault),
            directory,
            blobs,
            establish_lock: Mutex::new(()),
        }
    }

    /// The local user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The underlying key store.
    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// Generates the identity key and pre-key pool, stores them and publishes
    /// the device bundle.
    pub async fn register_device(&self) -> Result<DeviceBundle, Error> {
        let identity = IdentityKey::generate()?;
        let pre_keys = (0..self.config.pre_key_pool_size)
            .map(PreKey::generate)
            .collect::<Result<Vec<_>, _>>()?;

        self.keys.store_identity_key(&identity).await?;
        for pre_key in &pre_keys {
            self.keys.store_pre_key(pre_key).await?;
        }

        let bundle = DeviceBundle::new(identity.public_key(), &pre_keys, unix_millis());
        self.directory
            .publish_device_bundle(&self.user_id, bundle.clone())
            .await?;

        tracing::info!(
            user = %self.user_id,
            pre_keys = pre_keys.len(),
            "device registered"
        );
        Ok(bundle)
    }

    /// Returns the cached session toward `peer_id` when it still matches the
    /// peer's published device, or runs a fresh handshake.
    pub async fn establish_or_reuse_session(
        &self,
        peer_id: &str,
    ) -> Result<EstablishedSession, Error> {
        let _guard = self.establish_lock.lock().await;

        let bundle = self
            .directory
            .fetch_device_bundle(peer_id)
            .await?
            .ok_or_else(|| Error::PeerHasNoDevice(peer_id.to_string()))?;

        if let Some(session) = self.load_session(peer_id).await? {
            if session.matches(&bundle) {
                tracing::debug!(peer = peer_id, "reusing session");
                return session.to_established();
            }
            let stale = Error::StaleSession(peer_id.to_string());
            tracing::warn!(peer = peer_id, %stale, "peer device changed");
        }

        let identity = self.keys.load_identity_key().await?;
        let peer_keys = bundle.peer_keys(peer_id)?;
        let established = initiate(&identity, &peer_keys)?;

        // The by-key entry goes first: once `session:<peer>` exists the
        // session is reused, and our own sends must stay readable.
        self.store_session_secret(
            &established.header().ephemeral_key,
            established.shared_secret(),
        )
        .await?;
        let session = Session::from_established(&established, &bundle);
        self.keys
            .store_key(
                &session_id(peer_id),
                KeyType::Session,
                Some(peer_keys.identity_key.to_bytes().as_slice()),
                &session.encode_to_vec(),
            )
            .await?;

        tracing::debug!(
            peer = peer_id,
            pre_key_id = peer_keys.pre_key_id,
            "session established"
        );
        Ok(established)
    }

    /// Encrypts `plaintext` for `peer_id` under the next message index of the
    /// session.
    ///
    /// The index is committed only once encryption succeeded; concurrent
    /// sends on one session each get a distinct index.
    pub async fn encrypt_for_send(
        &self,
        peer_id: &str,
        plaintext: &str,
    ) -> Result<OutboundMessage, Error> {
        let session = self.establish_or_reuse_session(peer_id).await?;
        let max_index = self.config.max_message_index;

        let secret = session.shared_secret();

        self.keys
            .with_next_send_key(
                &session.header().ephemeral_key,
                secret.as_bytes(),
                |index, key| {
                    if index > max_index {
                        return Err(Error::Protocol(format!(
                            "message index {index} exceeds {max_index}"
                        )));
                    }
                    let header = session.header().with_message_index(index);
                    let ciphertext = encrypt_text(key, plaintext, &header.associated_data()?)?;
                    Ok(OutboundMessage { ciphertext, header })
                },
            )
            .await
    }

    /// Decrypts a received message.
    ///
    /// The session is found by the header's ephemeral key. If none is cached
    /// and the message came from a peer, the session is rebuilt from the
    /// named local pre-key and cached once the message authenticates. Our own
    /// sent messages are only ever opened from the cache.
    ///
    /// Key-store failures such as a locked vault are returned as errors.
    pub async fn decrypt_received(
        &self,
        ciphertext: &str,
        header: &SessionHeader,
        is_own_message: bool,
    ) -> Result<Decrypted, Error> {
        let aad = match header.associated_data() {
            Ok(aad) => aad,
            Err(err) => {
                tracing::warn!(%err, "rejecting malformed header");
                return Ok(Decrypted::AuthFailure);
            }
        };
        let index = header.index();
        if index > self.config.max_message_index {
            tracing::warn!(index, "message index out of range");
            return Ok(Decrypted::AuthFailure);
        }

        let (secret, fresh) = match self.load_session_secret(&header.ephemeral_key).await? {
            Some(secret) => (secret, false),
            None if is_own_message => {
                tracing::warn!("no cached session for own message");
                return Ok(Decrypted::NoKeyAvailable);
            }
            None => match self.respond_to(header).await? {
                Ok(secret) => (secret, true),
                Err(placeholder) => return Ok(placeholder),
            },
        };

        let key = derive_key_at_index(secret.as_bytes(), index);
        match decrypt_text(&key, ciphertext, &aad) {
            Ok(plaintext) => {
                if fresh {
                    self.store_session_secret(&header.ephemeral_key, &secret)
                        .await?;
                }
                Ok(Decrypted::Plaintext(plaintext))
            }
            Err(Error::AuthenticationFailure) => {
                tracing::warn!(index, "message failed authentication");
                Ok(Decrypted::AuthFailure)
            }
            Err(err) => Err(err),
        }
    }

    /// Encrypts each file under its own key, uploads the ciphertexts and
    /// sends the envelope describing them.
    pub async fn send_envelope(
        &self,
        peer_id: &str,
        text: &str,
        files: Vec<OutgoingFile>,
    ) -> Result<OutboundMessage, Error> {
        let mut attachments = Vec::with_capacity(files.len());
        for file in files {
            let size = u64::try_from(file.contents.len())
                .map_err(|_| Error::Protocol("attachment too large".to_string()))?;
            let (ciphertext, key) = encrypt_file(&file.contents)?;
            let path = self.blobs.put(ciphertext).await?;
            attachments.push(Attachment {
                path,
                key: key.to_base64(),
                name: file.name,
                mime_type: file.mime_type,
                size,
            });
        }

        let envelope = MessageEnvelope {
            text: text.to_string(),
            attachments,
        };
        self.encrypt_for_send(peer_id, &envelope.to_json()?).await
    }

    /// Decrypts a received envelope. A body that is not an envelope is read
    /// as plain text.
    pub async fn open_envelope(
        &self,
        ciphertext: &str,
        header: &SessionHeader,
        is_own_message: bool,
    ) -> Result<Opened, Error> {
        Ok(
            match self
                .decrypt_received(ciphertext, header, is_own_message)
                .await?
            {
                Decrypted::Plaintext(body) => Opened::Envelope(
                    MessageEnvelope::from_json(&body).unwrap_or_else(|_| MessageEnvelope::text(body)),
                ),
                Decrypted::AuthFailure => Opened::AuthFailure,
                Decrypted::NoKeyAvailable => Opened::NoKeyAvailable,
            },
        )
    }

    /// Downloads and decrypts an attachment.
    pub async fn fetch_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, Error> {
        let ciphertext = self
            .blobs
            .get(&attachment.path)
            .await?
            .ok_or_else(|| Error::Storage(format!("missing blob {}", attachment.path)))?;
        let key = FileKey::from_base64(&attachment.key)?;
        decrypt_file(&ciphertext, &key)
    }

    /// Whether a vault was ever initialized.
    pub async fn has_vault(&self) -> Result<bool, Error> {
        self.keys.has_vault().await
    }

    /// Creates the vault and wraps any records written before it existed.
    pub async fn initialize_vault(&self, password: &str) -> Result<(), Error> {
        self.keys.initialize_vault(password).await?;
        self.keys.seal_legacy_records().await?;
        Ok(())
    }

    /// Unlocks the vault. A wrong password yields `false`.
    pub async fn unlock_vault(&self, password: &str) -> Result<bool, Error> {
        self.keys.unlock_vault(password).await
    }

    /// Locks the vault.
    pub async fn lock_vault(&self) {
        self.keys.lock_vault().await;
    }

    /// Destroys all local keys, sessions and the vault. The device must be
    /// registered again afterwards.
    pub async fn reset_vault(&self) -> Result<(), Error> {
        tracing::warn!(user = %self.user_id, "resetting vault");
        self.keys.reset().await
    }

    async fn load_session(&self, peer_id: &str) -> Result<Option<Session>, Error> {
        match self.keys.get_key(&session_id(peer_id)).await? {
            Some(stored) => Session::from_bytes(&stored.secret).map(Some),
            None => Ok(None),
        }
    }

    async fn load_session_secret(&self, ephemeral_key: &str) -> Result<Option<SessionSecret>, Error> {
        match self.keys.get_key(&session_by_key_id(ephemeral_key)).await? {
            Some(stored) => SessionSecret::from_slice(&stored.secret).map(Some),
            None => Ok(None),
        }
    }

    async fn store_session_secret(
        &self,
        ephemeral_key: &str,
        secret: &SessionSecret,
    ) -> Result<(), Error> {
        self.keys
            .store_key(
                &session_by_key_id(ephemeral_key),
                KeyType::SessionSecret,
                None,
                secret.as_bytes(),
            )
            .await
    }

    /// Rebuilds an inbound session. The inner error is the placeholder to
    /// show when the keys it needs are gone or the header does not agree.
    async fn respond_to(
        &self,
        header: &SessionHeader,
    ) -> Result<Result<SessionSecret, Decrypted>, Error> {
        let Some(pre_key_id) = header.pre_key_id else {
            tracing::warn!("inbound header names no pre-key");
            return Ok(Err(Decrypted::NoKeyAvailable));
        };

        let identity = match self.keys.load_identity_key().await {
            Ok(identity) => identity,
            Err(err @ Error::KeyNotFound(_)) => {
                tracing::warn!(%err, "cannot answer handshake");
                return Ok(Err(Decrypted::NoKeyAvailable));
            }
            Err(err) => return Err(err),
        };
        let Some(pre_key) = self.keys.load_pre_key(pre_key_id).await? else {
            let err = Error::KeyNotFound(format!("prekey:{pre_key_id}"));
            tracing::warn!(%err, "cannot answer handshake");
            return Ok(Err(Decrypted::NoKeyAvailable));
        };

        match respond(&identity, &pre_key, header) {
            Ok(secret) => Ok(Ok(secret)),
            Err(err) => {
                tracing::warn!(%err, "handshake rejected");
                Ok(Err(Decrypted::AuthFailure))
            }
        }
    }
}
