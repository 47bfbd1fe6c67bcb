#[cfg(test)]
mod integration_tests {
    use std::sync::Arc;

    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use prost::Message;
    use quill::{
        Config, Decrypted, Error, KeyMaterial, KeyValueStore, MemoryBlobStore, MemoryDirectory,
        MemoryStore, Messenger, OutboundMessage, SessionHeader, StoredKeyRecord,
    };

    struct Device {
        messenger: Messenger,
        store: Arc<MemoryStore>,
    }

    fn device(user_id: &str, directory: &Arc<MemoryDirectory>) -> Device {
        let store = Arc::new(MemoryStore::new());
        let messenger = Messenger::new(
            user_id,
            Config {
                pre_key_pool_size: 4,
                ..Config::default()
            },
            store.clone(),
            directory.clone(),
            Arc::new(MemoryBlobStore::new()),
        );
        Device { messenger, store }
    }

    async fn registered_pair() -> (Device, Device) {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = device("alice", &directory);
        let bob = device("bob", &directory);
        alice.messenger.register_device().await.unwrap();
        bob.messenger.register_device().await.unwrap();
        (alice, bob)
    }

    fn flip_ciphertext_byte(message: &OutboundMessage, position: usize) -> String {
        let mut bytes = STANDARD.decode(&message.ciphertext).unwrap();
        bytes[position] ^= 0x80;
        STANDARD.encode(bytes)
    }

    #[tokio::test]
    async fn test_full_protocol_flow() {
        println!("Step 1: Registering Alice and Bob...");
        let (alice, bob) = registered_pair().await;
        let alice = &alice.messenger;
        let bob = &bob.messenger;

        println!("Step 2: Both devices protect their keys with a vault...");
        alice.initialize_vault("alice-password").await.unwrap();
        bob.initialize_vault("bob-password").await.unwrap();

        println!("Step 3: Alice sends the first messages...");
        let first = alice.encrypt_for_send("bob", "Hey Bob!").await.unwrap();
        let second = alice.encrypt_for_send("bob", "Are you there?").await.unwrap();
        assert_eq!(first.header.message_index, Some(0));
        assert_eq!(second.header.message_index, Some(1));

        println!("Step 4: Bob decrypts them...");
        assert_eq!(
            bob.decrypt_received(&first.ciphertext, &first.header, false)
                .await
                .unwrap(),
            Decrypted::Plaintext("Hey Bob!".to_string())
        );
        assert_eq!(
            bob.decrypt_received(&second.ciphertext, &second.header, false)
                .await
                .unwrap(),
            Decrypted::Plaintext("Are you there?".to_string())
        );

        println!("Step 5: Bob replies over his own session...");
        let reply = bob.encrypt_for_send("alice", "Hi Alice!").await.unwrap();
        assert_ne!(reply.header.ephemeral_key, first.header.ephemeral_key);
        assert_eq!(
            alice
                .decrypt_received(&reply.ciphertext, &reply.header, false)
                .await
                .unwrap(),
            Decrypted::Plaintext("Hi Alice!".to_string())
        );

        println!("Step 6: Each side re-reads its own sent messages...");
        assert_eq!(
            alice
                .decrypt_received(&second.ciphertext, &second.header, true)
                .await
                .unwrap(),
            Decrypted::Plaintext("Are you there?".to_string())
        );
        assert_eq!(
            bob.decrypt_received(&reply.ciphertext, &reply.header, true)
                .await
                .unwrap(),
            Decrypted::Plaintext("Hi Alice!".to_string())
        );

        println!("Step 7: Header travels as JSON...");
        let wire = second.header.to_json().unwrap();
        let parsed = SessionHeader::from_json(&wire).unwrap();
        assert_eq!(
            bob.decrypt_received(&second.ciphertext, &parsed, false)
                .await
                .unwrap(),
            Decrypted::Plaintext("Are you there?".to_string())
        );
    }

    #[tokio::test]
    async fn test_tampering_fails_authentication() {
        let (alice, bob) = registered_pair().await;
        let alice = &alice.messenger;
        let bob = &bob.messenger;

        let message = alice.encrypt_for_send("bob", "sensitive").await.unwrap();
        let length = STANDARD.decode(&message.ciphertext).unwrap().len();

        // Before Bob has cached the session.
        for position in [0, 12, length - 1] {
            assert_eq!(
                bob.decrypt_received(
                    &flip_ciphertext_byte(&message, position),
                    &message.header,
                    false
                )
                .await
                .unwrap(),
                Decrypted::AuthFailure
            );
        }

        assert_eq!(
            bob.decrypt_received(&message.ciphertext, &message.header, false)
                .await
                .unwrap(),
            Decrypted::Plaintext("sensitive".to_string())
        );

        // After the session is cached.
        let tampered = flip_ciphertext_byte(&message, length / 2);
        assert_eq!(
            bob.decrypt_received(&tampered, &message.header, false)
                .await
                .unwrap(),
            Decrypted::AuthFailure
        );

        let moved = message.header.with_message_index(5);
        assert_eq!(
            bob.decrypt_received(&message.ciphertext, &moved, false)
                .await
                .unwrap(),
            Decrypted::AuthFailure
        );

        let mut wrong_pre_key = message.header.clone();
        wrong_pre_key.pre_key_id = message.header.pre_key_id.map(|id| id + 1);
        assert_eq!(
            bob.decrypt_received(&message.ciphertext, &wrong_pre_key, false)
                .await
                .unwrap(),
            Decrypted::AuthFailure
        );

        let bob_identity = bob.key_store().load_identity_key().await.unwrap();
        let mut forged_sender = message.header.clone();
        forged_sender.sender_identity_key = bob_identity.public_key().to_base64();
        assert_eq!(
            bob.decrypt_received(&message.ciphertext, &forged_sender, false)
                .await
                .unwrap(),
            Decrypted::AuthFailure
        );

        let mut garbage = message.header.clone();
        garbage.ephemeral_key = "not a key".to_string();
        assert_eq!(
            bob.decrypt_received(&message.ciphertext, &garbage, false)
                .await
                .unwrap(),
            Decrypted::AuthFailure
        );
    }

    #[tokio::test]
    async fn test_vault_lifecycle() {
        let (alice, _bob) = registered_pair().await;
        let alice = &alice.messenger;

        assert!(!alice.has_vault().await.unwrap());
        assert!(!alice.unlock_vault("anything").await.unwrap());

        alice.initialize_vault("correct horse").await.unwrap();
        assert!(alice.has_vault().await.unwrap());
        assert!(matches!(
            alice.initialize_vault("again").await,
            Err(Error::Protocol(_))
        ));

        alice.lock_vault().await;
        assert!(alice.has_vault().await.unwrap());
        assert_eq!(
            alice.encrypt_for_send("bob", "hello").await,
            Err(Error::VaultLocked)
        );

        assert!(!alice.unlock_vault("battery staple").await.unwrap());
        assert_eq!(
            alice.encrypt_for_send("bob", "hello").await,
            Err(Error::VaultLocked)
        );

        assert!(alice.unlock_vault("correct horse").await.unwrap());
        assert!(alice.encrypt_for_send("bob", "hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_legacy_records_sealed_by_vault() {
        let (alice, _bob) = registered_pair().await;
        alice.messenger.encrypt_for_send("bob", "before").await.unwrap();

        let material = |value: &str| {
            let bytes = STANDARD.decode(value).unwrap();
            StoredKeyRecord::decode(bytes.as_slice()).unwrap().material
        };

        let ids = alice.store.keys_with_prefix("").await.unwrap();
        let records: Vec<String> = ids
            .into_iter()
            .filter(|id| !id.starts_with("session_counter:"))
            .collect();
        assert!(records.len() >= 3);
        for id in &records {
            let value = alice.store.get(id).await.unwrap().unwrap();
            assert!(matches!(material(&value), Some(KeyMaterial::Plain(_))));
        }

        alice.messenger.initialize_vault("pw").await.unwrap();
        for id in &records {
            let value = alice.store.get(id).await.unwrap().unwrap();
            assert!(matches!(material(&value), Some(KeyMaterial::Wrapped(_))));
        }

        // Vault metadata and counters are the only values kept in the clear.
        let snapshot = alice.store.snapshot().await;
        assert!(snapshot.contains_key("vault_meta"));
        let counters: Vec<&String> = snapshot
            .iter()
            .filter(|(id, _)| id.starts_with("session_counter:"))
            .map(|(_, value)| value)
            .collect();
        assert_eq!(counters, vec!["1"]);

        // Sessions written before the vault keep working.
        let after = alice.messenger.encrypt_for_send("bob", "after").await.unwrap();
        assert_eq!(after.header.message_index, Some(1));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_get_unique_indices() {
        let (alice, bob) = registered_pair().await;
        let alice = Arc::new(alice.messenger);

        let mut handles = Vec::new();
        for i in 0..16 {
            let alice = alice.clone();
            handles.push(tokio::spawn(async move {
                alice
                    .encrypt_for_send("bob", &format!("message {i}"))
                    .await
                    .unwrap()
            }));
        }

        let mut messages = Vec::new();
        for handle in handles {
            messages.push(handle.await.unwrap());
        }

        let ephemeral = &messages[0].header.ephemeral_key;
        assert!(messages.iter().all(|m| &m.header.ephemeral_key == ephemeral));

        let mut indices: Vec<u64> = messages
            .iter()
            .map(|m| m.header.message_index.unwrap())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..16).collect::<Vec<u64>>());

        for message in &messages {
            assert!(matches!(
                bob.messenger
                    .decrypt_received(&message.ciphertext, &message.header, false)
                    .await
                    .unwrap(),
                Decrypted::Plaintext(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_peer_reregistration_renews_session() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = device("alice", &directory);
        let bob = device("bob", &directory);
        alice.messenger.register_device().await.unwrap();
        bob.messenger.register_device().await.unwrap();

        let before = alice.messenger.encrypt_for_send("bob", "one").await.unwrap();

        println!("Bob loses his keys and registers again...");
        bob.messenger.reset_vault().await.unwrap();
        assert!(bob.store.snapshot().await.is_empty());
        bob.messenger.register_device().await.unwrap();

        let after = alice.messenger.encrypt_for_send("bob", "two").await.unwrap();
        assert_ne!(before.header.ephemeral_key, after.header.ephemeral_key);
        assert_eq!(after.header.message_index, Some(0));

        assert_eq!(
            bob.messenger
                .decrypt_received(&after.ciphertext, &after.header, false)
                .await
                .unwrap(),
            Decrypted::Plaintext("two".to_string())
        );
        assert_ne!(
            bob.messenger
                .decrypt_received(&before.ciphertext, &before.header, false)
                .await
                .unwrap(),
            Decrypted::Plaintext("one".to_string())
        );
    }

    #[tokio::test]
    async fn test_peer_without_pre_keys() {
        let directory = Arc::new(MemoryDirectory::new());
        let alice = device("alice", &directory);
        alice.messenger.register_device().await.unwrap();

        let carol = Messenger::new(
            "carol",
            Config {
                pre_key_pool_size: 0,
                ..Config::default()
            },
            Arc::new(MemoryStore::new()),
            directory.clone(),
            Arc::new(MemoryBlobStore::new()),
        );
        carol.register_device().await.unwrap();

        assert_eq!(
            alice.messenger.encrypt_for_send("carol", "hi").await,
            Err(Error::PeerHasNoPreKeys("carol".to_string()))
        );
        assert_eq!(
            alice.messenger.encrypt_for_send("dave", "hi").await,
            Err(Error::PeerHasNoDevice("dave".to_string()))
        );
    }
}
