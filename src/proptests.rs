use proptest::prelude::*;

use crate::{
    Chain, Error, IdentityKey, SessionHeader, X25519Secret, decrypt_text, derive_key_at_index,
    encrypt_text,
};

proptest! {
    /// Seeking to index N gives the key of the (N+1)-th sequential step.
    #[test]
    fn seek_matches_sequential(root in any::<[u8; 32]>(), index in 0u64..200) {
        let mut chain = Chain::new(&root);
        for _ in 0..index {
            chain.ratchet_for_send();
        }
        prop_assert_eq!(chain.index(), index);
        prop_assert!(chain.ratchet_for_send() == derive_key_at_index(&root, index));
    }

    /// Distinct indices never share a key.
    #[test]
    fn distinct_indices_distinct_keys(
        root in any::<[u8; 32]>(),
        a in 0u64..100,
        b in 0u64..100,
    ) {
        prop_assume!(a != b);
        prop_assert!(derive_key_at_index(&root, a) != derive_key_at_index(&root, b));
    }

    /// Text round-trips under the key and associated data it was sealed with.
    #[test]
    fn text_roundtrip(
        root in any::<[u8; 32]>(),
        index in 0u64..16,
        text in ".{0,500}",
        aad in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let key = derive_key_at_index(&root, index);
        let ciphertext = encrypt_text(&key, &text, &aad).unwrap();
        prop_assert_eq!(decrypt_text(&key, &ciphertext, &aad).unwrap(), text);
    }

    /// A ciphertext sealed for one header index does not open under another.
    #[test]
    fn header_index_is_bound(index in 0u64..1_000, other in 0u64..1_000, seed in any::<[u8; 32]>()) {
        prop_assume!(index != other);
        let header = SessionHeader {
            sender_identity_key: IdentityKey::generate().unwrap().public_key().to_base64(),
            ephemeral_key: X25519Secret::from(seed).public_key().to_base64(),
            pre_key_id: Some(1),
            message_index: Some(index),
        };
        let key = derive_key_at_index(&seed, index);
        let ciphertext = encrypt_text(&key, "bound", &header.associated_data().unwrap()).unwrap();

        let moved = header.with_message_index(other);
        prop_assert_eq!(
            decrypt_text(&key, &ciphertext, &moved.associated_data().unwrap()),
            Err(Error::AuthenticationFailure)
        );
    }
}
