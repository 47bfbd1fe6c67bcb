#[macro_use]
extern crate afl;
use std::sync::Arc;

use quill::{Config, MemoryBlobStore, MemoryDirectory, MemoryStore, Messenger, SessionHeader};

fn main() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Setup failed");

    // The receiver
    let bob = Messenger::new(
        "bob",
        Config {
            max_message_index: 1_000,
            ..Config::default()
        },
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryDirectory::new()),
        Arc::new(MemoryBlobStore::new()),
    );
    runtime
        .block_on(bob.register_device())
        .expect("Setup failed");

    fuzz!(|data: &[u8]| {
        let Ok(input) = std::str::from_utf8(data) else {
            return;
        };
        // `<header json>\n<ciphertext>`
        let Some((header, ciphertext)) = input.split_once('\n') else {
            return;
        };
        if let Ok(header) = SessionHeader::from_json(header) {
            let _ = runtime.block_on(bob.decrypt_received(ciphertext, &header, false));
        }
    });
}
