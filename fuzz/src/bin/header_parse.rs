#[macro_use]
extern crate afl;
use quill::SessionHeader;

fn main() {
    fuzz!(|data: &[u8]| {
        if let Ok(json) = std::str::from_utf8(data) {
            if let Ok(header) = SessionHeader::from_json(json) {
                let _ = header.associated_data();
            }
        }
    });
}
