//! RFC 6455 WebSocket accept-key computation.
//!
//! The router delegates the HTTP/1.1 Upgrade dance and subsequent frame
//! reads/writes to `parity-ws` (see `router::handshake::process_protocol`),
//! but the accept-key derivation itself is a small, independently
//! verifiable piece of the handshake and is kept here so it can be tested
//! in isolation, grounded in the same sha1+base64 approach
//! `paritytech-soketto`'s handshake server uses.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matches_rfc6455_example() {
        // Example key/accept pair straight out of RFC 6455 section 1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }
}
