//! Per-response CSP nonce.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;

/// Random 128-bit nonce, base64 encoded.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}
