//! Digest helpers for change tokens

use sha2::{Digest, Sha256};

/// Length of the digest prefix used in local file names
pub const SHORT_DIGEST_LEN: usize = 8;

/// SHA-256 of a byte slice, hex encoded
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Short stable digest of a change token, safe to embed in a file name
pub fn short_digest(token: &str) -> String {
    let mut digest = sha256_hex(token.as_bytes());
    digest.truncate(SHORT_DIGEST_LEN);
    digest
}
