//! Content hashing for job descriptions and candidate narratives.
//!
//! The hash is the cache key for every stage output and the scope of every override,
//! so it must be stable across processes and releases: SHA-256 over the UTF-8 bytes,
//! rendered as lowercase hex.

use sha2::{Digest, Sha256};

/// Hex length of a full content hash.
pub const HASH_LEN: usize = 64;

/// Computes the content hash of `text`.
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

/// Short prefix used in log lines.
pub fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}
