//! Object identity and hashing for the rev-cache engine.
//!
//! Everything the cache stores is addressed by a 20-byte SHA-1 digest:
//! commit, tree and blob ids as well as the slice names derived from a
//! slice's boundary hashes.

pub mod hex;

mod hasher;
mod oid;

pub use hasher::Hasher;
pub use oid::ObjectId;

/// Errors produced by hash and id handling.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hash length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid hex length: expected {expected} characters, got {actual}")]
    InvalidHexLength { expected: usize, actual: usize },

    #[error("invalid hex character {character:?} at position {position}")]
    InvalidHex { position: usize, character: char },
}
