//! Cryptographic core: the two-cipher cascade and its building blocks.
//!
//! The cascade runs every payload through a self-re-keying ChaCha20 stream
//! layer and a Serpent CBC layer, carrying an HMAC-SHA3-512 tag in front of
//! the payload. [`cascade`] composes the layers; [`ratchet`], [`block`] and
//! [`kdf`] are the pieces.

pub mod block;
pub mod cascade;
pub mod kdf;
pub mod ratchet;

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
///
/// # Security Classification
///
/// None of these variants signal an integrity violation: a ciphertext that
/// decrypts to a mismatching tag is reported through the boolean verdict of
/// the decryption functions, never as an error. The variants here cover
/// **structural errors** (malformed input detected before any cryptographic
/// work) and **programming errors** (invalid parameters, mis-sized keys).
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The ciphertext does not have the shape the cascade produces.
    ///
    /// **[STRUCTURAL]** Detected before any key derivation or decryption is
    /// attempted. Callers that track per-field state should map this to the
    /// `corrupted` status.
    #[error("Malformed ciphertext: {reason}")]
    MalformedCiphertext { reason: String },

    /// Argon2id rejected the requested parameters.
    ///
    /// **[PROGRAMMING ERROR]** All parameter sets used by the protocol are
    /// fixed constants, so this indicates an implementation bug.
    #[error("Invalid Argon2id parameters: {0}")]
    InvalidKdfParams(String),

    /// Argon2id failed to produce output.
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    /// Key material does not have the exact length the protocol demands.
    ///
    /// **[PRECONDITION]** Every key size in the protocol is a fixed
    /// constant; mis-sized material must be rejected before any ciphertext
    /// is touched.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Caller-collected entropy folds down to fewer bytes than the
    /// per-backup key generator needs.
    #[error("Insufficient entropy: need at least {needed} folded bytes, got {actual}")]
    InsufficientEntropy { needed: usize, actual: usize },
}

pub use kdf::KeyBlob;
