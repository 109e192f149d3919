//! Core encryption engine for end-to-end encrypted backups.
//!
//! Everything the storage backend ever sees is produced here: ciphertext
//! from the two-cipher cascade, opaque salts, and key-encapsulation
//! ciphertexts. Plaintext, the master key, and all derived key material
//! stay on the client and are zeroized when dropped.

#![forbid(unsafe_code)]

pub mod backup;
pub mod crypto;
pub mod error;
pub mod keyring;
pub mod share;
