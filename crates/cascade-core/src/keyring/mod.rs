//! The key hierarchy: account-level master key and per-backup key material.

pub mod backup;
pub mod master;

pub use backup::{BackupKeyMaterial, FileKey, MetadataKey, RandomFileKey};
pub use master::{AccountMaterial, MasterKey, SessionSecrets};
