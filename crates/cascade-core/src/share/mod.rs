//! Secure sharing: capability tags and their ML-KEM-1024 sealing.

pub mod kem;
pub mod tag;

pub use kem::{SealedCapability, ShareKeyPair, open_capability, seal_capability};
pub use tag::{CapabilityTag, TagError, generate_backup_id};
