//! Error types for the cascade-core crate.
//!
//! This module re-exports all error types from their home modules so
//! callers can import them from one place.

pub use crate::crypto::CryptoError;
pub use crate::share::kem::ShareError;
pub use crate::share::tag::TagError;
