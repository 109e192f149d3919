//! The capability tag: a self-contained credential carrying everything a
//! recipient needs to fetch and decrypt one backup.
//!
//! Text form: `base64(email) "," backupId "," base64(metadataKey) ","
//! base64(fileKey)`. Packed binary form:
//! `fileKey[416] ‖ metadataKey[672] ‖ backupId[10] ‖ email[variable]` —
//! the segment order is reversed relative to the textual tuple. Both
//! codecs validate every component exactly; a tag with any wrong-length or
//! malformed component is rejected outright, never partially honored.

use std::fmt;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use regex::Regex;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::keyring::backup::{FILE_KEY_LEN, FileKey, METADATA_KEY_LEN, MetadataKey};

/// Length of a backup identifier in bytes/characters.
pub const BACKUP_ID_LEN: usize = 10;

/// Minimum length of the packed binary form (with an empty email).
pub const PACKED_MIN_LEN: usize = FILE_KEY_LEN + METADATA_KEY_LEN + BACKUP_ID_LEN;

/// Alphabet backup identifiers are drawn from.
const BACKUP_ID_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static pattern compiles"));

/// Errors that can occur while encoding or decoding a capability tag.
///
/// # Security Classification
///
/// Every variant means the capability must be rejected in full. A tag that
/// fails any length or format check may have been tampered with or
/// truncated; honoring the parts that do parse would hand out keys whose
/// provenance cannot be checked.
#[derive(Error, Debug)]
pub enum TagError {
    /// The textual form does not have exactly four comma-separated parts.
    #[error("Invalid tag format: expected 4 comma-separated parts, got {0}")]
    InvalidFormat(usize),

    /// A base64 component failed to decode.
    #[error("Invalid base64 in tag component '{component}'")]
    InvalidEncoding { component: &'static str },

    /// A fixed-width component has the wrong length.
    #[error("Tag component '{component}' must be {expected} bytes, got {actual}")]
    InvalidComponentLength {
        component: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The packed binary form is shorter than the fixed segments.
    #[error("Packed tag of {actual} bytes is shorter than the {PACKED_MIN_LEN}-byte minimum")]
    PackedTooShort { actual: usize },

    /// The owner email does not look like an email address.
    #[error("Tag email failed validation")]
    InvalidEmail,

    /// The backup id is not 10 characters of `[A-Za-z0-9]`.
    #[error("Tag backup id failed validation")]
    InvalidBackupId,
}

/// A validated capability tag.
///
/// Construction always validates, so holding a `CapabilityTag` means every
/// component already passed its length and format checks.
pub struct CapabilityTag {
    email: String,
    backup_id: String,
    metadata_key: Zeroizing<Vec<u8>>,
    file_key: Zeroizing<Vec<u8>>,
}

impl CapabilityTag {
    pub fn new(
        email: &str,
        backup_id: &str,
        metadata_key: &[u8],
        file_key: &[u8],
    ) -> Result<Self, TagError> {
        if !EMAIL_RE.is_match(email) {
            return Err(TagError::InvalidEmail);
        }
        validate_backup_id(backup_id)?;
        if metadata_key.len() != METADATA_KEY_LEN {
            return Err(TagError::InvalidComponentLength {
                component: "metadataKey",
                expected: METADATA_KEY_LEN,
                actual: metadata_key.len(),
            });
        }
        if file_key.len() != FILE_KEY_LEN {
            return Err(TagError::InvalidComponentLength {
                component: "fileKey",
                expected: FILE_KEY_LEN,
                actual: file_key.len(),
            });
        }
        Ok(Self {
            email: email.to_owned(),
            backup_id: backup_id.to_owned(),
            metadata_key: Zeroizing::new(metadata_key.to_vec()),
            file_key: Zeroizing::new(file_key.to_vec()),
        })
    }

    /// Build a tag for one of the caller's own backups.
    pub fn for_backup(
        email: &str,
        backup_id: &str,
        metadata_key: &MetadataKey,
        file_key: &FileKey,
    ) -> Result<Self, TagError> {
        Self::new(
            email,
            backup_id,
            metadata_key.as_bytes(),
            file_key.as_bytes(),
        )
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn backup_id(&self) -> &str {
        &self.backup_id
    }

    pub fn metadata_key(&self) -> &[u8] {
        &self.metadata_key
    }

    pub fn file_key(&self) -> &[u8] {
        &self.file_key
    }

    /// The comma-joined textual form.
    pub fn to_text(&self) -> String {
        [
            BASE64.encode(self.email.as_bytes()),
            self.backup_id.clone(),
            BASE64.encode(&*self.metadata_key),
            BASE64.encode(&*self.file_key),
        ]
        .join(",")
    }

    /// Parse the textual form, validating every component.
    pub fn from_text(text: &str) -> Result<Self, TagError> {
        let parts: Vec<&str> = text.split(',').collect();
        if parts.len() != 4 {
            return Err(TagError::InvalidFormat(parts.len()));
        }

        let email_bytes = BASE64
            .decode(parts[0])
            .map_err(|_| TagError::InvalidEncoding { component: "email" })?;
        let email =
            String::from_utf8(email_bytes).map_err(|_| TagError::InvalidEmail)?;
        let metadata_key = BASE64.decode(parts[2]).map_err(|_| TagError::InvalidEncoding {
            component: "metadataKey",
        })?;
        let file_key = BASE64.decode(parts[3]).map_err(|_| TagError::InvalidEncoding {
            component: "fileKey",
        })?;

        Self::new(&email, parts[1], &metadata_key, &file_key)
    }

    /// Pack into the fixed binary layout. Segment order is reversed
    /// relative to the textual tuple.
    pub fn pack(&self) -> Zeroizing<Vec<u8>> {
        let mut packed =
            Zeroizing::new(Vec::with_capacity(PACKED_MIN_LEN + self.email.len()));
        packed.extend_from_slice(&self.file_key);
        packed.extend_from_slice(&self.metadata_key);
        packed.extend_from_slice(self.backup_id.as_bytes());
        packed.extend_from_slice(self.email.as_bytes());
        packed
    }

    /// Unpack the fixed binary layout, validating every segment.
    pub fn unpack(packed: &[u8]) -> Result<Self, TagError> {
        if packed.len() < PACKED_MIN_LEN {
            return Err(TagError::PackedTooShort {
                actual: packed.len(),
            });
        }
        let (file_key, rest) = packed.split_at(FILE_KEY_LEN);
        let (metadata_key, rest) = rest.split_at(METADATA_KEY_LEN);
        let (backup_id, email) = rest.split_at(BACKUP_ID_LEN);

        let backup_id =
            std::str::from_utf8(backup_id).map_err(|_| TagError::InvalidBackupId)?;
        let email = std::str::from_utf8(email).map_err(|_| TagError::InvalidEmail)?;

        Self::new(email, backup_id, metadata_key, file_key)
    }
}

impl fmt::Debug for CapabilityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityTag")
            .field("email", &self.email)
            .field("backup_id", &self.backup_id)
            .field("metadata_key", &"[REDACTED]")
            .field("file_key", &"[REDACTED]")
            .finish()
    }
}

fn validate_backup_id(backup_id: &str) -> Result<(), TagError> {
    if backup_id.len() != BACKUP_ID_LEN
        || !backup_id.bytes().all(|b| b.is_ascii_alphanumeric())
    {
        return Err(TagError::InvalidBackupId);
    }
    Ok(())
}

/// Generate a fresh 10-character backup identifier.
///
/// Uniqueness against the store is the caller's job (retry on collision).
pub fn generate_backup_id() -> String {
    let mut bytes = [0u8; BACKUP_ID_LEN];
    rand::rng().fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|&b| char::from(BACKUP_ID_CHARSET[b as usize % BACKUP_ID_CHARSET.len()]))
        .collect()
}
