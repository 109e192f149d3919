//! The backup record: its document-store form, per-field status
//! classification, and the private-field seal/unlock flows.
//!
//! The document store only ever holds base64 text and plain scalars. All
//! classification happens on the decoded bytes before any cryptography: a
//! field whose ciphertext is not a positive multiple of the block size can
//! never decrypt and is marked `Corrupted` immediately.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::crypto::cascade;
use crate::crypto::CryptoError;
use crate::keyring::backup::{BACKUP_SALT_LEN, RANDOM_FILE_KEY_LEN, BackupKeyMaterial};
use crate::keyring::master::SessionSecrets;

use super::metadata::DecryptedMetadata;

/// Sentinel the document store uses for intentionally absent optional
/// fields.
pub const ABSENT_SENTINEL: &str = "none";

/// Tri-state classification of a stored field, prior to any decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStatus {
    /// Present and block-aligned; decryption may be attempted.
    Valid,
    /// Present but structurally unusable (bad base64 or misaligned).
    Corrupted,
    /// Not stored (missing or the `"none"` sentinel).
    Absent,
}

/// One stored field: bytes (ciphertext until unlocked, then plaintext for
/// private fields), its structural status, and its post-decrypt verdict.
#[derive(Debug, Clone)]
pub struct StoredField {
    pub value: Option<Vec<u8>>,
    pub status: FieldStatus,
    /// `None` until a decrypt has been attempted (or the field is absent).
    pub integrity: Option<bool>,
}

impl StoredField {
    pub fn absent() -> Self {
        Self {
            value: None,
            status: FieldStatus::Absent,
            integrity: None,
        }
    }

    /// Decode and classify a document field.
    pub fn classify(encoded: Option<&str>) -> Self {
        let Some(text) = encoded else {
            return Self::absent();
        };
        if text == ABSENT_SENTINEL || text.trim().is_empty() {
            return Self::absent();
        }
        match BASE64.decode(text) {
            Ok(bytes) if !bytes.is_empty() && bytes.len() % 16 == 0 => Self {
                value: Some(bytes),
                status: FieldStatus::Valid,
                integrity: None,
            },
            Ok(_) | Err(_) => Self {
                value: None,
                status: FieldStatus::Corrupted,
                integrity: None,
            },
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == FieldStatus::Valid
    }
}

/// The backup document as persisted in the remote store.
///
/// Ciphertext travels as base64 text; the scalar fields pass through the
/// engine untouched. Optional ciphertext fields may be missing entirely or
/// hold the `"none"` sentinel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackupDocument {
    pub randomly_generated_file_key: Option<String>,
    pub file_salt: Option<String>,
    pub metadata_salt: Option<String>,
    pub encrypted_tag: Option<String>,
    pub encrypted_filename: Option<String>,
    pub encrypted_description: Option<String>,
    pub encrypted_metadata_tag: Option<String>,
    pub encrypted_record_integrity_tag: Option<String>,
    pub created_at: Option<i64>,
    pub downloads: Option<i64>,
    pub size: Option<i64>,
    pub encrypted_size: Option<i64>,
    pub is_public: Option<bool>,
}

/// An in-memory backup record with per-field trust state.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub id: String,
    /// Private fields, encrypted under the master key.
    pub random_file_key: StoredField,
    pub file_salt: StoredField,
    pub metadata_salt: StoredField,
    pub record_tag: StoredField,
    /// Shareable fields, encrypted under the metadata/record keys.
    pub filename: StoredField,
    pub description: StoredField,
    pub metadata_tag: StoredField,
    pub record_integrity_tag: StoredField,
    /// Result of the metadata decryption pass, if one has run.
    pub decrypted: Option<DecryptedMetadata>,
    pub created_at: Option<i64>,
    pub downloads: Option<i64>,
    pub size: Option<i64>,
    pub encrypted_size: Option<i64>,
    pub is_public: bool,
}

impl BackupRecord {
    /// Classify every field of a fetched document. No cryptography runs.
    pub fn from_document(id: impl Into<String>, doc: &BackupDocument) -> Self {
        Self {
            id: id.into(),
            random_file_key: StoredField::classify(doc.randomly_generated_file_key.as_deref()),
            file_salt: StoredField::classify(doc.file_salt.as_deref()),
            metadata_salt: StoredField::classify(doc.metadata_salt.as_deref()),
            record_tag: StoredField::classify(doc.encrypted_tag.as_deref()),
            filename: StoredField::classify(doc.encrypted_filename.as_deref()),
            description: StoredField::classify(doc.encrypted_description.as_deref()),
            metadata_tag: StoredField::classify(doc.encrypted_metadata_tag.as_deref()),
            record_integrity_tag: StoredField::classify(
                doc.encrypted_record_integrity_tag.as_deref(),
            ),
            decrypted: None,
            created_at: doc.created_at,
            downloads: doc.downloads,
            size: doc.size,
            encrypted_size: doc.encrypted_size,
            is_public: doc.is_public.unwrap_or(false),
        }
    }

    /// Decrypt the private fields in place and verify the record tag.
    ///
    /// Each valid field's `value` is replaced by its plaintext and its
    /// `integrity` verdict set; corrupted fields get `integrity = false`
    /// without any decryption. The record tag only verifies when all three
    /// companions decrypted cleanly, matching the binding it was computed
    /// over.
    #[instrument(level = "debug", skip_all, fields(backup = %self.id))]
    pub fn unlock_private_fields(
        &mut self,
        secrets: &SessionSecrets,
    ) -> Result<(), CryptoError> {
        let password = secrets.master_key().as_bytes();
        let iterations = secrets.backup_iterations();

        for field in [
            &mut self.random_file_key,
            &mut self.file_salt,
            &mut self.metadata_salt,
        ] {
            match field.status {
                FieldStatus::Valid => {
                    let ciphertext = field.value.take().unwrap_or_default();
                    match cascade::decrypt_data_without_padding(&ciphertext, password, iterations)
                    {
                        Ok((plaintext, ok)) => {
                            field.value = Some(plaintext);
                            field.integrity = Some(ok);
                        }
                        // Block-aligned but still too short for the mode.
                        Err(CryptoError::MalformedCiphertext { .. }) => {
                            field.status = FieldStatus::Corrupted;
                            field.integrity = Some(false);
                        }
                        Err(other) => return Err(other),
                    }
                }
                FieldStatus::Corrupted => field.integrity = Some(false),
                FieldStatus::Absent => {}
            }
        }

        match self.record_tag.status {
            FieldStatus::Valid => {
                let companions_ok = [&self.random_file_key, &self.file_salt, &self.metadata_salt]
                    .iter()
                    .all(|f| f.value.is_some() && f.integrity != Some(false));
                if companions_ok {
                    let mut combined = Vec::with_capacity(
                        RANDOM_FILE_KEY_LEN + 2 * BACKUP_SALT_LEN,
                    );
                    for field in [&self.random_file_key, &self.file_salt, &self.metadata_salt] {
                        if let Some(value) = &field.value {
                            combined.extend_from_slice(value);
                        }
                    }
                    let tag_ciphertext = self.record_tag.value.as_deref().unwrap_or_default();
                    match cascade::verify_reference_tag(
                        tag_ciphertext,
                        password,
                        iterations,
                        &combined,
                    ) {
                        Ok(ok) => self.record_tag.integrity = Some(ok),
                        Err(CryptoError::MalformedCiphertext { .. }) => {
                            self.record_tag.status = FieldStatus::Corrupted;
                            self.record_tag.integrity = Some(false);
                        }
                        Err(other) => return Err(other),
                    }
                } else {
                    warn!("record tag cannot verify: companion fields unusable");
                    self.record_tag.integrity = Some(false);
                }
            }
            FieldStatus::Corrupted => self.record_tag.integrity = Some(false),
            FieldStatus::Absent => {}
        }

        Ok(())
    }
}

/// Ciphertexts of the four private fields, ready for the document store.
#[derive(Debug)]
pub struct SealedPrivateFields {
    pub randomly_generated_file_key: Vec<u8>,
    pub file_salt: Vec<u8>,
    pub metadata_salt: Vec<u8>,
    pub encrypted_tag: Vec<u8>,
}

impl SealedPrivateFields {
    /// Base64-encode into the document-store field format.
    pub fn encode(&self) -> BackupDocument {
        BackupDocument {
            randomly_generated_file_key: Some(BASE64.encode(&self.randomly_generated_file_key)),
            file_salt: Some(BASE64.encode(&self.file_salt)),
            metadata_salt: Some(BASE64.encode(&self.metadata_salt)),
            encrypted_tag: Some(BASE64.encode(&self.encrypted_tag)),
            ..BackupDocument::default()
        }
    }
}

/// Encrypt the per-backup key material under the master key.
///
/// The record tag binds `randomKey ‖ fileSalt ‖ metadataSalt`, so swapping
/// any one ciphertext for another backup's is detected at unlock.
#[instrument(level = "debug", skip_all)]
pub fn seal_private_fields(
    material: &BackupKeyMaterial,
    secrets: &SessionSecrets,
) -> Result<SealedPrivateFields, CryptoError> {
    let password = secrets.master_key().as_bytes();
    let iterations = secrets.backup_iterations();

    let key_bytes = material.random_file_key.as_bytes();
    let randomly_generated_file_key =
        cascade::encrypt_data_without_padding(key_bytes, password, iterations)?;
    let file_salt =
        cascade::encrypt_data_without_padding(&material.file_salt, password, iterations)?;
    let metadata_salt =
        cascade::encrypt_data_without_padding(&material.metadata_salt, password, iterations)?;

    let mut combined = Vec::with_capacity(RANDOM_FILE_KEY_LEN + 2 * BACKUP_SALT_LEN);
    combined.extend_from_slice(key_bytes);
    combined.extend_from_slice(&material.file_salt);
    combined.extend_from_slice(&material.metadata_salt);
    let encrypted_tag = cascade::encrypt_reference_tag(&combined, password, iterations)?;

    Ok(SealedPrivateFields {
        randomly_generated_file_key,
        file_salt,
        metadata_salt,
        encrypted_tag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_none_sentinel_as_absent() {
        assert_eq!(StoredField::classify(None).status, FieldStatus::Absent);
        assert_eq!(
            StoredField::classify(Some("none")).status,
            FieldStatus::Absent
        );
        assert_eq!(StoredField::classify(Some("")).status, FieldStatus::Absent);
    }

    #[test]
    fn classify_rejects_misaligned_and_bad_base64() {
        // 8 bytes: valid base64, not a multiple of 16.
        let eight = BASE64.encode([0u8; 8]);
        assert_eq!(
            StoredField::classify(Some(&eight)).status,
            FieldStatus::Corrupted
        );
        assert_eq!(
            StoredField::classify(Some("@@not-base64@@")).status,
            FieldStatus::Corrupted
        );
    }

    #[test]
    fn classify_accepts_block_aligned_ciphertext() {
        let aligned = BASE64.encode([0u8; 112]);
        let field = StoredField::classify(Some(&aligned));
        assert_eq!(field.status, FieldStatus::Valid);
        assert_eq!(field.value.as_ref().map(Vec::len), Some(112));
        assert_eq!(field.integrity, None);
    }

    #[test]
    fn document_round_trips_through_serde() {
        let doc = BackupDocument {
            encrypted_filename: Some("AAAA".into()),
            encrypted_description: Some("none".into()),
            size: Some(123),
            is_public: Some(true),
            ..BackupDocument::default()
        };
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("encryptedFilename"));
        let parsed: BackupDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.size, Some(123));
        let record = BackupRecord::from_document("b1", &parsed);
        assert_eq!(record.description.status, FieldStatus::Absent);
        assert!(record.is_public);
    }
}
