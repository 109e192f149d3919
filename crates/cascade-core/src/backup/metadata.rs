//! Shareable-field encryption flows: filename, description, metadata tag,
//! record-integrity tag, and file content.
//!
//! The description is optional. When present, a metadata tag binding
//! `filename ‖ description` is stored alongside it; when absent, no tag is
//! stored and the absence of both is legitimate. The record-integrity tag
//! additionally binds the content tag, so renaming a backup's ciphertexts
//! against each other is detectable even without downloading the content.

use tracing::instrument;
use zeroize::Zeroizing;

use crate::crypto::cascade;
use crate::crypto::kdf::TAG_LEN;
use crate::crypto::{CryptoError, KeyBlob};
use crate::keyring::backup::{
    BACKUP_SALT_LEN, FileKey, MetadataKey, RandomFileKey, derive_file_key, derive_metadata_key,
};
use crate::keyring::master::MasterKey;

/// Everything the metadata decryption pass produces.
///
/// `None` verdicts mean "not applicable" (the field is legitimately
/// absent), not failure.
#[derive(Debug, Clone, Default)]
pub struct DecryptedMetadata {
    pub filename: Option<String>,
    pub filename_integrity: Option<bool>,
    pub description: Option<String>,
    pub description_integrity: Option<bool>,
    pub metadata_integrity: Option<bool>,
}

/// Shareable-field ciphertexts for a new backup.
#[derive(Debug)]
pub struct EncryptedBackupMetadata {
    pub encrypted_filename: Vec<u8>,
    pub encrypted_description: Option<Vec<u8>>,
    pub encrypted_metadata_tag: Option<Vec<u8>>,
    pub encrypted_record_integrity_tag: Vec<u8>,
}

impl EncryptedBackupMetadata {
    /// Base64-encode into the document-store field format. Absent optional
    /// fields are written as the `"none"` sentinel.
    pub fn encode(&self) -> crate::backup::record::BackupDocument {
        use base64::Engine as _;
        use base64::engine::general_purpose::STANDARD as BASE64;

        use crate::backup::record::ABSENT_SENTINEL;

        let encode_opt = |field: &Option<Vec<u8>>| {
            Some(
                field
                    .as_ref()
                    .map_or_else(|| ABSENT_SENTINEL.to_owned(), |bytes| BASE64.encode(bytes)),
            )
        };
        crate::backup::record::BackupDocument {
            encrypted_filename: Some(BASE64.encode(&self.encrypted_filename)),
            encrypted_description: encode_opt(&self.encrypted_description),
            encrypted_metadata_tag: encode_opt(&self.encrypted_metadata_tag),
            encrypted_record_integrity_tag: Some(
                BASE64.encode(&self.encrypted_record_integrity_tag),
            ),
            ..crate::backup::record::BackupDocument::default()
        }
    }
}

/// Encrypt file content under the file key.
///
/// Returns the ciphertext and the detached plaintext tag; the tag goes into
/// the record-integrity binding, never into the store on its own.
pub fn encrypt_backup_content(content: &[u8], file_key: &FileKey) -> (Vec<u8>, [u8; TAG_LEN]) {
    cascade::encrypt_content(content, &file_key.content_key())
}

/// Decrypt file content. Integrity is reported, not thrown.
pub fn decrypt_backup_content(
    bytes: &[u8],
    file_key: &FileKey,
) -> Result<(Vec<u8>, bool), CryptoError> {
    cascade::decrypt_content(bytes, &file_key.content_key())
}

/// Encrypt the shareable fields of a new backup.
///
/// An empty (or whitespace-only) description counts as absent: no
/// description ciphertext and no metadata tag are produced.
#[instrument(level = "debug", skip_all, fields(has_description = description.is_some()))]
pub fn encrypt_backup_metadata(
    filename: &str,
    description: Option<&str>,
    content_tag: &[u8; TAG_LEN],
    file_key: &FileKey,
    metadata_key: &MetadataKey,
) -> EncryptedBackupMetadata {
    let filename_bytes = filename.as_bytes();
    let description = description.map(str::trim).filter(|d| !d.is_empty());

    let encrypted_filename =
        cascade::encrypt_with_key(filename_bytes, &metadata_key.filename_key());

    let mut encrypted_description = None;
    let mut encrypted_metadata_tag = None;
    if let Some(description) = description {
        encrypted_description = Some(cascade::encrypt_with_key(
            description.as_bytes(),
            &metadata_key.description_key(),
        ));

        let mut combined = Vec::with_capacity(filename_bytes.len() + description.len());
        combined.extend_from_slice(filename_bytes);
        combined.extend_from_slice(description.as_bytes());
        encrypted_metadata_tag = Some(cascade::encrypt_reference_tag_with_key(
            &combined,
            &metadata_key.integrity_key(),
        ));
    }

    let mut record_binding = Zeroizing::new(Vec::with_capacity(
        filename_bytes.len() + description.map_or(0, str::len) + TAG_LEN,
    ));
    record_binding.extend_from_slice(filename_bytes);
    if let Some(description) = description {
        record_binding.extend_from_slice(description.as_bytes());
    }
    record_binding.extend_from_slice(content_tag);
    let encrypted_record_integrity_tag =
        cascade::encrypt_reference_tag_with_key(&record_binding, &file_key.record_key());

    EncryptedBackupMetadata {
        encrypted_filename,
        encrypted_description,
        encrypted_metadata_tag,
        encrypted_record_integrity_tag,
    }
}

/// Verify the record-integrity tag against the reconstructed binding.
pub fn verify_record_integrity_tag(
    encrypted_tag: &[u8],
    filename: &str,
    description: Option<&str>,
    content_tag: &[u8; TAG_LEN],
    file_key: &FileKey,
) -> Result<bool, CryptoError> {
    let mut binding = Vec::with_capacity(
        filename.len() + description.map_or(0, str::len) + TAG_LEN,
    );
    binding.extend_from_slice(filename.as_bytes());
    if let Some(description) = description {
        binding.extend_from_slice(description.as_bytes());
    }
    binding.extend_from_slice(content_tag);
    cascade::verify_reference_tag_with_key(encrypted_tag, &file_key.record_key(), &binding)
}

/// Decrypt a field under a key blob, folding structural failures into an
/// integrity failure (the classification layer should have caught them).
fn field_decrypt(ciphertext: &[u8], key: &KeyBlob<'_>) -> (Option<Vec<u8>>, bool) {
    match cascade::decrypt_with_key(ciphertext, key) {
        Ok((bytes, ok)) => (Some(bytes), ok),
        Err(_) => (None, false),
    }
}

/// Derive the metadata key and decrypt the shareable fields.
///
/// `None` ciphertext arguments mean the field is absent or unusable; the
/// verdict matrix distinguishes legitimate absence (filename present,
/// description and metadata tag both absent) from every asymmetric
/// combination, which poisons the metadata verdict.
#[instrument(level = "debug", skip_all)]
pub fn decrypt_backup_metadata(
    random_file_key: &RandomFileKey,
    metadata_salt: &[u8; BACKUP_SALT_LEN],
    master_key: &MasterKey,
    iterations: u32,
    encrypted_filename: Option<&[u8]>,
    encrypted_description: Option<&[u8]>,
    encrypted_metadata_tag: Option<&[u8]>,
) -> Result<DecryptedMetadata, CryptoError> {
    let metadata_key = derive_metadata_key(random_file_key, master_key, metadata_salt, iterations)?;
    Ok(decrypt_metadata_with_key(
        &metadata_key,
        encrypted_filename,
        encrypted_description,
        encrypted_metadata_tag,
    ))
}

/// Decrypt the shareable fields with an already-derived metadata key (the
/// path a shared-backup recipient takes, holding the key from a capability
/// tag).
pub fn decrypt_metadata_with_key(
    metadata_key: &MetadataKey,
    encrypted_filename: Option<&[u8]>,
    encrypted_description: Option<&[u8]>,
    encrypted_metadata_tag: Option<&[u8]>,
) -> DecryptedMetadata {
    let mut result = DecryptedMetadata::default();

    match (encrypted_filename, encrypted_description) {
        (None, None) => {
            // Nothing decryptable at all.
            result.filename_integrity = Some(false);
            result.description_integrity = Some(false);
            result.metadata_integrity = Some(false);
            return result;
        }
        (None, Some(description_ct)) => {
            // A description without a filename is never legitimate.
            result.filename_integrity = Some(false);
            let (bytes, ok) = field_decrypt(description_ct, &metadata_key.description_key());
            result.description = bytes.map(|b| String::from_utf8_lossy(&b).into_owned());
            result.description_integrity = Some(ok);
            result.metadata_integrity = Some(false);
            return result;
        }
        (Some(filename_ct), _) => {
            let (bytes, ok) = field_decrypt(filename_ct, &metadata_key.filename_key());
            result.filename = bytes
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).into_owned());
            result.filename_integrity = Some(ok);

            match (encrypted_description, encrypted_metadata_tag) {
                (None, None) => {
                    // Legitimately minimal backup: verdicts stay
                    // not-applicable.
                }
                (None, Some(_)) => {
                    // Tag without a description is asymmetric.
                    result.metadata_integrity = Some(false);
                }
                (Some(description_ct), tag) => {
                    let (description_bytes, ok) =
                        field_decrypt(description_ct, &metadata_key.description_key());
                    result.description = description_bytes
                        .as_ref()
                        .map(|b| String::from_utf8_lossy(b).into_owned());
                    result.description_integrity = Some(ok);

                    match tag {
                        None => result.metadata_integrity = Some(false),
                        Some(tag_ct) => {
                            // The tag binds the raw decrypted bytes, not
                            // their UTF-8 rendering.
                            let mut combined = Vec::new();
                            if let Some(name) = &bytes {
                                combined.extend_from_slice(name);
                            }
                            if let Some(description) = &description_bytes {
                                combined.extend_from_slice(description);
                            }
                            let verdict = cascade::verify_reference_tag_with_key(
                                tag_ct,
                                &metadata_key.integrity_key(),
                                &combined,
                            )
                            .unwrap_or(false);
                            result.metadata_integrity = Some(verdict);
                        }
                    }
                }
            }
        }
    }

    result
}

/// Re-derive both keys a backup owner needs from unlocked private fields.
pub fn derive_backup_keys(
    random_file_key: &RandomFileKey,
    master_key: &MasterKey,
    file_salt: &[u8; BACKUP_SALT_LEN],
    metadata_salt: &[u8; BACKUP_SALT_LEN],
    iterations: u32,
) -> Result<(FileKey, MetadataKey), CryptoError> {
    let file_key = derive_file_key(random_file_key, master_key, file_salt, iterations)?;
    let metadata_key = derive_metadata_key(random_file_key, master_key, metadata_salt, iterations)?;
    Ok((file_key, metadata_key))
}
