//! The integrity state evaluator: turns per-field statuses and verdicts
//! into the ordered list of findings a caller can render.
//!
//! The rules are non-exclusive — several findings may fire for one backup —
//! with a single collapse rule at the end: when every available field is
//! present and verified, the whole list is replaced by one aggregate
//! success entry.

use crate::keyring::backup::{BACKUP_SALT_LEN, RANDOM_FILE_KEY_LEN};

use super::record::{BackupRecord, FieldStatus, StoredField};

/// One evaluator finding. `passed` is true only for the success entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityFinding {
    FileKeyMissing,
    FileKeyCorrupted,
    FileKeyInvalidLength,
    FileSaltMissing,
    FileSaltCorrupted,
    FileSaltInvalidLength,
    MetadataSaltMissing,
    MetadataSaltCorrupted,
    MetadataSaltInvalidLength,
    RecordTagMissing,
    RecordTagCorrupted,
    RecordTagInvalid,
    FilenameMissing,
    FilenameInvalid,
    DescriptionInvalid,
    DescriptionMissing,
    MetadataTagMissing,
    MetadataInvalid,
    MetadataVerified,
    ContentInvalid,
    ContentVerified,
    RecordBindingInvalid,
    RecordBindingVerified,
}

impl IntegrityFinding {
    /// Whether this finding reports success.
    pub fn passed(self) -> bool {
        matches!(
            self,
            Self::MetadataVerified | Self::ContentVerified | Self::RecordBindingVerified
        )
    }

    /// Stable human-readable message for this finding.
    pub fn message(self) -> &'static str {
        match self {
            Self::FileKeyMissing => "file key is missing",
            Self::FileKeyCorrupted => "file key is corrupted",
            Self::FileKeyInvalidLength => "file key has an invalid length",
            Self::FileSaltMissing => "file salt is missing",
            Self::FileSaltCorrupted => "file salt is corrupted",
            Self::FileSaltInvalidLength => "file salt has an invalid length",
            Self::MetadataSaltMissing => "metadata salt is missing",
            Self::MetadataSaltCorrupted => "metadata salt is corrupted",
            Self::MetadataSaltInvalidLength => "metadata salt has an invalid length",
            Self::RecordTagMissing => "record tag is missing",
            Self::RecordTagCorrupted => "record tag is corrupted",
            Self::RecordTagInvalid => "record tag failed verification",
            Self::FilenameMissing => "encrypted filename is missing",
            Self::FilenameInvalid => "filename failed verification",
            Self::DescriptionInvalid => "description failed verification",
            Self::DescriptionMissing => "metadata tag present without a description",
            Self::MetadataTagMissing => "description present without a metadata tag",
            Self::MetadataInvalid => "metadata failed verification",
            Self::MetadataVerified => "metadata verified",
            Self::ContentInvalid => "file content failed verification",
            Self::ContentVerified => "file content verified",
            Self::RecordBindingInvalid => "backup record binding failed verification",
            Self::RecordBindingVerified => "backup record binding verified",
        }
    }
}

fn check_private_field(
    field: &StoredField,
    expected_len: usize,
    findings: &mut Vec<IntegrityFinding>,
    missing: IntegrityFinding,
    corrupted: IntegrityFinding,
    bad_length: IntegrityFinding,
) {
    match field.status {
        FieldStatus::Absent => findings.push(missing),
        FieldStatus::Corrupted => findings.push(corrupted),
        FieldStatus::Valid => match &field.value {
            None => findings.push(missing),
            Some(value) if value.len() != expected_len => findings.push(bad_length),
            Some(_) => {}
        },
    }
}

/// Evaluate a backup the owner fetched: private fields, record tag, and
/// the decrypted-metadata verdicts.
///
/// The record must have gone through `unlock_private_fields` and a
/// metadata decryption pass for the verdicts to be populated; fields that
/// never decrypted evaluate as failures through their status alone.
pub fn evaluate_backup(record: &BackupRecord) -> Vec<IntegrityFinding> {
    let mut findings = Vec::new();

    check_private_field(
        &record.random_file_key,
        RANDOM_FILE_KEY_LEN,
        &mut findings,
        IntegrityFinding::FileKeyMissing,
        IntegrityFinding::FileKeyCorrupted,
        IntegrityFinding::FileKeyInvalidLength,
    );
    check_private_field(
        &record.file_salt,
        BACKUP_SALT_LEN,
        &mut findings,
        IntegrityFinding::FileSaltMissing,
        IntegrityFinding::FileSaltCorrupted,
        IntegrityFinding::FileSaltInvalidLength,
    );
    check_private_field(
        &record.metadata_salt,
        BACKUP_SALT_LEN,
        &mut findings,
        IntegrityFinding::MetadataSaltMissing,
        IntegrityFinding::MetadataSaltCorrupted,
        IntegrityFinding::MetadataSaltInvalidLength,
    );

    match record.record_tag.status {
        FieldStatus::Absent => findings.push(IntegrityFinding::RecordTagMissing),
        FieldStatus::Corrupted => findings.push(IntegrityFinding::RecordTagCorrupted),
        FieldStatus::Valid => {
            if record.record_tag.integrity == Some(false) {
                findings.push(IntegrityFinding::RecordTagInvalid);
            }
        }
    }

    let decrypted = record.decrypted.as_ref();
    let filename_integrity = decrypted.and_then(|d| d.filename_integrity);
    let description_integrity = decrypted.and_then(|d| d.description_integrity);
    let metadata_integrity = decrypted.and_then(|d| d.metadata_integrity);

    if filename_integrity == Some(false) {
        findings.push(IntegrityFinding::FilenameInvalid);
    }
    if !record.filename.is_valid() {
        findings.push(IntegrityFinding::FilenameMissing);
    }
    if description_integrity == Some(false) {
        findings.push(IntegrityFinding::DescriptionInvalid);
    }

    let has_description = record.description.is_valid();
    let has_metadata_tag = record.metadata_tag.is_valid();
    if has_metadata_tag && !has_description {
        findings.push(IntegrityFinding::DescriptionMissing);
    }
    if has_description && !has_metadata_tag {
        findings.push(IntegrityFinding::MetadataTagMissing);
    }

    if metadata_integrity == Some(false) {
        findings.push(IntegrityFinding::MetadataInvalid);
    }

    // Collapse rules. A filename-only backup with a verified name counts
    // as trusted when its key material is intact; a fully populated backup
    // collapses only when every verdict passed.
    let filename_decrypted = decrypted.is_some_and(|d| d.filename.is_some());
    let description_decrypted = decrypted.is_some_and(|d| d.description.is_some());

    if filename_decrypted
        && !description_decrypted
        && metadata_integrity.is_none()
        && record.random_file_key.is_valid()
        && record.metadata_salt.is_valid()
    {
        if filename_integrity == Some(true) {
            findings.push(IntegrityFinding::MetadataVerified);
        }
    } else if record.random_file_key.is_valid()
        && record.file_salt.is_valid()
        && record.metadata_salt.is_valid()
        && record.record_tag.is_valid()
        && record.record_tag.integrity != Some(false)
        && filename_integrity == Some(true)
        && description_integrity == Some(true)
        && metadata_integrity == Some(true)
    {
        return vec![IntegrityFinding::MetadataVerified];
    }

    findings
}

/// Evaluate a backup received through a capability tag. Recipients hold no
/// private fields, so only the shareable-field rules apply.
pub fn evaluate_shared_backup(record: &BackupRecord) -> Vec<IntegrityFinding> {
    let mut findings = Vec::new();

    let decrypted = record.decrypted.as_ref();
    let filename_integrity = decrypted.and_then(|d| d.filename_integrity);
    let description_integrity = decrypted.and_then(|d| d.description_integrity);
    let metadata_integrity = decrypted.and_then(|d| d.metadata_integrity);

    if filename_integrity == Some(false) {
        findings.push(IntegrityFinding::FilenameInvalid);
    }
    if !record.filename.is_valid() {
        findings.push(IntegrityFinding::FilenameMissing);
    }
    if description_integrity == Some(false) {
        findings.push(IntegrityFinding::DescriptionInvalid);
    }

    let has_description = record.description.is_valid();
    let has_metadata_tag = record.metadata_tag.is_valid();
    if has_metadata_tag && !has_description {
        findings.push(IntegrityFinding::DescriptionMissing);
    }
    if has_description && !has_metadata_tag {
        findings.push(IntegrityFinding::MetadataTagMissing);
    }

    if metadata_integrity == Some(false) {
        findings.push(IntegrityFinding::MetadataInvalid);
    }

    let filename_decrypted = decrypted.is_some_and(|d| d.filename.is_some());
    let description_decrypted = decrypted.is_some_and(|d| d.description.is_some());

    if filename_decrypted && !description_decrypted && metadata_integrity.is_none() {
        if filename_integrity == Some(true) {
            findings.push(IntegrityFinding::MetadataVerified);
        }
    } else if filename_integrity == Some(true)
        && description_integrity == Some(true)
        && metadata_integrity == Some(true)
    {
        return vec![IntegrityFinding::MetadataVerified];
    }

    findings
}

/// Append the file-content and record-binding verdicts produced during a
/// download to an evaluation.
pub fn with_transfer_verdicts(
    mut findings: Vec<IntegrityFinding>,
    content_ok: bool,
    record_binding_ok: bool,
) -> Vec<IntegrityFinding> {
    findings.push(if content_ok {
        IntegrityFinding::ContentVerified
    } else {
        IntegrityFinding::ContentInvalid
    });
    findings.push(if record_binding_ok {
        IntegrityFinding::RecordBindingVerified
    } else {
        IntegrityFinding::RecordBindingInvalid
    });
    findings
}

/// [`evaluate_backup`] plus the transfer verdicts.
pub fn evaluate_backup_with_transfer(
    record: &BackupRecord,
    content_ok: bool,
    record_binding_ok: bool,
) -> Vec<IntegrityFinding> {
    with_transfer_verdicts(evaluate_backup(record), content_ok, record_binding_ok)
}

/// [`evaluate_shared_backup`] plus the transfer verdicts.
pub fn evaluate_shared_backup_with_transfer(
    record: &BackupRecord,
    content_ok: bool,
    record_binding_ok: bool,
) -> Vec<IntegrityFinding> {
    with_transfer_verdicts(
        evaluate_shared_backup(record),
        content_ok,
        record_binding_ok,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::metadata::DecryptedMetadata;

    fn valid_field(len: usize) -> StoredField {
        StoredField {
            value: Some(vec![0u8; len]),
            status: FieldStatus::Valid,
            integrity: Some(true),
        }
    }

    fn ciphertext_field() -> StoredField {
        StoredField {
            value: Some(vec![0u8; 112]),
            status: FieldStatus::Valid,
            integrity: None,
        }
    }

    fn trusted_record() -> BackupRecord {
        BackupRecord {
            id: "b1".into(),
            random_file_key: valid_field(RANDOM_FILE_KEY_LEN),
            file_salt: valid_field(BACKUP_SALT_LEN),
            metadata_salt: valid_field(BACKUP_SALT_LEN),
            record_tag: StoredField {
                value: Some(vec![0u8; 112]),
                status: FieldStatus::Valid,
                integrity: Some(true),
            },
            filename: ciphertext_field(),
            description: ciphertext_field(),
            metadata_tag: ciphertext_field(),
            record_integrity_tag: ciphertext_field(),
            decrypted: Some(DecryptedMetadata {
                filename: Some("a.txt".into()),
                filename_integrity: Some(true),
                description: Some("desc".into()),
                description_integrity: Some(true),
                metadata_integrity: Some(true),
            }),
            created_at: None,
            downloads: None,
            size: None,
            encrypted_size: None,
            is_public: false,
        }
    }

    #[test]
    fn fully_trusted_backup_collapses_to_one_entry() {
        let findings = evaluate_backup(&trusted_record());
        assert_eq!(findings, vec![IntegrityFinding::MetadataVerified]);
    }

    #[test]
    fn filename_only_backup_is_trusted_with_na_verdicts() {
        let mut record = trusted_record();
        record.description = StoredField::absent();
        record.metadata_tag = StoredField::absent();
        record.decrypted = Some(DecryptedMetadata {
            filename: Some("a.txt".into()),
            filename_integrity: Some(true),
            description: None,
            description_integrity: None,
            metadata_integrity: None,
        });
        let findings = evaluate_backup(&record);
        assert_eq!(findings, vec![IntegrityFinding::MetadataVerified]);
    }

    #[test]
    fn each_broken_private_field_reports_specifically() {
        let mut record = trusted_record();
        record.random_file_key = StoredField::absent();
        record.file_salt = StoredField {
            value: None,
            status: FieldStatus::Corrupted,
            integrity: Some(false),
        };
        record.metadata_salt = valid_field(BACKUP_SALT_LEN - 1);
        let findings = evaluate_backup(&record);
        assert!(findings.contains(&IntegrityFinding::FileKeyMissing));
        assert!(findings.contains(&IntegrityFinding::FileSaltCorrupted));
        assert!(findings.contains(&IntegrityFinding::MetadataSaltInvalidLength));
        assert!(!findings.contains(&IntegrityFinding::MetadataVerified));
    }

    #[test]
    fn record_tag_failure_reports() {
        let mut record = trusted_record();
        record.record_tag.integrity = Some(false);
        let findings = evaluate_backup(&record);
        assert!(findings.contains(&IntegrityFinding::RecordTagInvalid));
    }

    #[test]
    fn asymmetric_description_and_tag_report() {
        let mut record = trusted_record();
        record.metadata_tag = StoredField::absent();
        record.decrypted = Some(DecryptedMetadata {
            filename: Some("a.txt".into()),
            filename_integrity: Some(true),
            description: Some("desc".into()),
            description_integrity: Some(true),
            metadata_integrity: Some(false),
        });
        let findings = evaluate_backup(&record);
        assert!(findings.contains(&IntegrityFinding::MetadataTagMissing));
        assert!(findings.contains(&IntegrityFinding::MetadataInvalid));
    }

    #[test]
    fn transfer_verdicts_append() {
        let findings = evaluate_backup_with_transfer(&trusted_record(), true, false);
        assert!(findings.contains(&IntegrityFinding::MetadataVerified));
        assert!(findings.contains(&IntegrityFinding::ContentVerified));
        assert!(findings.contains(&IntegrityFinding::RecordBindingInvalid));
    }

    #[test]
    fn shared_evaluation_ignores_private_fields() {
        let mut record = trusted_record();
        record.random_file_key = StoredField::absent();
        record.file_salt = StoredField::absent();
        record.metadata_salt = StoredField::absent();
        record.record_tag = StoredField::absent();
        let findings = evaluate_shared_backup(&record);
        assert_eq!(findings, vec![IntegrityFinding::MetadataVerified]);
    }
}
