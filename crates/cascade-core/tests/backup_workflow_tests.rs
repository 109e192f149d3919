//! End-to-end backup flows: create, persist, fetch, unlock, evaluate.

use cascade_core::backup::metadata::{
    decrypt_backup_metadata, decrypt_backup_content, derive_backup_keys, encrypt_backup_content,
    encrypt_backup_metadata, verify_record_integrity_tag,
};
use cascade_core::backup::record::{BackupRecord, FieldStatus, seal_private_fields};
use cascade_core::backup::{IntegrityFinding, evaluate_backup, evaluate_backup_with_transfer};
use cascade_core::keyring::backup::{
    BACKUP_SALT_LEN, RANDOM_FILE_KEY_LEN, RandomFileKey, generate_backup_material,
};
use cascade_core::keyring::master::{MasterKey, SessionSecrets};

const ITERATIONS: u32 = 30;

fn test_secrets() -> SessionSecrets {
    let key = MasterKey::from_bytes(&(0..=255u8).cycle().take(272).collect::<Vec<_>>()).unwrap();
    SessionSecrets::new(key, ITERATIONS)
}

fn salt_array(bytes: &[u8]) -> [u8; BACKUP_SALT_LEN] {
    bytes.try_into().unwrap()
}

/// Create a backup, push it through the document form, fetch and unlock it
/// again, and return the reconstructed record.
fn round_trip_backup(
    secrets: &SessionSecrets,
    filename: &str,
    description: Option<&str>,
    content: &[u8],
) -> (BackupRecord, Vec<u8>) {
    let material = generate_backup_material(&[0x5au8; 640]).unwrap();
    let (file_key, metadata_key) = derive_backup_keys(
        &material.random_file_key,
        secrets.master_key(),
        &material.file_salt,
        &material.metadata_salt,
        secrets.iterations(),
    )
    .unwrap();

    let (encrypted_content, content_tag) = encrypt_backup_content(content, &file_key);
    let encrypted_metadata =
        encrypt_backup_metadata(filename, description, &content_tag, &file_key, &metadata_key);
    let sealed = seal_private_fields(&material, secrets).unwrap();

    // Merge the two documents the way the store holds them.
    let mut document = sealed.encode();
    let metadata_document = encrypted_metadata.encode();
    document.encrypted_filename = metadata_document.encrypted_filename;
    document.encrypted_description = metadata_document.encrypted_description;
    document.encrypted_metadata_tag = metadata_document.encrypted_metadata_tag;
    document.encrypted_record_integrity_tag = metadata_document.encrypted_record_integrity_tag;
    document.size = Some(content.len() as i64);
    document.encrypted_size = Some(encrypted_content.len() as i64);
    document.downloads = Some(0);

    // Fetch side.
    let mut record = BackupRecord::from_document("Ab3dEf7hIj", &document);
    record.unlock_private_fields(secrets).unwrap();

    let random_file_key =
        RandomFileKey::from_bytes(record.random_file_key.value.as_deref().unwrap()).unwrap();
    let metadata_salt = salt_array(record.metadata_salt.value.as_deref().unwrap());
    record.decrypted = Some(
        decrypt_backup_metadata(
            &random_file_key,
            &metadata_salt,
            secrets.master_key(),
            secrets.iterations(),
            record.filename.value.as_deref(),
            record.description.value.as_deref(),
            record.metadata_tag.value.as_deref(),
        )
        .unwrap(),
    );

    (record, encrypted_content)
}

#[test]
fn full_backup_collapses_to_single_success() {
    let secrets = test_secrets();
    let (record, _) = round_trip_backup(&secrets, "report.pdf", Some("numbers"), b"content");

    assert_eq!(record.random_file_key.integrity, Some(true));
    assert_eq!(record.file_salt.integrity, Some(true));
    assert_eq!(record.metadata_salt.integrity, Some(true));
    assert_eq!(record.record_tag.integrity, Some(true));
    assert_eq!(
        record.random_file_key.value.as_ref().map(Vec::len),
        Some(RANDOM_FILE_KEY_LEN)
    );

    let decrypted = record.decrypted.as_ref().unwrap();
    assert_eq!(decrypted.filename.as_deref(), Some("report.pdf"));
    assert_eq!(decrypted.metadata_integrity, Some(true));

    let findings = evaluate_backup(&record);
    assert_eq!(findings, vec![IntegrityFinding::MetadataVerified]);
}

#[test]
fn filename_only_backup_is_trusted() {
    let secrets = test_secrets();
    let (record, _) = round_trip_backup(&secrets, "notes.txt", None, b"content");

    assert_eq!(record.description.status, FieldStatus::Absent);
    assert_eq!(record.metadata_tag.status, FieldStatus::Absent);
    let decrypted = record.decrypted.as_ref().unwrap();
    assert_eq!(decrypted.description_integrity, None);
    assert_eq!(decrypted.metadata_integrity, None);

    let findings = evaluate_backup(&record);
    assert_eq!(findings, vec![IntegrityFinding::MetadataVerified]);
}

#[test]
fn content_and_record_binding_verify_on_download() {
    let secrets = test_secrets();
    let content = b"the actual backup payload";
    let material = generate_backup_material(&[0x11u8; 640]).unwrap();
    let (file_key, metadata_key) = derive_backup_keys(
        &material.random_file_key,
        secrets.master_key(),
        &material.file_salt,
        &material.metadata_salt,
        secrets.iterations(),
    )
    .unwrap();

    let (encrypted_content, content_tag) = encrypt_backup_content(content, &file_key);
    let metadata =
        encrypt_backup_metadata("a.bin", Some("desc"), &content_tag, &file_key, &metadata_key);

    let (decrypted, ok) = decrypt_backup_content(&encrypted_content, &file_key).unwrap();
    assert!(ok);
    assert_eq!(decrypted, content);

    assert!(
        verify_record_integrity_tag(
            &metadata.encrypted_record_integrity_tag,
            "a.bin",
            Some("desc"),
            &content_tag,
            &file_key,
        )
        .unwrap()
    );

    // A tampered content ciphertext fails its verdict but still yields
    // bytes for the caller to inspect.
    let mut tampered = encrypted_content;
    tampered[40] ^= 0xff;
    let (_, ok) = decrypt_backup_content(&tampered, &file_key).unwrap();
    assert!(!ok);
}

#[test]
fn corrupted_private_field_reports_and_blocks_collapse() {
    let secrets = test_secrets();
    let (mut record, _) = round_trip_backup(&secrets, "x.txt", Some("d"), b"c");

    record.file_salt.status = FieldStatus::Corrupted;
    record.file_salt.value = None;
    record.file_salt.integrity = Some(false);

    let findings = evaluate_backup(&record);
    assert!(findings.contains(&IntegrityFinding::FileSaltCorrupted));
    assert_ne!(findings, vec![IntegrityFinding::MetadataVerified]);
}

#[test]
fn swapped_record_tag_fails_verification() {
    // Reusing backup A's record tag in backup B's document must be caught
    // at unlock: the tag binds randomKey ‖ fileSalt ‖ metadataSalt.
    let secrets = test_secrets();
    let sealed_a =
        seal_private_fields(&generate_backup_material(&[0x01u8; 640]).unwrap(), &secrets).unwrap();
    let mut document_b =
        seal_private_fields(&generate_backup_material(&[0x02u8; 640]).unwrap(), &secrets)
            .unwrap()
            .encode();
    document_b.encrypted_tag = sealed_a.encode().encrypted_tag;

    let mut swapped = BackupRecord::from_document("Qr5tUv9wXy", &document_b);
    swapped.unlock_private_fields(&secrets).unwrap();
    assert_eq!(swapped.record_tag.integrity, Some(false));

    let findings = evaluate_backup(&swapped);
    assert!(findings.contains(&IntegrityFinding::RecordTagInvalid));
}

#[test]
fn transfer_verdicts_join_the_evaluation() {
    let secrets = test_secrets();
    let (record, _) = round_trip_backup(&secrets, "x.txt", Some("d"), b"c");
    let findings = evaluate_backup_with_transfer(&record, true, true);
    assert!(findings.contains(&IntegrityFinding::MetadataVerified));
    assert!(findings.contains(&IntegrityFinding::ContentVerified));
    assert!(findings.contains(&IntegrityFinding::RecordBindingVerified));

    let findings = evaluate_backup_with_transfer(&record, false, true);
    assert!(findings.contains(&IntegrityFinding::ContentInvalid));
}

#[test]
fn document_fields_use_the_none_sentinel() {
    let secrets = test_secrets();
    let material = generate_backup_material(&[0x33u8; 640]).unwrap();
    let (file_key, metadata_key) = derive_backup_keys(
        &material.random_file_key,
        secrets.master_key(),
        &material.file_salt,
        &material.metadata_salt,
        secrets.iterations(),
    )
    .unwrap();
    let (_, content_tag) = encrypt_backup_content(b"c", &file_key);
    let metadata = encrypt_backup_metadata("n", None, &content_tag, &file_key, &metadata_key);
    let document = metadata.encode();
    assert_eq!(document.encrypted_description.as_deref(), Some("none"));
    assert_eq!(document.encrypted_metadata_tag.as_deref(), Some("none"));

    let record = BackupRecord::from_document("Ab3dEf7hIj", &document);
    assert_eq!(record.description.status, FieldStatus::Absent);
    assert_eq!(record.metadata_tag.status, FieldStatus::Absent);
}
