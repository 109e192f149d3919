//! Per-backup key material: the random file key, its two salts, and the
//! purpose-scoped keys derived from them.
//!
//! Every backup gets a fresh 656-byte random file key. The file key and the
//! metadata key are derived from disjoint windows of it mixed with disjoint
//! windows of the master key, so neither derived key alone reveals anything
//! about the other.

use std::fmt;

use rand::RngCore;
use tracing::instrument;
use zeroize::Zeroizing;

use crate::crypto::{CryptoError, KeyBlob, kdf};

use super::master::MasterKey;

/// Length of the per-backup random file key.
pub const RANDOM_FILE_KEY_LEN: usize = 656;

/// Length of the derived file key.
pub const FILE_KEY_LEN: usize = 416;

/// Length of the derived metadata key.
pub const METADATA_KEY_LEN: usize = 672;

/// Length of the file-key and metadata salts.
pub const BACKUP_SALT_LEN: usize = 48;

/// Argon2id stretch of the folded entropy: file key + both salt seeds.
const STRETCH_LEN: usize = 752;

/// Iteration count for the entropy stretch. The input is already random, so
/// this Argon2id pass is a mixer, not the primary KDF.
const STRETCH_ITERATIONS: u32 = 140;

/// Minimum folded-entropy length: 48 salt bytes + 32 password bytes.
const MIN_FOLDED_LEN: usize = 80;

/// Window of the random file key mixed into the file key.
const FILE_KEY_RANDOM_END: usize = 302;

/// Start of the random-file-key window mixed into the metadata key.
const METADATA_RANDOM_OFFSET: usize = 272;

/// The file key's HMAC window ends where the record key begins.
const RECORD_KEY_OFFSET: usize = 224;

/// Length of each metadata sub-key.
const SUBKEY_LEN: usize = 224;

/// The 656-byte random file key, generated once per backup.
pub struct RandomFileKey(Zeroizing<[u8; RANDOM_FILE_KEY_LEN]>);

impl RandomFileKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; RANDOM_FILE_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: RANDOM_FILE_KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(Zeroizing::new(key)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for RandomFileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RandomFileKey").field(&"[REDACTED]").finish()
    }
}

/// Random file key plus the two salts generated alongside it.
#[derive(Debug)]
pub struct BackupKeyMaterial {
    pub random_file_key: RandomFileKey,
    pub file_salt: [u8; BACKUP_SALT_LEN],
    pub metadata_salt: [u8; BACKUP_SALT_LEN],
}

/// One XOR-fold: halve the buffer by XOR-ing the two halves together.
fn xor_fold(data: &[u8]) -> Vec<u8> {
    let half = data.len() / 2;
    (0..half).map(|i| data[i] ^ data[i + half]).collect()
}

/// Generate the per-backup key material from caller-collected entropy.
///
/// The entropy is XOR-folded three times and XOR-ed with fresh OS
/// randomness, so the result is no weaker than the stronger of the two
/// sources. The folded value must still be at least 80 bytes (48 bytes of
/// salt + 32 of password for the stretch), i.e. callers supply at least
/// 640 bytes of entropy.
#[instrument(level = "debug", skip_all, fields(entropy_len = entropy.len()))]
pub fn generate_backup_material(entropy: &[u8]) -> Result<BackupKeyMaterial, CryptoError> {
    let mut folded = Zeroizing::new(xor_fold(&xor_fold(&xor_fold(entropy))));
    if folded.len() < MIN_FOLDED_LEN {
        return Err(CryptoError::InsufficientEntropy {
            needed: MIN_FOLDED_LEN,
            actual: folded.len(),
        });
    }

    let mut fresh = Zeroizing::new(vec![0u8; folded.len()]);
    rand::rng().fill_bytes(&mut fresh);
    for (f, r) in folded.iter_mut().zip(fresh.iter()) {
        *f ^= r;
    }

    let stretched = kdf::derive_bytes(
        &folded[BACKUP_SALT_LEN..],
        &folded[..BACKUP_SALT_LEN],
        STRETCH_ITERATIONS,
        STRETCH_LEN,
    )?;

    let random_file_key = RandomFileKey::from_bytes(&stretched[..RANDOM_FILE_KEY_LEN])?;

    let mut file_salt = [0u8; BACKUP_SALT_LEN];
    let mut metadata_salt = [0u8; BACKUP_SALT_LEN];
    rand::rng().fill_bytes(&mut file_salt);
    rand::rng().fill_bytes(&mut metadata_salt);
    for i in 0..BACKUP_SALT_LEN {
        file_salt[i] ^= stretched[RANDOM_FILE_KEY_LEN + i];
        metadata_salt[i] ^= stretched[RANDOM_FILE_KEY_LEN + BACKUP_SALT_LEN + i];
    }

    Ok(BackupKeyMaterial {
        random_file_key,
        file_salt,
        metadata_salt,
    })
}

/// The 416-byte file key: content encryption blob + record key.
pub struct FileKey(Zeroizing<[u8; FILE_KEY_LEN]>);

impl FileKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; FILE_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: FILE_KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(Zeroizing::new(key)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    /// Blob for file-content encryption; HMAC key stops at the record key.
    pub fn content_key(&self) -> KeyBlob<'_> {
        KeyBlob::with_hmac_end(&self.0[..], RECORD_KEY_OFFSET).expect("file key layout is fixed")
    }

    /// Bytes `[224..)` as their own blob; binds filename, description and
    /// content tag into the record-integrity tag.
    pub fn record_key(&self) -> KeyBlob<'_> {
        KeyBlob::new(&self.0[RECORD_KEY_OFFSET..]).expect("file key layout is fixed")
    }
}

impl fmt::Debug for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileKey").field(&"[REDACTED]").finish()
    }
}

/// Derive the file key from the random file key and the master key.
#[instrument(level = "debug", skip_all)]
pub fn derive_file_key(
    random_file_key: &RandomFileKey,
    master_key: &MasterKey,
    file_salt: &[u8; BACKUP_SALT_LEN],
    iterations: u32,
) -> Result<FileKey, CryptoError> {
    let mut input = Zeroizing::new(Vec::with_capacity(
        FILE_KEY_RANDOM_END + master_key.file_part().len(),
    ));
    input.extend_from_slice(&random_file_key.as_bytes()[..FILE_KEY_RANDOM_END]);
    input.extend_from_slice(master_key.file_part());

    let derived = kdf::derive_bytes(&input, file_salt, iterations, FILE_KEY_LEN)?;
    FileKey::from_bytes(&derived)
}

/// The 672-byte metadata key: three 224-byte sub-keys.
pub struct MetadataKey(Zeroizing<[u8; METADATA_KEY_LEN]>);

impl MetadataKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; METADATA_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: METADATA_KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(Zeroizing::new(key)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    pub fn filename_key(&self) -> KeyBlob<'_> {
        self.subkey(0)
    }

    pub fn description_key(&self) -> KeyBlob<'_> {
        self.subkey(1)
    }

    pub fn integrity_key(&self) -> KeyBlob<'_> {
        self.subkey(2)
    }

    fn subkey(&self, index: usize) -> KeyBlob<'_> {
        let start = index * SUBKEY_LEN;
        KeyBlob::new(&self.0[start..start + SUBKEY_LEN]).expect("metadata key layout is fixed")
    }
}

impl fmt::Debug for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MetadataKey").field(&"[REDACTED]").finish()
    }
}

/// Derive the metadata key from the random file key and the master key.
#[instrument(level = "debug", skip_all)]
pub fn derive_metadata_key(
    random_file_key: &RandomFileKey,
    master_key: &MasterKey,
    metadata_salt: &[u8; BACKUP_SALT_LEN],
    iterations: u32,
) -> Result<MetadataKey, CryptoError> {
    let random_part = &random_file_key.as_bytes()[METADATA_RANDOM_OFFSET..];
    let mut input = Zeroizing::new(Vec::with_capacity(
        random_part.len() + master_key.metadata_part().len(),
    ));
    input.extend_from_slice(random_part);
    input.extend_from_slice(master_key.metadata_part());

    let derived = kdf::derive_bytes(&input, metadata_salt, iterations, METADATA_KEY_LEN)?;
    MetadataKey::from_bytes(&derived)
}
