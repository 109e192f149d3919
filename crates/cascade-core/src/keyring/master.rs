//! Account-level key derivation and the session-held master key.
//!
//! Signing in derives 336 bytes from the password with Argon2id. The first
//! 64 bytes never leave this module except as the backend sign-in
//! credential; the remaining 272 bytes become the [`MasterKey`], which
//! lives only for the session and is zeroized on drop.

use std::fmt;

use cipher::generic_array::GenericArray;
use cipher::{BlockEncrypt, KeyInit};
use serpent::Serpent;
use sha2::{Digest, Sha512};
use tracing::instrument;
use whirlpool::Whirlpool;
use zeroize::Zeroizing;

use crate::crypto::{CryptoError, kdf};

/// Length of the session-held master key.
pub const MASTER_KEY_LEN: usize = 272;

/// Argon2id output length at sign-in: credential material + master key.
const ACCOUNT_DERIVED_LEN: usize = 336;

/// Iteration count bounds; the exact count is derived from the password.
pub const MIN_ITERATIONS: u32 = 1100;
pub const MAX_ITERATIONS: u32 = 1400;

/// Master-key slice offsets. Each purpose reads a fixed window so that no
/// two purposes expose identical password bytes to the cascade.
const FILE_PART_END: usize = 192;
const PROJECT_SECRET_OFFSET: usize = 114;
const SHARE_SECRET_OFFSET: usize = 180;

/// The 272-byte session master key.
///
/// # Security
///
/// The key is held in a `Zeroizing` buffer and erased when dropped. `Debug`
/// redacts the contents. It is never persisted; everything stored remotely
/// is ciphertext produced under one of its slices.
pub struct MasterKey(Zeroizing<[u8; MASTER_KEY_LEN]>);

impl MasterKey {
    /// Wrap raw key material, enforcing the exact protocol length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; MASTER_KEY_LEN] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: MASTER_KEY_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(Zeroizing::new(key)))
    }

    /// The full key; used as the cascade password for backup private
    /// fields and the KEM keyring.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }

    /// Bytes `[0..192)`; mixed into the file-key derivation.
    pub fn file_part(&self) -> &[u8] {
        &self.0[..FILE_PART_END]
    }

    /// Bytes `[192..272)`; mixed into the metadata-key derivation.
    pub fn metadata_part(&self) -> &[u8] {
        &self.0[FILE_PART_END..]
    }

    /// Bytes `[114..)`; cascade password for project records.
    pub fn project_secret(&self) -> &[u8] {
        &self.0[PROJECT_SECRET_OFFSET..]
    }

    /// Bytes `[180..)`; cascade password for sent-share bookkeeping copies.
    pub fn share_secret(&self) -> &[u8] {
        &self.0[SHARE_SECRET_OFFSET..]
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MasterKey").field(&"[REDACTED]").finish()
    }
}

/// Everything sign-in/sign-up derives from the email + password pair.
pub struct AccountMaterial {
    /// Hex credential presented to the hosting account system in place of
    /// the real password.
    pub auth_password: String,
    /// The session master key.
    pub master_key: MasterKey,
    /// Account iteration count, in `[MIN_ITERATIONS, MAX_ITERATIONS]`.
    pub iterations: u32,
}

impl fmt::Debug for AccountMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountMaterial")
            .field("auth_password", &"[REDACTED]")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

/// `Whirlpool(SHA-512(input))`, both digests consumed as raw bytes.
fn digest_chain(input: &[u8]) -> [u8; 64] {
    let sha = Sha512::digest(input);
    let mut out = [0u8; 64];
    out.copy_from_slice(&Whirlpool::digest(sha));
    out
}

/// Derive the account credential, master key and iteration count.
///
/// The Argon2id salt is `Whirlpool(SHA-512(email)) XOR
/// Whirlpool(SHA-512(password))` and the iteration count comes from the
/// password digest, so both are reproducible from the sign-in inputs alone
/// — nothing needs to be fetched before the first authentication request.
#[instrument(level = "debug", skip_all)]
pub fn derive_account(email: &str, password: &str) -> Result<AccountMaterial, CryptoError> {
    let email_digest = digest_chain(email.as_bytes());
    let password_digest = digest_chain(password.as_bytes());

    let digest_sum: u32 = password_digest.iter().map(|&b| u32::from(b)).sum();
    let iterations = MIN_ITERATIONS + digest_sum % (MAX_ITERATIONS - MIN_ITERATIONS + 1);

    let mut salt = [0u8; 64];
    for (s, (e, p)) in salt
        .iter_mut()
        .zip(email_digest.iter().zip(password_digest.iter()))
    {
        *s = e ^ p;
    }

    let derived = kdf::derive_bytes(
        password.as_bytes(),
        &salt,
        iterations,
        ACCOUNT_DERIVED_LEN,
    )?;

    // The account identifier is recovered by XOR-ing the first two 16-byte
    // words; it reaches the backend only Serpent-encrypted under the next
    // 32 bytes, hex-encoded.
    let mut account_id = Zeroizing::new([0u8; 16]);
    for i in 0..16 {
        account_id[i] = derived[i] ^ derived[16 + i];
    }
    let auth_cipher =
        Serpent::new_from_slice(&derived[32..64]).map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: 32,
        })?;
    let mut credential_block = GenericArray::clone_from_slice(account_id.as_slice());
    auth_cipher.encrypt_block(&mut credential_block);
    let auth_password = hex::encode(credential_block);

    let master_key = MasterKey::from_bytes(&derived[64..])?;

    Ok(AccountMaterial {
        auth_password,
        master_key,
        iterations,
    })
}

/// The explicit session-scoped secret state: master key + iteration count.
///
/// Different persistence domains deliberately run the cascade at different
/// iteration counts, all derived from the account count by fixed divisors.
/// Dropping the session (or calling [`SessionSecrets::logout`]) zeroizes
/// the key material.
#[derive(Debug)]
pub struct SessionSecrets {
    master_key: MasterKey,
    iterations: u32,
}

impl SessionSecrets {
    pub fn new(master_key: MasterKey, iterations: u32) -> Self {
        Self {
            master_key,
            iterations,
        }
    }

    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }

    /// The full account iteration count (file/metadata key derivation).
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Backup private fields.
    pub fn backup_iterations(&self) -> u32 {
        self.iterations / 3
    }

    /// Sent-share bookkeeping copies.
    pub fn share_copy_iterations(&self) -> u32 {
        self.iterations / 4
    }

    /// KEM private key at rest.
    pub fn keyring_iterations(&self) -> u32 {
        self.iterations / 9
    }

    /// Project records.
    pub fn project_iterations(&self) -> u32 {
        self.iterations / 10
    }

    /// End the session. Key material is zeroized as the handle drops.
    pub fn logout(self) {
        drop(self);
    }
}
