//! ML-KEM-1024 sealing of capability tags.
//!
//! The sender encapsulates a fresh shared secret to the recipient's public
//! key and encrypts the packed capability tag under it with the cascade.
//! The secret is already high-entropy, so the Argon2id pass inside the
//! cascade runs at a fixed low iteration count; it is a formality there,
//! not the primary KDF.
//!
//! Recipients keep their ML-KEM private key in the remote keyring,
//! encrypted under their own master key, and decrypt it only long enough
//! to decapsulate.

use std::fmt;

use libcrux_ml_kem::mlkem1024::{self, MlKem1024Ciphertext, MlKem1024PrivateKey, MlKem1024PublicKey};
use rand::RngCore;
use thiserror::Error;
use tracing::{instrument, warn};
use zeroize::Zeroizing;

use crate::crypto::CryptoError;
use crate::crypto::cascade;
use crate::keyring::master::SessionSecrets;

use super::tag::{CapabilityTag, TagError};

/// Fixed cascade iteration count for tag encryption under a KEM secret.
pub const SHARE_TAG_ITERATIONS: u32 = 125;

/// ML-KEM-1024 encapsulation key length.
pub const KEM_PUBLIC_KEY_LEN: usize = 1568;

/// ML-KEM-1024 decapsulation key length.
pub const KEM_PRIVATE_KEY_LEN: usize = 3168;

/// ML-KEM-1024 ciphertext length.
pub const KEM_CIPHERTEXT_LEN: usize = 1568;

/// Errors that can occur in the sharing protocol.
///
/// # Security Classification
///
/// `TagIntegrity` and every `Tag` variant mean the received capability must
/// be rejected outright — a capability is never partially honored.
#[derive(Error, Debug)]
pub enum ShareError {
    /// KEM key or ciphertext material has the wrong length.
    #[error("Invalid KEM {component}: expected {expected} bytes, got {actual}")]
    InvalidKemMaterial {
        component: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The encrypted tag decrypted but failed its integrity check.
    #[error("Shared capability tag failed integrity verification")]
    TagIntegrity,

    /// The decrypted tag failed structural validation.
    #[error(transparent)]
    Tag(#[from] TagError),

    /// The underlying cascade rejected the ciphertext or parameters.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// An ML-KEM-1024 keypair generated at account creation.
pub struct ShareKeyPair {
    public_key: Vec<u8>,
    private_key: Zeroizing<Vec<u8>>,
}

impl ShareKeyPair {
    /// Generate a fresh keypair from OS randomness.
    pub fn generate() -> Self {
        let mut randomness = [0u8; 64];
        rand::rng().fill_bytes(&mut randomness);
        let pair = mlkem1024::generate_key_pair(randomness);
        Self {
            public_key: pair.public_key().as_slice().to_vec(),
            private_key: Zeroizing::new(pair.private_key().as_slice().to_vec()),
        }
    }

    /// The encapsulation key, published to the store as-is.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The decapsulation key; persist only through [`seal_private_key`].
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl fmt::Debug for ShareKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareKeyPair")
            .field("public_key_len", &self.public_key.len())
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// What the sender stores in the recipient's inbox.
#[derive(Debug)]
pub struct SealedCapability {
    pub encrypted_tag: Vec<u8>,
    pub kem_ciphertext: Vec<u8>,
}

/// Encrypt the ML-KEM private key for the remote keyring.
///
/// Uses the no-padding cascade mode under the full master key at the
/// keyring iteration count.
#[instrument(level = "debug", skip_all)]
pub fn seal_private_key(
    private_key: &[u8],
    secrets: &SessionSecrets,
) -> Result<Vec<u8>, ShareError> {
    if private_key.len() != KEM_PRIVATE_KEY_LEN {
        return Err(ShareError::InvalidKemMaterial {
            component: "private key",
            expected: KEM_PRIVATE_KEY_LEN,
            actual: private_key.len(),
        });
    }
    Ok(cascade::encrypt_data_without_padding(
        private_key,
        secrets.master_key().as_bytes(),
        secrets.keyring_iterations(),
    )?)
}

/// Decrypt the ML-KEM private key fetched from the remote keyring.
///
/// The integrity verdict is returned alongside the bytes; a `false`
/// verdict means the keyring entry was tampered with and the key must not
/// be used for decapsulation.
#[instrument(level = "debug", skip_all)]
pub fn open_private_key(
    ciphertext: &[u8],
    secrets: &SessionSecrets,
) -> Result<(Zeroizing<Vec<u8>>, bool), ShareError> {
    let (bytes, ok) = cascade::decrypt_data_without_padding(
        ciphertext,
        secrets.master_key().as_bytes(),
        secrets.keyring_iterations(),
    )?;
    Ok((Zeroizing::new(bytes), ok))
}

/// Seal a capability tag to a recipient's public key.
#[instrument(level = "debug", skip_all, fields(backup = tag.backup_id()))]
pub fn seal_capability(
    tag: &CapabilityTag,
    recipient_public_key: &[u8],
) -> Result<SealedCapability, ShareError> {
    let public_key =
        MlKem1024PublicKey::try_from(recipient_public_key).map_err(|_| {
            ShareError::InvalidKemMaterial {
                component: "public key",
                expected: KEM_PUBLIC_KEY_LEN,
                actual: recipient_public_key.len(),
            }
        })?;

    let mut randomness = [0u8; 32];
    rand::rng().fill_bytes(&mut randomness);
    let (kem_ciphertext, shared_secret) = mlkem1024::encapsulate(&public_key, randomness);
    let shared_secret = Zeroizing::new(shared_secret);

    let packed = tag.pack();
    let encrypted_tag = cascade::encrypt_data(&packed, &shared_secret[..], SHARE_TAG_ITERATIONS)?;

    Ok(SealedCapability {
        encrypted_tag,
        kem_ciphertext: kem_ciphertext.as_slice().to_vec(),
    })
}

/// Open a sealed capability with the recipient's ML-KEM private key.
///
/// Rejects outright on an integrity failure or any tag-validation
/// violation; a partially valid capability is never returned.
#[instrument(level = "debug", skip_all)]
pub fn open_capability(
    sealed: &SealedCapability,
    private_key: &[u8],
) -> Result<CapabilityTag, ShareError> {
    let private_key =
        MlKem1024PrivateKey::try_from(private_key).map_err(|_| ShareError::InvalidKemMaterial {
            component: "private key",
            expected: KEM_PRIVATE_KEY_LEN,
            actual: private_key.len(),
        })?;
    let kem_ciphertext = MlKem1024Ciphertext::try_from(sealed.kem_ciphertext.as_slice()).map_err(
        |_| ShareError::InvalidKemMaterial {
            component: "ciphertext",
            expected: KEM_CIPHERTEXT_LEN,
            actual: sealed.kem_ciphertext.len(),
        },
    )?;

    let shared_secret = Zeroizing::new(mlkem1024::decapsulate(&private_key, &kem_ciphertext));

    let (packed, ok) =
        cascade::decrypt_data(&sealed.encrypted_tag, &shared_secret[..], SHARE_TAG_ITERATIONS)?;
    let packed = Zeroizing::new(packed);
    if !ok {
        warn!("sealed capability failed integrity; rejecting");
        return Err(ShareError::TagIntegrity);
    }

    Ok(CapabilityTag::unpack(&packed)?)
}

/// Encrypt the sender's private bookkeeping copy of a shared tag.
#[instrument(level = "debug", skip_all)]
pub fn seal_sent_copy(
    tag: &CapabilityTag,
    secrets: &SessionSecrets,
) -> Result<Vec<u8>, ShareError> {
    let packed = tag.pack();
    Ok(cascade::encrypt_data(
        &packed,
        secrets.master_key().share_secret(),
        secrets.share_copy_iterations(),
    )?)
}

/// Decrypt a sent-copy tag for the sharing history view.
#[instrument(level = "debug", skip_all)]
pub fn open_sent_copy(
    ciphertext: &[u8],
    secrets: &SessionSecrets,
) -> Result<CapabilityTag, ShareError> {
    let (packed, ok) = cascade::decrypt_data(
        ciphertext,
        secrets.master_key().share_secret(),
        secrets.share_copy_iterations(),
    )?;
    let packed = Zeroizing::new(packed);
    if !ok {
        return Err(ShareError::TagIntegrity);
    }
    Ok(CapabilityTag::unpack(&packed)?)
}
