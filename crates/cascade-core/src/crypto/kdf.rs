//! Argon2id key derivation and the derived-key-blob slicing shared by every
//! cascade mode.

use argon2::{Algorithm, Argon2, Params, Version};
use hmac::{Hmac, Mac};
use sha3::Sha3_512;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::CryptoError;

/// Argon2id parallelism. Fixed protocol constant.
pub const ARGON2_PARALLELISM: u32 = 1;

/// Argon2id memory cost in KiB. Fixed protocol constant.
pub const ARGON2_MEMORY_KIB: u32 = 512;

/// Length of the key blob derived for the salted cascade modes.
pub const CASCADE_KEY_LEN: usize = 416;

/// Length of an HMAC-SHA3-512 authentication tag.
pub const TAG_LEN: usize = 64;

/// Offset of the block-cipher key inside a derived key blob.
const BLOCK_KEY_OFFSET: usize = 64;

/// Offset of the HMAC key inside a derived key blob.
const HMAC_KEY_OFFSET: usize = 96;

type HmacSha3 = Hmac<Sha3_512>;

/// Derive `out_len` bytes from `password` and `salt` using Argon2id.
///
/// Parallelism and memory cost are fixed protocol constants; only the
/// iteration count and output length vary between call sites. The salt must
/// always travel with the ciphertext it protects, which the salted cascade
/// modes handle by prepending it to their output.
pub fn derive_bytes(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    out_len: usize,
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let params = Params::new(ARGON2_MEMORY_KIB, iterations, ARGON2_PARALLELISM, Some(out_len))
        .map_err(|e| CryptoError::InvalidKdfParams(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = Zeroizing::new(vec![0u8; out_len]);
    argon2
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(out)
}

/// Compute the HMAC-SHA3-512 tag the cascade carries in front of payloads.
pub fn compute_tag(hmac_key: &[u8], data: &[u8]) -> [u8; TAG_LEN] {
    let mut mac =
        <HmacSha3 as Mac>::new_from_slice(hmac_key).expect("HMAC accepts keys of any length");
    mac.update(data);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    tag
}

/// Constant-time tag comparison. A length mismatch is a mismatch.
pub fn tags_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// The 3-way slice every cascade key shares.
///
/// A derived key blob is consumed as `chacha_seed` (bytes 0..64),
/// `block_key` (64..96) and `hmac_key` (96 to the end of the blob). The one
/// exception is the 416-byte file key, whose HMAC key stops at byte 224
/// because the bytes beyond it form the record key; such blobs are built
/// with [`KeyBlob::with_hmac_end`].
///
/// Blobs borrow their backing buffer, so the owner controls zeroization.
#[derive(Clone, Copy)]
pub struct KeyBlob<'a> {
    bytes: &'a [u8],
    hmac_end: usize,
}

impl<'a> KeyBlob<'a> {
    /// Slice a blob out of `bytes`, using everything past byte 96 as the
    /// HMAC key.
    pub fn new(bytes: &'a [u8]) -> Result<Self, CryptoError> {
        Self::with_hmac_end(bytes, bytes.len())
    }

    /// Slice a blob out of `bytes` with the HMAC key ending at `hmac_end`.
    pub fn with_hmac_end(bytes: &'a [u8], hmac_end: usize) -> Result<Self, CryptoError> {
        if bytes.len() <= HMAC_KEY_OFFSET || hmac_end <= HMAC_KEY_OFFSET || hmac_end > bytes.len()
        {
            return Err(CryptoError::InvalidKeyLength {
                expected: HMAC_KEY_OFFSET + 1,
                actual: bytes.len().min(hmac_end),
            });
        }
        Ok(Self { bytes, hmac_end })
    }

    /// The 64-byte seed the ratcheting stream layer starts from.
    pub fn chacha_seed(&self) -> [u8; 64] {
        // Length guaranteed by the constructors.
        self.bytes[..BLOCK_KEY_OFFSET].try_into().unwrap()
    }

    /// The 32-byte Serpent key.
    pub fn block_key(&self) -> &[u8; 32] {
        self.bytes[BLOCK_KEY_OFFSET..HMAC_KEY_OFFSET]
            .try_into()
            .unwrap()
    }

    /// The HMAC-SHA3-512 key.
    pub fn hmac_key(&self) -> &[u8] {
        &self.bytes[HMAC_KEY_OFFSET..self.hmac_end]
    }
}

impl std::fmt::Debug for KeyBlob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyBlob")
            .field("len", &self.bytes.len())
            .field("hmac_end", &self.hmac_end)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_bytes_is_deterministic() {
        let a = derive_bytes(b"password", &[7u8; 32], 10, 96).unwrap();
        let b = derive_bytes(b"password", &[7u8; 32], 10, 96).unwrap();
        assert_eq!(*a, *b);
        assert_eq!(a.len(), 96);
    }

    #[test]
    fn derive_bytes_differs_by_salt() {
        let a = derive_bytes(b"password", &[7u8; 32], 10, 96).unwrap();
        let b = derive_bytes(b"password", &[8u8; 32], 10, 96).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn blob_slices_land_on_protocol_offsets() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(CASCADE_KEY_LEN).collect();
        let blob = KeyBlob::new(&bytes).unwrap();
        assert_eq!(blob.chacha_seed()[..], bytes[..64]);
        assert_eq!(blob.block_key()[..], bytes[64..96]);
        assert_eq!(blob.hmac_key(), &bytes[96..]);

        let capped = KeyBlob::with_hmac_end(&bytes, 224).unwrap();
        assert_eq!(capped.hmac_key(), &bytes[96..224]);
    }

    #[test]
    fn undersized_blob_is_rejected() {
        assert!(KeyBlob::new(&[0u8; 96]).is_err());
        assert!(KeyBlob::with_hmac_end(&[0u8; 416], 96).is_err());
        assert!(KeyBlob::with_hmac_end(&[0u8; 416], 500).is_err());
    }

    #[test]
    fn tags_match_requires_equal_length() {
        let tag = compute_tag(&[1u8; 32], b"data");
        assert!(tags_match(&tag, &tag));
        assert!(!tags_match(&tag, &tag[..32]));
    }
}
