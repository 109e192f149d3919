//! The two-cipher cascade: ChaCha20 ratchet + Serpent CBC + HMAC-SHA3-512.
//!
//! Every mode produces the same inner structure,
//! `CBC(Stream(tag[64] ‖ payload))`, where `tag` is the HMAC-SHA3-512 of
//! the payload under the blob's HMAC key. The salted modes derive the key
//! blob from a password and prepend the 32-byte Argon2id salt; the key-blob
//! modes are keyed directly by an already-derived blob and carry no salt.
//!
//! Decryption reports integrity as a boolean, never as an error: callers
//! get the (untrusted) plaintext back either way and decide what to show.
//! Only structurally malformed input — a length that cannot have been
//! produced by the matching encryptor — is rejected up front, before any
//! key derivation runs.

use rand::RngCore;
use tracing::{instrument, warn};
use zeroize::Zeroizing;

use super::block::{BLOCK_SIZE, BlockLayer, LastBlock};
use super::kdf::{self, CASCADE_KEY_LEN, KeyBlob, TAG_LEN};
use super::ratchet::RatchetingStream;
use super::CryptoError;

/// Length of the Argon2id salt prepended by the salted modes.
pub const SALT_LEN: usize = 32;

/// Minimum block count past the encrypted IV: the 64-byte tag.
const TAG_BLOCKS: usize = TAG_LEN / BLOCK_SIZE;

// ---------------------------------------------------------------------------
// Salted modes (password + iteration count)
// ---------------------------------------------------------------------------

/// Encrypt arbitrary bytes in the free-length salted mode.
///
/// Output: `salt[32] ‖ ECB(IV)[16] ‖ CBC blocks`. A block-aligned inner
/// stream still gains a full padding block, so decryption always strips.
#[instrument(level = "trace", skip_all, fields(len = plaintext.len()))]
pub fn encrypt_data(
    plaintext: &[u8],
    password: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_salted(plaintext, password, iterations, true)
}

/// Encrypt fixed-length material (keys, salts) in the no-padding salted
/// mode: padding is applied only if the inner stream is not block-aligned,
/// and decryption passes the final block through untouched.
#[instrument(level = "trace", skip_all, fields(len = plaintext.len()))]
pub fn encrypt_data_without_padding(
    plaintext: &[u8],
    password: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, CryptoError> {
    encrypt_salted(plaintext, password, iterations, false)
}

/// Decrypt the free-length salted mode.
#[instrument(level = "trace", skip_all, fields(len = bytes.len()))]
pub fn decrypt_data(
    bytes: &[u8],
    password: &[u8],
    iterations: u32,
) -> Result<(Vec<u8>, bool), CryptoError> {
    decrypt_salted(bytes, password, iterations, LastBlock::Strip, TAG_BLOCKS + 1)
}

/// Decrypt the no-padding salted mode.
#[instrument(level = "trace", skip_all, fields(len = bytes.len()))]
pub fn decrypt_data_without_padding(
    bytes: &[u8],
    password: &[u8],
    iterations: u32,
) -> Result<(Vec<u8>, bool), CryptoError> {
    decrypt_salted(bytes, password, iterations, LastBlock::Keep, TAG_BLOCKS)
}

/// Encrypt only the HMAC tag of `reference` (record-tag-only mode).
///
/// Binds a set of already-stored fields together without re-encrypting
/// them; [`verify_reference_tag`] checks a candidate plaintext against it.
#[instrument(level = "trace", skip_all, fields(len = reference.len()))]
pub fn encrypt_reference_tag(
    reference: &[u8],
    password: &[u8],
    iterations: u32,
) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let derived = kdf::derive_bytes(password, &salt, iterations, CASCADE_KEY_LEN)?;
    let key = KeyBlob::new(&derived)?;

    let mut out = Vec::with_capacity(SALT_LEN + BLOCK_SIZE + TAG_LEN);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&encrypt_tag_body(reference, &key));
    Ok(out)
}

/// Recompute the tag of `reference` and compare it against the encrypted
/// tag in `bytes`. Mismatch (including a wrong decrypted length) is `false`.
#[instrument(level = "trace", skip_all, fields(len = bytes.len()))]
pub fn verify_reference_tag(
    bytes: &[u8],
    password: &[u8],
    iterations: u32,
    reference: &[u8],
) -> Result<bool, CryptoError> {
    check_layout(bytes, SALT_LEN, TAG_BLOCKS)?;
    let derived = kdf::derive_bytes(password, &bytes[..SALT_LEN], iterations, CASCADE_KEY_LEN)?;
    let key = KeyBlob::new(&derived)?;
    verify_tag_body(&bytes[SALT_LEN..], &key, reference)
}

// ---------------------------------------------------------------------------
// Key-blob modes (no salt; the blob itself is the secret)
// ---------------------------------------------------------------------------

/// Free-length encryption keyed directly by a derived key blob.
///
/// Output: `ECB(IV)[16] ‖ CBC blocks` — no salt prefix.
pub fn encrypt_with_key(plaintext: &[u8], key: &KeyBlob<'_>) -> Vec<u8> {
    let tag = kdf::compute_tag(key.hmac_key(), plaintext);
    encrypt_body(&tag, plaintext, key, true)
}

/// Decrypt the key-blob free-length mode.
pub fn decrypt_with_key(bytes: &[u8], key: &KeyBlob<'_>) -> Result<(Vec<u8>, bool), CryptoError> {
    check_layout(bytes, 0, TAG_BLOCKS + 1)?;
    decrypt_body(bytes, key, LastBlock::Strip)
}

/// Record-tag-only encryption keyed directly by a derived key blob.
pub fn encrypt_reference_tag_with_key(reference: &[u8], key: &KeyBlob<'_>) -> Vec<u8> {
    encrypt_tag_body(reference, key)
}

/// Verify a key-blob encrypted tag against a candidate plaintext.
pub fn verify_reference_tag_with_key(
    bytes: &[u8],
    key: &KeyBlob<'_>,
    reference: &[u8],
) -> Result<bool, CryptoError> {
    check_layout(bytes, 0, TAG_BLOCKS)?;
    verify_tag_body(bytes, key, reference)
}

/// Encrypt file content under a file-key blob, returning the ciphertext and
/// the detached plaintext tag used for record binding.
#[instrument(level = "trace", skip_all, fields(len = content.len()))]
pub fn encrypt_content(content: &[u8], key: &KeyBlob<'_>) -> (Vec<u8>, [u8; TAG_LEN]) {
    let tag = kdf::compute_tag(key.hmac_key(), content);
    let ciphertext = encrypt_body(&tag, content, key, true);
    (ciphertext, tag)
}

/// Decrypt file content encrypted by [`encrypt_content`].
#[instrument(level = "trace", skip_all, fields(len = bytes.len()))]
pub fn decrypt_content(bytes: &[u8], key: &KeyBlob<'_>) -> Result<(Vec<u8>, bool), CryptoError> {
    check_layout(bytes, 0, TAG_BLOCKS + 1)?;
    decrypt_body(bytes, key, LastBlock::Strip)
}

// ---------------------------------------------------------------------------
// Shared internals
// ---------------------------------------------------------------------------

fn encrypt_salted(
    plaintext: &[u8],
    password: &[u8],
    iterations: u32,
    force_padding: bool,
) -> Result<Vec<u8>, CryptoError> {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let derived = kdf::derive_bytes(password, &salt, iterations, CASCADE_KEY_LEN)?;
    let key = KeyBlob::new(&derived)?;

    let tag = kdf::compute_tag(key.hmac_key(), plaintext);
    let body = encrypt_body(&tag, plaintext, &key, force_padding);

    let mut out = Vec::with_capacity(SALT_LEN + body.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&body);
    Ok(out)
}

fn decrypt_salted(
    bytes: &[u8],
    password: &[u8],
    iterations: u32,
    last: LastBlock,
    min_blocks: usize,
) -> Result<(Vec<u8>, bool), CryptoError> {
    check_layout(bytes, SALT_LEN, min_blocks)?;
    let derived = kdf::derive_bytes(password, &bytes[..SALT_LEN], iterations, CASCADE_KEY_LEN)?;
    let key = KeyBlob::new(&derived)?;
    decrypt_body(&bytes[SALT_LEN..], &key, last)
}

/// Inner structure shared by every encrypting mode:
/// stream-encrypt `tag ‖ payload`, then CBC the result.
fn encrypt_body(tag: &[u8; TAG_LEN], payload: &[u8], key: &KeyBlob<'_>, force: bool) -> Vec<u8> {
    let mut stream_data = Zeroizing::new(Vec::with_capacity(TAG_LEN + payload.len()));
    stream_data.extend_from_slice(tag);
    stream_data.extend_from_slice(payload);
    RatchetingStream::new(key.chacha_seed()).process(&mut stream_data);
    BlockLayer::new(key.block_key()).encrypt(&stream_data, force)
}

fn encrypt_tag_body(reference: &[u8], key: &KeyBlob<'_>) -> Vec<u8> {
    let mut tag = kdf::compute_tag(key.hmac_key(), reference);
    RatchetingStream::new(key.chacha_seed()).process(&mut tag);
    BlockLayer::new(key.block_key()).encrypt(&tag, false)
}

/// `body` is `ECB(IV) ‖ CBC blocks`. Returns the payload and the tag
/// verdict.
fn decrypt_body(
    body: &[u8],
    key: &KeyBlob<'_>,
    last: LastBlock,
) -> Result<(Vec<u8>, bool), CryptoError> {
    let mut data = BlockLayer::new(key.block_key()).decrypt(body, last)?;
    RatchetingStream::new(key.chacha_seed()).process(&mut data);

    if data.len() < TAG_LEN {
        // Only reachable on tampered input whose padding stripped below the
        // tag length; report it as an integrity failure, not an error.
        warn!(len = data.len(), "decrypted stream shorter than the tag");
        return Ok((Vec::new(), false));
    }

    let (tag, payload) = data.split_at(TAG_LEN);
    let computed = kdf::compute_tag(key.hmac_key(), payload);
    let ok = kdf::tags_match(tag, &computed);
    Ok((payload.to_vec(), ok))
}

fn verify_tag_body(
    body: &[u8],
    key: &KeyBlob<'_>,
    reference: &[u8],
) -> Result<bool, CryptoError> {
    let mut decrypted = BlockLayer::new(key.block_key()).decrypt(body, LastBlock::Keep)?;
    RatchetingStream::new(key.chacha_seed()).process(&mut decrypted);
    let computed = kdf::compute_tag(key.hmac_key(), reference);
    Ok(kdf::tags_match(&decrypted, &computed))
}

/// Reject input no encryptor of the given mode could have produced.
fn check_layout(bytes: &[u8], salt_len: usize, min_blocks: usize) -> Result<(), CryptoError> {
    let min_len = salt_len + BLOCK_SIZE + min_blocks * BLOCK_SIZE;
    if bytes.len() < min_len {
        return Err(CryptoError::MalformedCiphertext {
            reason: format!("{} bytes, need at least {min_len}", bytes.len()),
        });
    }
    if (bytes.len() - salt_len) % BLOCK_SIZE != 0 {
        return Err(CryptoError::MalformedCiphertext {
            reason: format!(
                "{} bytes past the salt is not a multiple of {BLOCK_SIZE}",
                bytes.len() - salt_len
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITERATIONS: u32 = 10;

    fn blob_bytes() -> Vec<u8> {
        (0u8..=255).cycle().take(224).collect()
    }

    #[test]
    fn free_length_round_trip() {
        let ct = encrypt_data(b"payload", b"password", ITERATIONS).unwrap();
        let (pt, ok) = decrypt_data(&ct, b"password", ITERATIONS).unwrap();
        assert!(ok);
        assert_eq!(pt, b"payload");
    }

    #[test]
    fn empty_payload_round_trip() {
        let ct = encrypt_data(b"", b"password", ITERATIONS).unwrap();
        // salt + encrypted IV + 4 tag blocks + forced padding block
        assert_eq!(ct.len(), SALT_LEN + BLOCK_SIZE + TAG_LEN + BLOCK_SIZE);
        let (pt, ok) = decrypt_data(&ct, b"password", ITERATIONS).unwrap();
        assert!(ok);
        assert!(pt.is_empty());
    }

    #[test]
    fn aligned_payload_gets_full_padding_block() {
        // 64-byte payload: tag + payload = 128 bytes, already aligned.
        let ct = encrypt_data(&[7u8; 64], b"password", ITERATIONS).unwrap();
        assert_eq!(ct.len(), SALT_LEN + BLOCK_SIZE + 128 + BLOCK_SIZE);
        let (pt, ok) = decrypt_data(&ct, b"password", ITERATIONS).unwrap();
        assert!(ok);
        assert_eq!(pt, [7u8; 64]);
    }

    #[test]
    fn no_padding_mode_keeps_aligned_length() {
        let material = [0xa5u8; 48];
        let ct = encrypt_data_without_padding(&material, b"password", ITERATIONS).unwrap();
        assert_eq!(ct.len(), SALT_LEN + BLOCK_SIZE + TAG_LEN + 48);
        let (pt, ok) = decrypt_data_without_padding(&ct, b"password", ITERATIONS).unwrap();
        assert!(ok);
        assert_eq!(pt, material);
    }

    #[test]
    fn wrong_password_fails_integrity_but_returns_bytes() {
        let ct = encrypt_data(b"payload", b"password", ITERATIONS).unwrap();
        let (_, ok) = decrypt_data(&ct, b"wrong", ITERATIONS).unwrap();
        assert!(!ok);
    }

    #[test]
    fn bit_flips_fail_integrity() {
        let ct = encrypt_data(b"some payload bytes", b"password", ITERATIONS).unwrap();
        for index in [SALT_LEN, SALT_LEN + BLOCK_SIZE, ct.len() - 1] {
            let mut tampered = ct.clone();
            tampered[index] ^= 0x01;
            let (_, ok) = decrypt_data(&tampered, b"password", ITERATIONS).unwrap();
            assert!(!ok, "flip at {index} passed integrity");
        }
    }

    #[test]
    fn salt_flip_changes_key_and_fails_integrity() {
        let ct = encrypt_data(b"payload", b"password", ITERATIONS).unwrap();
        let mut tampered = ct.clone();
        tampered[0] ^= 0x80;
        let (_, ok) = decrypt_data(&tampered, b"password", ITERATIONS).unwrap();
        assert!(!ok);
    }

    #[test]
    fn outputs_differ_by_salt_and_iv() {
        let a = encrypt_data(b"hello", b"password", ITERATIONS).unwrap();
        let b = encrypt_data(b"hello", b"password", ITERATIONS).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_lengths_are_structural_errors() {
        assert!(matches!(
            decrypt_data(&[0u8; 47], b"password", ITERATIONS),
            Err(CryptoError::MalformedCiphertext { .. })
        ));
        // Right salt, misaligned remainder.
        assert!(matches!(
            decrypt_data(&[0u8; SALT_LEN + 130], b"password", ITERATIONS),
            Err(CryptoError::MalformedCiphertext { .. })
        ));
    }

    #[test]
    fn reference_tag_round_trip() {
        let reference = b"bound fields";
        let ct = encrypt_reference_tag(reference, b"password", ITERATIONS).unwrap();
        assert_eq!(ct.len(), SALT_LEN + BLOCK_SIZE + TAG_LEN);
        assert!(verify_reference_tag(&ct, b"password", ITERATIONS, reference).unwrap());
        assert!(!verify_reference_tag(&ct, b"password", ITERATIONS, b"other").unwrap());
        assert!(!verify_reference_tag(&ct, b"wrong", ITERATIONS, reference).unwrap());
    }

    #[test]
    fn key_blob_mode_round_trip() {
        let bytes = blob_bytes();
        let key = KeyBlob::new(&bytes).unwrap();
        let ct = encrypt_with_key(b"metadata value", &key);
        let (pt, ok) = decrypt_with_key(&ct, &key).unwrap();
        assert!(ok);
        assert_eq!(pt, b"metadata value");

        let mut tampered = ct;
        tampered[20] ^= 0xff;
        let (_, ok) = decrypt_with_key(&tampered, &key).unwrap();
        assert!(!ok);
    }

    #[test]
    fn key_blob_tag_round_trip() {
        let bytes = blob_bytes();
        let key = KeyBlob::new(&bytes).unwrap();
        let ct = encrypt_reference_tag_with_key(b"reference", &key);
        assert_eq!(ct.len(), BLOCK_SIZE + TAG_LEN);
        assert!(verify_reference_tag_with_key(&ct, &key, b"reference").unwrap());
        assert!(!verify_reference_tag_with_key(&ct, &key, b"tampered").unwrap());
    }

    #[test]
    fn content_mode_returns_matching_detached_tag() {
        let bytes: Vec<u8> = (0u8..=255).cycle().take(416).collect();
        let key = KeyBlob::with_hmac_end(&bytes, 224).unwrap();
        let content = vec![0x42u8; 1000];
        let (ct, tag) = encrypt_content(&content, &key);
        assert_eq!(tag, kdf::compute_tag(key.hmac_key(), &content));
        let (pt, ok) = decrypt_content(&ct, &key).unwrap();
        assert!(ok);
        assert_eq!(pt, content);
    }

    #[test]
    fn multi_chunk_content_round_trip() {
        let bytes: Vec<u8> = (1u8..=208).cycle().take(416).collect();
        let key = KeyBlob::with_hmac_end(&bytes, 224).unwrap();
        let content: Vec<u8> = (0u8..=255).cycle().take(300 * 1024).collect();
        let (ct, _) = encrypt_content(&content, &key);
        let (pt, ok) = decrypt_content(&ct, &key).unwrap();
        assert!(ok);
        assert_eq!(pt, content);
    }
}
