//! Self-re-keying ChaCha20 stream layer.
//!
//! The stream key evolves once per 256 KiB chunk:
//! `seed' = Whirlpool(SHA-512(hex(seed)))`. The SHA-512 step hashes the
//! lowercase-hex ASCII rendering of the seed, not its raw bytes. That
//! re-encoding is a compatibility-critical part of the wire format and must
//! not be "simplified" to hashing the raw seed.
//!
//! From each evolved seed, bytes 0..32 key ChaCha20 and bytes 32..40 form
//! the 64-bit nonce. Both directions regenerate the identical ratchet
//! sequence because it depends only on the evolving seed, never on the
//! data, so encryption and decryption are the same XOR.

use chacha20::ChaCha20Legacy;
use cipher::generic_array::GenericArray;
use cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha512};
use whirlpool::Whirlpool;
use zeroize::Zeroizing;

/// Bytes processed per ratchet step.
pub const STREAM_CHUNK_SIZE: usize = 256 * 1024;

/// A ratcheting stream cipher positioned at the start of a message.
///
/// The chunk-at-a-time API exists for cooperative scheduling: a caller may
/// stop between chunks and drop the cipher with no side effects beyond the
/// discarded partial output. Partial output must never be treated as valid.
pub struct RatchetingStream {
    seed: Zeroizing<[u8; 64]>,
}

impl RatchetingStream {
    pub fn new(seed: [u8; 64]) -> Self {
        Self {
            seed: Zeroizing::new(seed),
        }
    }

    /// Advance the seed by one ratchet step.
    fn ratchet(&mut self) {
        let hex_text = Zeroizing::new(hex::encode(self.seed.as_slice()));
        let sha = Sha512::digest(hex_text.as_bytes());
        let evolved = Whirlpool::digest(sha);
        self.seed.copy_from_slice(&evolved);
    }

    /// Encrypt or decrypt a single chunk in place, ratcheting first.
    ///
    /// Chunks must be fed in message order and, except for the final one,
    /// must be exactly [`STREAM_CHUNK_SIZE`] bytes, or the keystream will
    /// diverge from the other direction.
    pub fn process_chunk(&mut self, chunk: &mut [u8]) {
        debug_assert!(chunk.len() <= STREAM_CHUNK_SIZE);
        self.ratchet();
        let key = GenericArray::from_slice(&self.seed[..32]);
        let nonce = GenericArray::from_slice(&self.seed[32..40]);
        let mut cipher = ChaCha20Legacy::new(key, nonce);
        cipher.apply_keystream(chunk);
    }

    /// Process an entire buffer in place.
    pub fn process(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_mut(STREAM_CHUNK_SIZE) {
            self.process_chunk(chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_round_trips() {
        let seed = [42u8; 64];
        let mut data = vec![7u8; 1000];
        RatchetingStream::new(seed).process(&mut data);
        assert_ne!(data, vec![7u8; 1000]);
        RatchetingStream::new(seed).process(&mut data);
        assert_eq!(data, vec![7u8; 1000]);
    }

    #[test]
    fn whole_buffer_equals_chunk_at_a_time() {
        let seed = [3u8; 64];
        let mut whole = vec![0xabu8; STREAM_CHUNK_SIZE + 100];
        RatchetingStream::new(seed).process(&mut whole);

        let mut pieces = vec![0xabu8; STREAM_CHUNK_SIZE + 100];
        let mut stream = RatchetingStream::new(seed);
        let (first, rest) = pieces.split_at_mut(STREAM_CHUNK_SIZE);
        stream.process_chunk(first);
        stream.process_chunk(rest);
        assert_eq!(whole, pieces);
    }

    #[test]
    fn each_chunk_uses_a_fresh_key() {
        // Two identical chunks must not produce identical keystream.
        let seed = [0u8; 64];
        let mut data = vec![0u8; STREAM_CHUNK_SIZE * 2];
        RatchetingStream::new(seed).process(&mut data);
        assert_ne!(data[..STREAM_CHUNK_SIZE], data[STREAM_CHUNK_SIZE..]);
    }
}
