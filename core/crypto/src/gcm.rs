//! Incremental AES-256-GCM.
//!
//! The one-shot `aes-gcm` API needs the whole message in memory. Streams are
//! processed chunk by chunk instead, so this module drives the GCM pieces
//! directly: AES-256 in 32-bit big-endian counter mode for the keystream and
//! GHASH for authentication. IVs of any whole-byte length are supported; for
//! anything other than 96 bits the pre-counter block J0 is derived through
//! GHASH as NIST SP 800-38D requires. Output is byte-for-byte identical to
//! `aes_gcm::AesGcm<Aes256, N>` for an IV of `N` bytes.
//!
//! Associated data must be supplied before any text; partial blocks are
//! buffered across calls in both phases.

use aes::cipher::{
    consts::U16, generic_array::GenericArray, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher,
};
use aes::Aes256;
use ghash::{universal_hash::UniversalHash, GHash};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::keys::SymmetricKey;
use streamseal_common::{Error, Result};

type Block = GenericArray<u8, U16>;
type Aes256Ctr32 = ctr::Ctr32BE<Aes256>;

/// GCM block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Largest tag GCM produces.
pub const FULL_TAG_LEN: usize = 16;

/// Most text one IV may protect: 2^39 - 256 bits.
pub const MAX_TEXT_LEN: u64 = (1 << 36) - 32;

/// Most associated data one IV may cover: 2^64 - 1 bits.
pub const MAX_AAD_LEN: u64 = (1 << 61) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Aad,
    Text,
}

/// A single-message GCM computation.
///
/// Created per message, fed associated data then text, and consumed by
/// [`GcmContext::finalize`] or [`GcmContext::verify`].
pub struct GcmContext {
    keystream: Aes256Ctr32,
    ghash: GHash,
    tag_mask: Block,
    pending: [u8; BLOCK_SIZE],
    pending_len: usize,
    aad_len: u64,
    text_len: u64,
    phase: Phase,
}

impl GcmContext {
    /// Set up GCM for `key` and `iv`.
    ///
    /// # Errors
    /// - `InvalidInput` if the IV is empty
    pub fn new(key: &SymmetricKey, iv: &[u8]) -> Result<Self> {
        if iv.is_empty() {
            return Err(Error::InvalidInput("GCM IV must not be empty".into()));
        }
        let key_bytes = GenericArray::from_slice(key.as_bytes());
        let cipher = Aes256::new(key_bytes);

        let mut hash_key = Block::default();
        cipher.encrypt_block(&mut hash_key);

        let j0 = pre_counter_block(&hash_key, iv);

        let mut tag_mask = j0;
        cipher.encrypt_block(&mut tag_mask);

        let mut first_counter = j0;
        let c = u32::from_be_bytes([j0[12], j0[13], j0[14], j0[15]]).wrapping_add(1);
        first_counter[12..].copy_from_slice(&c.to_be_bytes());

        let ctx = Self {
            keystream: Aes256Ctr32::new(key_bytes, &first_counter),
            ghash: GHash::new(&hash_key),
            tag_mask,
            pending: [0u8; BLOCK_SIZE],
            pending_len: 0,
            aad_len: 0,
            text_len: 0,
            phase: Phase::Aad,
        };
        hash_key.as_mut_slice().zeroize();
        Ok(ctx)
    }

    /// Authenticate `aad` without encrypting it.
    ///
    /// # Errors
    /// - `InvalidInput` if text has already been processed or the AAD limit
    ///   is exceeded
    pub fn update_aad(&mut self, aad: &[u8]) -> Result<()> {
        if self.phase != Phase::Aad {
            return Err(Error::InvalidInput(
                "associated data must precede the text".into(),
            ));
        }
        self.aad_len = self
            .aad_len
            .checked_add(aad.len() as u64)
            .filter(|&n| n <= MAX_AAD_LEN)
            .ok_or_else(|| Error::InvalidInput("associated data exceeds GCM limit".into()))?;
        self.absorb(aad);
        Ok(())
    }

    /// Encrypt `buf` in place.
    pub fn encrypt_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        self.begin_text(buf.len())?;
        self.apply_keystream(buf)?;
        self.absorb(buf);
        Ok(())
    }

    /// Decrypt `buf` in place.
    ///
    /// The returned plaintext is unauthenticated until [`GcmContext::verify`]
    /// succeeds.
    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) -> Result<()> {
        self.begin_text(buf.len())?;
        self.absorb(buf);
        self.apply_keystream(buf)
    }

    /// Finish the computation and return the first `tag_len` bytes of the tag.
    ///
    /// # Errors
    /// - `InvalidInput` if `tag_len` exceeds 16
    pub fn finalize(self, tag_len: usize) -> Result<Vec<u8>> {
        if tag_len > FULL_TAG_LEN {
            return Err(Error::InvalidInput(format!(
                "GCM tag is at most {} bytes, {} requested",
                FULL_TAG_LEN, tag_len
            )));
        }
        let mut tag = self.full_tag();
        let out = tag[..tag_len].to_vec();
        tag.as_mut_slice().zeroize();
        Ok(out)
    }

    /// Finish the computation and compare against `expected` in constant time.
    ///
    /// # Errors
    /// - `AuthenticationFailure` on mismatch or if `expected` is empty or
    ///   longer than 16 bytes
    pub fn verify(self, expected: &[u8]) -> Result<()> {
        if expected.is_empty() || expected.len() > FULL_TAG_LEN {
            return Err(Error::AuthenticationFailure);
        }
        let computed = self.full_tag();
        if bool::from(computed[..expected.len()].ct_eq(expected)) {
            Ok(())
        } else {
            Err(Error::AuthenticationFailure)
        }
    }

    fn begin_text(&mut self, len: usize) -> Result<()> {
        if self.phase == Phase::Aad {
            self.flush_padded();
            self.phase = Phase::Text;
        }
        self.text_len = self
            .text_len
            .checked_add(len as u64)
            .filter(|&n| n <= MAX_TEXT_LEN)
            .ok_or_else(|| Error::InvalidInput("message exceeds GCM limit".into()))?;
        Ok(())
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) -> Result<()> {
        self.keystream
            .try_apply_keystream(buf)
            .map_err(|_| Error::InvalidInput("GCM counter space exhausted".into()))
    }

    /// Feed bytes to GHASH, holding back a trailing partial block.
    fn absorb(&mut self, mut data: &[u8]) {
        if self.pending_len > 0 {
            let take = (BLOCK_SIZE - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < BLOCK_SIZE {
                return;
            }
            let block = Block::clone_from_slice(&self.pending);
            self.ghash.update(&[block]);
            self.pending_len = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK_SIZE);
        for chunk in &mut blocks {
            self.ghash.update(&[Block::clone_from_slice(chunk)]);
        }
        let rest = blocks.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    fn flush_padded(&mut self) {
        if self.pending_len > 0 {
            self.ghash.update_padded(&self.pending[..self.pending_len]);
            self.pending_len = 0;
        }
    }

    fn full_tag(mut self) -> Block {
        if self.phase == Phase::Aad {
            self.flush_padded();
            self.phase = Phase::Text;
        }
        self.flush_padded();

        let mut lengths = Block::default();
        lengths[..8].copy_from_slice(&(self.aad_len * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(self.text_len * 8).to_be_bytes());
        self.ghash.update(&[lengths]);

        let mut tag = self.ghash.clone().finalize();
        for (t, m) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *t ^= m;
        }
        tag
    }
}

impl Drop for GcmContext {
    fn drop(&mut self) {
        self.tag_mask.as_mut_slice().zeroize();
        self.pending.zeroize();
    }
}

/// Derive J0 from the IV.
fn pre_counter_block(hash_key: &Block, iv: &[u8]) -> Block {
    if iv.len() == 12 {
        let mut j0 = Block::default();
        j0[..12].copy_from_slice(iv);
        j0[15] = 1;
        return j0;
    }
    let mut ghash = GHash::new(hash_key);
    ghash.update_padded(iv);
    let mut lengths = Block::default();
    lengths[8..].copy_from_slice(&((iv.len() as u64) * 8).to_be_bytes());
    ghash.update(&[lengths]);
    ghash.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::consts::{U12, U64};
    use aes_gcm::aead::{Aead, Payload};
    use aes_gcm::AesGcm;

    fn seal(key: &SymmetricKey, iv: &[u8], aad: &[&[u8]], text: &[u8], step: usize) -> Vec<u8> {
        let mut ctx = GcmContext::new(key, iv).unwrap();
        for part in aad {
            ctx.update_aad(part).unwrap();
        }
        let mut out = text.to_vec();
        for chunk in out.chunks_mut(step) {
            ctx.encrypt_in_place(chunk).unwrap();
        }
        out.extend_from_slice(&ctx.finalize(16).unwrap());
        out
    }

    #[test]
    fn test_known_answer_empty() {
        // AES-256, zero key, zero 96-bit IV, no data.
        let key = SymmetricKey::from_bytes([0u8; 32]);
        let tag = GcmContext::new(&key, &[0u8; 12])
            .unwrap()
            .finalize(16)
            .unwrap();
        assert_eq!(hex::encode(tag), "530f8afbc74536b9a963b4f1c4cb738b");
    }

    #[test]
    fn test_known_answer_one_block() {
        let key = SymmetricKey::from_bytes([0u8; 32]);
        let out = seal(&key, &[0u8; 12], &[], &[0u8; 16], 16);
        assert_eq!(
            hex::encode(out),
            "cea7403d4d606b6e074ec5d3baf39d18d0d1c8a799996bf0265b98b5d48ab919"
        );
    }

    #[test]
    fn test_matches_reference_with_long_iv() {
        let key = SymmetricKey::from_bytes([0x42u8; 32]);
        let iv: Vec<u8> = (0..64u8).collect();
        let header = b"ivlen=512,taglen=16\n";
        let extra = b"caller aad";
        let text: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

        let mut aad = header.to_vec();
        aad.extend_from_slice(extra);
        let reference = AesGcm::<aes::Aes256, U64>::new_from_slice(key.as_bytes())
            .unwrap()
            .encrypt(
                GenericArray::from_slice(&iv),
                Payload {
                    msg: &text,
                    aad: &aad,
                },
            )
            .unwrap();

        // Odd step sizes exercise the partial-block buffering.
        for step in [1, 7, 16, 33, 1024] {
            assert_eq!(seal(&key, &iv, &[header, extra], &text, step), reference);
        }
    }

    #[test]
    fn test_matches_reference_with_standard_iv() {
        let key = SymmetricKey::from_bytes([9u8; 32]);
        let iv = [3u8; 12];
        let text = b"short message that is not block aligned";

        let reference = AesGcm::<aes::Aes256, U12>::new_from_slice(key.as_bytes())
            .unwrap()
            .encrypt(
                GenericArray::from_slice(&iv),
                Payload {
                    msg: text,
                    aad: b"hdr",
                },
            )
            .unwrap();

        assert_eq!(seal(&key, &iv, &[b"h", b"dr"], text, 5), reference);
    }

    #[test]
    fn test_decrypt_and_verify() {
        let key = SymmetricKey::from_bytes([1u8; 32]);
        let iv = [5u8; 64];
        let sealed = seal(&key, &iv, &[b"aad"], b"attack at dawn", 4);
        let (ct, tag) = sealed.split_at(sealed.len() - 16);

        let mut ctx = GcmContext::new(&key, &iv).unwrap();
        ctx.update_aad(b"aad").unwrap();
        let mut buf = ct.to_vec();
        ctx.decrypt_in_place(&mut buf).unwrap();
        assert_eq!(buf, b"attack at dawn");
        ctx.verify(tag).unwrap();
    }

    #[test]
    fn test_verify_truncated_tag() {
        let key = SymmetricKey::from_bytes([1u8; 32]);
        let iv = [5u8; 64];
        let tag = GcmContext::new(&key, &iv).unwrap().finalize(12).unwrap();
        assert_eq!(tag.len(), 12);
        GcmContext::new(&key, &iv).unwrap().verify(&tag).unwrap();
    }

    #[test]
    fn test_verify_rejects_wrong_tag() {
        let key = SymmetricKey::from_bytes([1u8; 32]);
        let iv = [5u8; 64];
        let mut tag = GcmContext::new(&key, &iv).unwrap().finalize(16).unwrap();
        tag[0] ^= 1;
        assert!(matches!(
            GcmContext::new(&key, &iv).unwrap().verify(&tag),
            Err(Error::AuthenticationFailure)
        ));
        assert!(GcmContext::new(&key, &iv).unwrap().verify(&[]).is_err());
    }

    #[test]
    fn test_aad_after_text_rejected() {
        let key = SymmetricKey::from_bytes([1u8; 32]);
        let mut ctx = GcmContext::new(&key, &[0u8; 16]).unwrap();
        ctx.encrypt_in_place(&mut [0u8; 4]).unwrap();
        assert!(ctx.update_aad(b"late").is_err());
    }

    #[test]
    fn test_empty_iv_rejected() {
        let key = SymmetricKey::from_bytes([1u8; 32]);
        assert!(GcmContext::new(&key, &[]).is_err());
    }

    #[test]
    fn test_oversized_tag_rejected() {
        let key = SymmetricKey::from_bytes([1u8; 32]);
        let ctx = GcmContext::new(&key, &[0u8; 12]).unwrap();
        assert!(ctx.finalize(17).is_err());
    }
}
