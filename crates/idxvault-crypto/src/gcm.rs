//! Incremental AES-256-GCM (96-bit nonce, empty AAD).
//!
//! `aes-gcm` only exposes one-shot sealing, so the stream codec drives the
//! same primitives directly: CTR32-BE keystream starting at `nonce || 2`,
//! GHASH over the ciphertext, tag = GHASH ⊕ E_K(nonce || 1).

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use subtle::ConstantTimeEq;

use idxvault_core::{IdxError, IdxResult};

use crate::key::IndexKey;
use crate::{NONCE_SIZE, TAG_SIZE};

type Aes256Ctr32 = ctr::Ctr32BE<Aes256>;

const BLOCK: usize = 16;

/// GCM caps a single message at 2^32 - 2 blocks.
const MAX_MESSAGE_LEN: u64 = ((1u64 << 32) - 2) * BLOCK as u64;

/// Keystream half of GCM.
pub(crate) struct GcmCipher {
    ctr: Aes256Ctr32,
}

/// Authentication half of GCM: GHASH over ciphertext of arbitrary chunking.
pub(crate) struct GcmMac {
    ghash: GHash,
    tag_mask: [u8; TAG_SIZE],
    pending: [u8; BLOCK],
    pending_len: usize,
    message_len: u64,
}

pub(crate) fn init(key: &IndexKey, nonce: &[u8; NONCE_SIZE]) -> (GcmCipher, GcmMac) {
    let aes = Aes256::new(GenericArray::from_slice(key.as_bytes()));

    let mut h = ghash::Block::default();
    aes.encrypt_block(&mut h);

    let mut j0 = ghash::Block::default();
    j0[..NONCE_SIZE].copy_from_slice(nonce);
    j0[BLOCK - 1] = 1;
    aes.encrypt_block(&mut j0);
    let mut tag_mask = [0u8; TAG_SIZE];
    tag_mask.copy_from_slice(&j0);

    let mut iv = [0u8; BLOCK];
    iv[..NONCE_SIZE].copy_from_slice(nonce);
    iv[BLOCK - 1] = 2;
    let ctr = Aes256Ctr32::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(&iv),
    );

    let mac = GcmMac {
        ghash: GHash::new(&h),
        tag_mask,
        pending: [0u8; BLOCK],
        pending_len: 0,
        message_len: 0,
    };
    (GcmCipher { ctr }, mac)
}

impl GcmCipher {
    pub(crate) fn apply(&mut self, buf: &mut [u8]) {
        self.ctr.apply_keystream(buf);
    }
}

impl GcmMac {
    /// Feed ciphertext bytes. Chunk boundaries need not be block-aligned.
    pub(crate) fn absorb(&mut self, mut data: &[u8]) -> IdxResult<()> {
        self.message_len += data.len() as u64;
        if self.message_len > MAX_MESSAGE_LEN {
            return Err(IdxError::MalformedFrame(
                "stream exceeds the AES-GCM single-message limit".into(),
            ));
        }

        if self.pending_len > 0 {
            let take = (BLOCK - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < BLOCK {
                return Ok(());
            }
            self.ghash
                .update(&[ghash::Block::clone_from_slice(&self.pending)]);
            self.pending_len = 0;
        }

        let mut blocks = data.chunks_exact(BLOCK);
        for block in &mut blocks {
            self.ghash.update(&[ghash::Block::clone_from_slice(block)]);
        }
        let rest = blocks.remainder();
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
        Ok(())
    }

    pub(crate) fn finalize(mut self) -> [u8; TAG_SIZE] {
        if self.pending_len > 0 {
            self.ghash.update_padded(&self.pending[..self.pending_len]);
        }
        // len(AAD) = 0 || len(C), both in bits
        let mut lengths = [0u8; BLOCK];
        lengths[8..].copy_from_slice(&(self.message_len * 8).to_be_bytes());
        self.ghash.update(&[ghash::Block::clone_from_slice(&lengths)]);

        let s = self.ghash.finalize();
        let mut tag = [0u8; TAG_SIZE];
        for (i, b) in tag.iter_mut().enumerate() {
            *b = s[i] ^ self.tag_mask[i];
        }
        tag
    }

    /// Constant-time comparison against a received tag.
    pub(crate) fn verify(self, received: &[u8; TAG_SIZE]) -> bool {
        let expected = self.finalize();
        bool::from(expected.ct_eq(received))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // McGrew/Viega GCM test case 15 (AES-256, 96-bit IV, no AAD).
    const KEY: &str = "feffe9928665731c6d6a8f9467308308feffe9928665731c6d6a8f9467308308";
    const IV: &str = "cafebabefacedbaddecaf888";
    const PT: &str = "d9313225f88406e5a55909c5aff5269a86a7a9531534f7da2e4c303d8a318a721c3c0c95956809532fcf0e2449a6b525b16aedf5aa0de657ba637b391aafd255";
    const CT: &str = "522dc1f099567d07f47f37a32a84427d643a8cdcbfe5c0c97598a2bd2555d1aa8cb08e48590dbb3da7b08b1056828838c5f61e6393ba7a0abcc9f662898015ad";
    const TAG: &str = "b094dac5d93471bdec1a502270e3cc6c";

    fn hex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn vector_key() -> IndexKey {
        IndexKey::from_slice(&hex(KEY)).unwrap()
    }

    fn vector_nonce() -> [u8; NONCE_SIZE] {
        hex(IV).try_into().unwrap()
    }

    #[test]
    fn test_known_answer_whole_message() {
        let (mut cipher, mut mac) = init(&vector_key(), &vector_nonce());
        let mut buf = hex(PT);
        cipher.apply(&mut buf);
        mac.absorb(&buf).unwrap();

        assert_eq!(buf, hex(CT));
        assert_eq!(mac.finalize().to_vec(), hex(TAG));
    }

    #[test]
    fn test_known_answer_odd_chunking() {
        let (mut cipher, mut mac) = init(&vector_key(), &vector_nonce());
        let mut buf = hex(PT);
        // 1, 2, 3, ... byte slices: none block-aligned
        let mut offset = 0;
        let mut step = 1;
        while offset < buf.len() {
            let end = (offset + step).min(buf.len());
            cipher.apply(&mut buf[offset..end]);
            mac.absorb(&buf[offset..end]).unwrap();
            offset = end;
            step += 1;
        }

        assert_eq!(buf, hex(CT));
        let tag: [u8; TAG_SIZE] = hex(TAG).try_into().unwrap();
        assert!(mac.verify(&tag));
    }

    #[test]
    fn test_empty_message_tag() {
        // Empty plaintext still has a well-defined tag; flipping it must fail.
        let (_, mac) = init(&vector_key(), &vector_nonce());
        let mut tag = mac.finalize();
        let (_, mac) = init(&vector_key(), &vector_nonce());
        assert!(mac.verify(&tag));

        tag[0] ^= 1;
        let (_, mac) = init(&vector_key(), &vector_nonce());
        assert!(!mac.verify(&tag));
    }
}
