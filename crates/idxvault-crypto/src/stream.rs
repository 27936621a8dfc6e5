//! Streaming codec: plaintext stream ⇄ `[nonce][ciphertext][tag]` frame
//!
//! Both directions are plain state machines behind [`StreamCodec`]; the
//! async [`crate::pipe`] driver connects them to readers and writers.
//!
//! Decoding cannot tell where the tag starts until the input ends, so every
//! byte after the nonce is retained until [`StreamCodec::finish`]. The tag
//! is then cut from the tail of the retained chunks, checked against the
//! GHASH of everything before it, and only after a match is the ciphertext
//! decrypted and released. Memory use for decode therefore scales with the
//! archive size.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};
use rand::RngCore;
use tracing::{error, trace};

use idxvault_core::{IdxError, IdxResult};

use crate::gcm::{self, GcmCipher, GcmMac};
use crate::key::IndexKey;
use crate::{FRAME_OVERHEAD, NONCE_SIZE, TAG_SIZE};

/// A chunk-in, chunks-out transform.
///
/// `feed` may emit zero or more output chunks per input chunk; `finish`
/// emits whatever remains or fails. Neither may be called after `finish`.
pub trait StreamCodec {
    fn feed(&mut self, chunk: BytesMut) -> IdxResult<Vec<Bytes>>;
    fn finish(&mut self) -> IdxResult<Vec<Bytes>>;
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Encrypting half. Emits the nonce first, equal-length ciphertext per
/// chunk, and the tag on `finish`.
pub struct EncryptStream {
    state: EncState,
}

enum EncState {
    /// Nonce not yet emitted
    Start {
        nonce: [u8; NONCE_SIZE],
        cipher: GcmCipher,
        mac: GcmMac,
    },
    Body {
        cipher: GcmCipher,
        mac: GcmMac,
    },
    Done,
}

impl EncryptStream {
    /// New encoder with a fresh random nonce.
    pub fn new(key: &IndexKey) -> Self {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Self::with_nonce(key, nonce)
    }

    /// New encoder with a caller-chosen nonce. Reusing a nonce with the same
    /// key breaks confidentiality; intended for fixtures and interop tests.
    pub fn with_nonce(key: &IndexKey, nonce: [u8; NONCE_SIZE]) -> Self {
        let (cipher, mac) = gcm::init(key, &nonce);
        Self {
            state: EncState::Start { nonce, cipher, mac },
        }
    }

    fn take_header(&mut self, out: &mut Vec<Bytes>) -> IdxResult<(GcmCipher, GcmMac)> {
        match std::mem::replace(&mut self.state, EncState::Done) {
            EncState::Start { nonce, cipher, mac } => {
                out.push(Bytes::copy_from_slice(&nonce));
                Ok((cipher, mac))
            }
            EncState::Body { cipher, mac } => Ok((cipher, mac)),
            EncState::Done => Err(IdxError::MalformedFrame(
                "encrypt stream used after finish".into(),
            )),
        }
    }
}

impl StreamCodec for EncryptStream {
    fn feed(&mut self, mut chunk: BytesMut) -> IdxResult<Vec<Bytes>> {
        let mut out = Vec::with_capacity(2);
        let (mut cipher, mut mac) = self.take_header(&mut out)?;
        if !chunk.is_empty() {
            cipher.apply(&mut chunk);
            mac.absorb(&chunk)?;
            out.push(chunk.freeze());
        }
        self.state = EncState::Body { cipher, mac };
        Ok(out)
    }

    fn finish(&mut self) -> IdxResult<Vec<Bytes>> {
        let mut out = Vec::with_capacity(2);
        let (_, mac) = self.take_header(&mut out)?;
        out.push(Bytes::copy_from_slice(&mac.finalize()));
        Ok(out)
    }
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decrypting half. Emits nothing from `feed`; all plaintext is released by
/// `finish` once the tag has been verified.
pub struct DecryptStream {
    key: IndexKey,
    state: DecState,
}

enum DecState {
    Nonce {
        buf: [u8; NONCE_SIZE],
        filled: usize,
    },
    Body {
        cipher: GcmCipher,
        mac: GcmMac,
        chunks: VecDeque<BytesMut>,
        buffered: u64,
    },
    Done,
}

impl DecryptStream {
    pub fn new(key: &IndexKey) -> Self {
        Self {
            key: key.clone(),
            state: DecState::Nonce {
                buf: [0u8; NONCE_SIZE],
                filled: 0,
            },
        }
    }

    /// Bytes retained after the nonce, awaiting `finish`.
    pub fn buffered_len(&self) -> u64 {
        match &self.state {
            DecState::Body { buffered, .. } => *buffered,
            _ => 0,
        }
    }
}

impl StreamCodec for DecryptStream {
    fn feed(&mut self, mut chunk: BytesMut) -> IdxResult<Vec<Bytes>> {
        if let DecState::Nonce { buf, filled } = &mut self.state {
            let take = (NONCE_SIZE - *filled).min(chunk.len());
            buf[*filled..*filled + take].copy_from_slice(&chunk[..take]);
            *filled += take;
            chunk.advance(take);
            if *filled < NONCE_SIZE {
                return Ok(Vec::new());
            }
            let (cipher, mac) = gcm::init(&self.key, buf);
            trace!("decrypt stream: nonce complete");
            self.state = DecState::Body {
                cipher,
                mac,
                chunks: VecDeque::new(),
                buffered: 0,
            };
        }

        match &mut self.state {
            DecState::Body {
                chunks, buffered, ..
            } => {
                if !chunk.is_empty() {
                    *buffered += chunk.len() as u64;
                    chunks.push_back(chunk);
                }
                Ok(Vec::new())
            }
            DecState::Done => Err(IdxError::MalformedFrame(
                "decrypt stream used after finish".into(),
            )),
            DecState::Nonce { .. } => Ok(Vec::new()),
        }
    }

    fn finish(&mut self) -> IdxResult<Vec<Bytes>> {
        let (mut cipher, mut mac, mut chunks, buffered) =
            match std::mem::replace(&mut self.state, DecState::Done) {
                DecState::Body {
                    cipher,
                    mac,
                    chunks,
                    buffered,
                } => (cipher, mac, chunks, buffered),
                DecState::Nonce { filled, .. } => {
                    return Err(IdxError::MalformedFrame(format!(
                        "frame is {filled} bytes, minimum is {FRAME_OVERHEAD}"
                    )))
                }
                DecState::Done => {
                    return Err(IdxError::MalformedFrame(
                        "decrypt stream used after finish".into(),
                    ))
                }
            };

        let tag = split_off_tag(&mut chunks).ok_or_else(|| {
            IdxError::MalformedFrame(format!(
                "frame is {} bytes, minimum is {FRAME_OVERHEAD}",
                NONCE_SIZE as u64 + buffered
            ))
        })?;

        for chunk in &chunks {
            mac.absorb(chunk)?;
        }
        if !mac.verify(&tag) {
            error!(
                ciphertext_bytes = buffered - TAG_SIZE as u64,
                "authentication tag mismatch: archive corrupted or wrong key"
            );
            return Err(IdxError::DecryptionFailed);
        }

        let mut out = Vec::with_capacity(chunks.len());
        while let Some(mut chunk) = chunks.pop_front() {
            cipher.apply(&mut chunk);
            out.push(chunk.freeze());
        }
        Ok(out)
    }
}

/// Remove the trailing `TAG_SIZE` bytes from the chunk list, splitting the
/// chunk that straddles the boundary. `None` if fewer bytes are buffered;
/// the list is left untouched in that case.
fn split_off_tag(chunks: &mut VecDeque<BytesMut>) -> Option<[u8; TAG_SIZE]> {
    let total: usize = chunks.iter().map(|c| c.len()).sum();
    if total < TAG_SIZE {
        return None;
    }

    let mut tag = [0u8; TAG_SIZE];
    let mut need = TAG_SIZE;
    while need > 0 {
        let mut chunk = chunks.pop_back()?;
        if chunk.len() <= need {
            tag[need - chunk.len()..need].copy_from_slice(&chunk);
            need -= chunk.len();
        } else {
            let tail = chunk.split_off(chunk.len() - need);
            tag[..need].copy_from_slice(&tail);
            chunks.push_back(chunk);
            need = 0;
        }
    }
    Some(tag)
}

// ── In-memory helpers ─────────────────────────────────────────────────────────

/// Encrypt a whole buffer into a frame.
pub fn encrypt_bytes(key: &IndexKey, plaintext: &[u8]) -> IdxResult<Vec<u8>> {
    run(&mut EncryptStream::new(key), plaintext, plaintext.len())
}

/// Decrypt a whole frame. Fails closed on any framing or tag error.
pub fn decrypt_bytes(key: &IndexKey, frame: &[u8]) -> IdxResult<Vec<u8>> {
    run(&mut DecryptStream::new(key), frame, frame.len())
}

fn run(codec: &mut impl StreamCodec, input: &[u8], hint: usize) -> IdxResult<Vec<u8>> {
    let mut out = Vec::with_capacity(hint + FRAME_OVERHEAD);
    for piece in codec.feed(BytesMut::from(input))? {
        out.extend_from_slice(&piece);
    }
    for piece in codec.finish()? {
        out.extend_from_slice(&piece);
    }
    Ok(out)
}
