//! Wire compatibility with one-shot AES-256-GCM.
//!
//! Archives written by earlier runs were sealed as a single GCM message, so
//! the streaming codec must produce and accept exactly what `aes-gcm` does
//! for the same key and nonce.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use bytes::BytesMut;

use idxvault_crypto::{
    decrypt_bytes, EncryptStream, IndexKey, StreamCodec, NONCE_SIZE, TAG_SIZE,
};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(13) ^ (i >> 5)) as u8)
        .collect()
}

fn stream_encrypt(key: &IndexKey, nonce: [u8; NONCE_SIZE], data: &[u8], step: usize) -> Vec<u8> {
    let mut enc = EncryptStream::with_nonce(key, nonce);
    let mut out = Vec::new();
    for piece in data.chunks(step) {
        for b in enc.feed(BytesMut::from(piece)).unwrap() {
            out.extend_from_slice(&b);
        }
    }
    for b in enc.finish().unwrap() {
        out.extend_from_slice(&b);
    }
    out
}

#[test]
fn stream_frame_matches_one_shot_gcm() {
    let key_bytes = [0x5Au8; 32];
    let key = IndexKey::from_bytes(key_bytes);
    let nonce = [0x11u8; NONCE_SIZE];
    let cipher = Aes256Gcm::new_from_slice(&key_bytes).unwrap();

    for size in [0usize, 1, 16, 100, 4095, 70_000] {
        let data = make_data(size);
        let sealed = cipher.encrypt(Nonce::from_slice(&nonce), data.as_slice()).unwrap();

        for step in [1usize, 7, 64, 65_536] {
            let frame = stream_encrypt(&key, nonce, &data, step);
            assert_eq!(&frame[..NONCE_SIZE], &nonce);
            assert_eq!(
                &frame[NONCE_SIZE..],
                sealed.as_slice(),
                "size {size} step {step}: ciphertext||tag must equal aes-gcm output"
            );
        }
    }
}

#[test]
fn decodes_frames_sealed_by_one_shot_gcm() {
    let key = IndexKey::generate();
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).unwrap();
    let nonce = [0x2Cu8; NONCE_SIZE];
    let data = make_data(123_457);

    let mut frame = nonce.to_vec();
    frame.extend(cipher.encrypt(Nonce::from_slice(&nonce), data.as_slice()).unwrap());

    assert_eq!(decrypt_bytes(&key, &frame).unwrap(), data);
}

#[test]
fn one_shot_gcm_opens_stream_frames() {
    let key = IndexKey::generate();
    let data = make_data(9_999);
    let frame = idxvault_crypto::encrypt_bytes(&key, &data).unwrap();
    assert_eq!(frame.len(), NONCE_SIZE + data.len() + TAG_SIZE);

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).unwrap();
    let (nonce, body) = frame.split_at(NONCE_SIZE);
    let opened = cipher.decrypt(Nonce::from_slice(nonce), body).unwrap();
    assert_eq!(opened, data);
}
