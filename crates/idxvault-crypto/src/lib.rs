//! idxvault-crypto: at-rest encryption for index snapshots
//!
//! Architecture: one AES-256-GCM stream per archive, framed as
//!
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! Total length is always `28 + plaintext length`. There is no AAD, no
//! padding, and no per-chunk framing: the ciphertext is a single GCM
//! message, byte-compatible with any one-shot AES-256-GCM implementation
//! given the same key and nonce.
//!
//! Pipeline:
//! ```text
//! encode: plaintext chunks → EncryptStream → nonce, ct.., tag
//! decode: frame chunks → DecryptStream → (buffer until end) → verify tag → plaintext
//! ```
//!
//! Decoding never releases plaintext before the tag has been checked.

mod gcm;
pub mod key;
pub mod pipe;
pub mod stream;

pub use key::{IndexKey, KeyInput};
pub use pipe::{decrypt_file, encrypt_file, pipe};
pub use stream::{decrypt_bytes, encrypt_bytes, DecryptStream, EncryptStream, StreamCodec};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of a GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Frame overhead: nonce + tag
pub const FRAME_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
