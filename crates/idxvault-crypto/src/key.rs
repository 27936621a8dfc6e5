//! Index encryption key: validation, generation, base64 transport

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use zeroize::Zeroize;

use idxvault_core::{IdxError, IdxResult};

use crate::KEY_SIZE;

/// A 256-bit index encryption key. Zeroized on drop.
///
/// Supplied by the caller for every archive/restore call; never persisted here.
#[derive(Clone)]
pub struct IndexKey {
    bytes: [u8; KEY_SIZE],
}

/// The two shapes a caller may hand a key over in.
#[derive(Clone)]
pub enum KeyInput {
    Raw(Vec<u8>),
    /// Standard-alphabet base64 that must decode to exactly 32 bytes.
    Base64(String),
}

impl IndexKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> IdxResult<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            IdxError::InvalidKey(format!(
                "expected {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn from_base64(encoded: &str) -> IdxResult<Self> {
        let mut decoded = BASE64.decode(encoded.trim()).map_err(|_| {
            IdxError::InvalidKey("key string is not valid base64".into())
        })?;
        let key = Self::from_slice(&decoded).map_err(|_| {
            IdxError::InvalidKey(format!(
                "base64 key decodes to {} bytes, expected {KEY_SIZE}",
                decoded.len()
            ))
        });
        decoded.zeroize();
        key
    }

    /// Generate a random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl TryFrom<KeyInput> for IndexKey {
    type Error = IdxError;

    fn try_from(input: KeyInput) -> IdxResult<Self> {
        match input {
            KeyInput::Raw(mut raw) => {
                let key = IndexKey::from_slice(&raw);
                raw.zeroize();
                key
            }
            KeyInput::Base64(mut s) => {
                let key = IndexKey::from_base64(&s);
                s.zeroize();
                key
            }
        }
    }
}

impl Drop for IndexKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Debug for KeyInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyInput::Raw(_) => f.write_str("KeyInput::Raw([REDACTED])"),
            KeyInput::Base64(_) => f.write_str("KeyInput::Base64([REDACTED])"),
        }
    }
}
