//! Async driver connecting a [`StreamCodec`] to a reader and a writer.

use std::path::Path;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use idxvault_core::IdxResult;

use crate::key::IndexKey;
use crate::stream::{DecryptStream, EncryptStream, StreamCodec};

/// Read `reader` in chunks of at most `chunk_size` bytes, pass each through
/// `codec`, and write every emitted chunk to `writer`. Finishes the codec at
/// end of input and flushes. Returns the number of bytes written.
///
/// If the codec fails in `finish`, nothing it would have emitted there is
/// written.
pub async fn pipe<R, W, C>(
    reader: &mut R,
    codec: &mut C,
    writer: &mut W,
    chunk_size: usize,
) -> IdxResult<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    C: StreamCodec + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut written = 0u64;
    let mut buf = BytesMut::new();

    loop {
        buf.resize(chunk_size, 0);
        let n = reader.read(&mut buf[..]).await?;
        if n == 0 {
            break;
        }
        buf.truncate(n);
        for out in codec.feed(buf.split())? {
            writer.write_all(&out).await?;
            written += out.len() as u64;
        }
    }

    for out in codec.finish()? {
        writer.write_all(&out).await?;
        written += out.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

/// Encrypt `src` into a new frame file at `dst` (created or truncated).
pub async fn encrypt_file(
    key: &IndexKey,
    src: &Path,
    dst: &Path,
    chunk_size: usize,
) -> IdxResult<u64> {
    let mut input = tokio::fs::File::open(src).await?;
    let mut output = tokio::fs::File::create(dst).await?;
    let written = pipe(&mut input, &mut EncryptStream::new(key), &mut output, chunk_size).await?;
    output.sync_all().await?;
    debug!(src = %src.display(), dst = %dst.display(), bytes = written, "encrypted");
    Ok(written)
}

/// Decrypt the frame file at `src` into `dst` (created or truncated).
///
/// On failure `dst` may exist but holds no plaintext: the decoder releases
/// nothing until the tag has verified.
pub async fn decrypt_file(
    key: &IndexKey,
    src: &Path,
    dst: &Path,
    chunk_size: usize,
) -> IdxResult<u64> {
    let mut input = tokio::fs::File::open(src).await?;
    let mut output = tokio::fs::File::create(dst).await?;
    let written = pipe(&mut input, &mut DecryptStream::new(key), &mut output, chunk_size).await?;
    output.sync_all().await?;
    debug!(src = %src.display(), dst = %dst.display(), bytes = written, "decrypted");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{decrypt_bytes, FRAME_OVERHEAD};
    use idxvault_core::IdxError;

    fn test_key() -> IndexKey {
        IndexKey::from_bytes([7u8; 32])
    }

    #[tokio::test]
    async fn test_pipe_in_memory_roundtrip() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let mut reader = &plaintext[..];
        let mut frame = Vec::new();
        let written = pipe(&mut reader, &mut EncryptStream::new(&key), &mut frame, 4096)
            .await
            .unwrap();
        assert_eq!(written as usize, plaintext.len() + FRAME_OVERHEAD);
        assert_eq!(frame.len(), written as usize);

        let mut reader = &frame[..];
        let mut out = Vec::new();
        pipe(&mut reader, &mut DecryptStream::new(&key), &mut out, 333)
            .await
            .unwrap();
        assert_eq!(out, plaintext);
    }

    #[tokio::test]
    async fn test_pipe_empty_input() {
        let key = test_key();
        let mut reader: &[u8] = &[];
        let mut frame = Vec::new();
        pipe(&mut reader, &mut EncryptStream::new(&key), &mut frame, 1024)
            .await
            .unwrap();
        assert_eq!(frame.len(), FRAME_OVERHEAD);
        assert_eq!(decrypt_bytes(&key, &frame).unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_pipe_tampered_writes_nothing() {
        let key = test_key();
        let mut reader: &[u8] = b"plaintext that must never leak";
        let mut frame = Vec::new();
        pipe(&mut reader, &mut EncryptStream::new(&key), &mut frame, 8)
            .await
            .unwrap();
        frame[15] ^= 0x80;

        let mut reader = &frame[..];
        let mut out = Vec::new();
        let result = pipe(&mut reader, &mut DecryptStream::new(&key), &mut out, 8).await;
        assert!(matches!(result, Err(IdxError::DecryptionFailed)));
        assert!(out.is_empty(), "no plaintext may be released on tag mismatch");
    }

    #[tokio::test]
    async fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("plain.bin");
        let enc = dir.path().join("plain.bin.enc");
        let dec = dir.path().join("plain.bin.out");
        let data: Vec<u8> = (0..100_000u32).map(|i| (i * 31 % 256) as u8).collect();
        tokio::fs::write(&src, &data).await.unwrap();

        let key = test_key();
        encrypt_file(&key, &src, &enc, 8192).await.unwrap();
        assert_eq!(
            tokio::fs::metadata(&enc).await.unwrap().len() as usize,
            data.len() + FRAME_OVERHEAD
        );

        decrypt_file(&key, &enc, &dec, 8192).await.unwrap();
        assert_eq!(tokio::fs::read(&dec).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = encrypt_file(
            &test_key(),
            &dir.path().join("absent"),
            &dir.path().join("out"),
            1024,
        )
        .await;
        assert!(matches!(result, Err(IdxError::Io(_))));
    }
}
