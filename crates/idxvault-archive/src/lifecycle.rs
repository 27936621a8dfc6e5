//! Archive lifecycle: compress → encrypt → persist, and the inverse.
//!
//! ```text
//! archive:  <data>/<name>/ ──tar|lz4──▶ <name>.tar.lz4 ──encrypt──▶ <name>.enc.partial ──rename──▶ <name>.enc
//! restore:  <name>.enc ──decrypt──▶ decrypted.tar.lz4 ──lz4|tar──▶ <data>/<name>/
//! ```
//!
//! Stages within one call run strictly in sequence. Each stage runs under
//! the configured timeout and the caller's cancellation token; dropping a
//! stage kills its child processes and closes its files.
//!
//! There is no locking across calls. Intermediate names are shared between
//! jobs (`decrypted.tar.lz4` is shared by every index), so callers must not
//! run two jobs for the same working directory and index id concurrently.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use idxvault_core::{IdxError, IdxResult, IdxVaultConfig, IndexLayout, Stage};
use idxvault_crypto::{decrypt_file, encrypt_file, IndexKey};

use crate::compress::{Compressor, ExternalCompressor};
use crate::disk::DiskGuard;

/// One archive or restore call: where the index lives and which key seals it.
/// Lives only for the duration of the call.
#[derive(Debug)]
pub struct ArchiveJob<'k> {
    pub layout: IndexLayout,
    key: &'k IndexKey,
}

impl<'k> ArchiveJob<'k> {
    pub fn new(config: &IdxVaultConfig, index_id: &str, key: &'k IndexKey) -> IdxResult<Self> {
        Ok(Self {
            layout: IndexLayout::new(config, index_id)?,
            key,
        })
    }

    pub fn key(&self) -> &IndexKey {
        self.key
    }
}

/// Entry point for the rest of the application.
pub struct ArchiveManager<C = ExternalCompressor> {
    config: IdxVaultConfig,
    compressor: C,
    guard: DiskGuard,
}

impl ArchiveManager<ExternalCompressor> {
    /// Manager using the configured external `tar`/`lz4` tools.
    pub fn new(mut config: IdxVaultConfig) -> Self {
        anchor_work_dir(&mut config);
        let compressor = ExternalCompressor::from_config(&config);
        Self::with_compressor(config, compressor)
    }
}

impl<C: Compressor> ArchiveManager<C> {
    pub fn with_compressor(mut config: IdxVaultConfig, compressor: C) -> Self {
        anchor_work_dir(&mut config);
        let guard = DiskGuard::new(config.archive.min_free_bytes);
        Self {
            config,
            compressor,
            guard,
        }
    }

    pub fn config(&self) -> &IdxVaultConfig {
        &self.config
    }

    pub fn layout(&self, index_id: &str) -> IdxResult<IndexLayout> {
        IndexLayout::new(&self.config, index_id)
    }

    /// Whether an encrypted archive exists for `index_id`.
    pub async fn has_archive(&self, index_id: &str) -> IdxResult<bool> {
        let layout = self.layout(index_id)?;
        Ok(tokio::fs::try_exists(layout.encrypted_archive()).await?)
    }

    pub async fn archive(&self, index_id: &str, key: &IndexKey) -> IdxResult<()> {
        self.archive_with_cancel(index_id, key, &CancellationToken::new())
            .await
    }

    pub async fn restore(&self, index_id: &str, key: &IndexKey) -> IdxResult<()> {
        self.restore_with_cancel(index_id, key, &CancellationToken::new())
            .await
    }

    /// Compress the live index folder, encrypt it into `<name>.enc`, and
    /// remove the compressed intermediate. The live folder is never touched.
    pub async fn archive_with_cancel(
        &self,
        index_id: &str,
        key: &IndexKey,
        cancel: &CancellationToken,
    ) -> IdxResult<()> {
        let job = ArchiveJob::new(&self.config, index_id, key)?;
        let layout = &job.layout;
        let source = layout.source_dir();
        info!(index_id, source = %source.display(), "archive starting");

        if !is_dir(&source).await {
            return Err(IdxError::SourceNotFound(source));
        }
        self.run_stage(Stage::Precheck, cancel, self.ensure_space())
            .await?;

        let blob = layout.compressed_blob();
        let compressed = self
            .run_stage(
                Stage::Compress,
                cancel,
                self.compressor
                    .compress(&layout.relative_source, &layout.compressed_base()),
            )
            .await;
        if let Err(e) = compressed {
            remove_best_effort(&blob).await;
            return Err(e);
        }
        if !is_file(&blob).await {
            return Err(IdxError::CompressionFailed {
                code: Some(0),
                stderr: format!("no output at {}", blob.display()),
            }
            .in_stage(Stage::Compress));
        }

        let partial = layout.encrypted_partial();
        let archive = layout.encrypted_archive();
        let sealed = self
            .run_stage(Stage::Encrypt, cancel, async {
                let bytes =
                    encrypt_file(job.key(), &blob, &partial, self.config.archive.chunk_size)
                        .await?;
                tokio::fs::rename(&partial, &archive).await?;
                Ok(bytes)
            })
            .await;
        let bytes = match sealed {
            Ok(bytes) => bytes,
            Err(e) => {
                remove_best_effort(&partial).await;
                remove_best_effort(&blob).await;
                return Err(e);
            }
        };

        tokio::fs::remove_file(&blob)
            .await
            .map_err(|e| IdxError::from(e).in_stage(Stage::Encrypt))?;

        info!(index_id, archive = %archive.display(), bytes, "archive complete");
        Ok(())
    }

    /// Decrypt `<name>.enc` and unpack it into the live index folder. The
    /// encrypted archive is left in place; the decode intermediate is removed
    /// whether or not unpacking succeeds.
    pub async fn restore_with_cancel(
        &self,
        index_id: &str,
        key: &IndexKey,
        cancel: &CancellationToken,
    ) -> IdxResult<()> {
        let job = ArchiveJob::new(&self.config, index_id, key)?;
        let layout = &job.layout;
        let archive = layout.encrypted_archive();
        info!(index_id, archive = %archive.display(), "restore starting");

        if !is_file(&archive).await {
            return Err(IdxError::ArchiveNotFound(archive));
        }

        self.run_stage(Stage::Precheck, cancel, self.ensure_space())
            .await?;

        let blob = layout.decrypted_blob();
        let decoded = self
            .run_stage(
                Stage::Decrypt,
                cancel,
                decrypt_file(job.key(), &archive, &blob, self.config.archive.chunk_size),
            )
            .await;
        if let Err(e) = decoded {
            if e.is_security_event() {
                error!(index_id, archive = %archive.display(), "archive failed authentication");
            }
            remove_best_effort(&blob).await;
            return Err(e);
        }
        if !is_file(&blob).await {
            return Err(IdxError::DecodeProducedNoOutput(blob).in_stage(Stage::Decrypt));
        }

        let unpacked = match self
            .run_stage(Stage::Precheck, cancel, self.ensure_space())
            .await
        {
            Ok(()) => {
                self.run_stage(
                    Stage::Decompress,
                    cancel,
                    self.compressor.decompress(&blob),
                )
                .await
            }
            Err(e) => Err(e),
        };

        let cleanup = tokio::fs::remove_file(&blob).await;
        match (unpacked, cleanup) {
            (Err(e), Err(cleanup_err)) => {
                warn!(path = %blob.display(), "removing decode intermediate: {cleanup_err}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(cleanup_err)) => {
                Err(IdxError::from(cleanup_err).in_stage(Stage::Decompress))
            }
            (Ok(_), Ok(())) => {
                info!(index_id, dest = %layout.source_dir().display(), "restore complete");
                Ok(())
            }
        }
    }

    /// Remove the live (plaintext) index folder for `index_id`. A folder that
    /// is already gone is not an error.
    pub fn purge_live_index(&self, index_id: &str) -> IdxResult<()> {
        let layout = self.layout(index_id)?;
        let source = layout.source_dir();
        if remove_dir_recursive(&source).map_err(|e| IdxError::from(e).in_stage(Stage::Purge))? {
            info!(index_id, path = %source.display(), "live index purged");
        }
        Ok(())
    }

    /// Remove the whole live data folder, every index in it included.
    pub fn purge_data_dir(&self) -> IdxResult<()> {
        let data_dir = self.config.paths.work_dir.join(&self.config.paths.data_dir_name);
        if remove_dir_recursive(&data_dir).map_err(|e| IdxError::from(e).in_stage(Stage::Purge))? {
            info!(path = %data_dir.display(), "live data folder purged");
        }
        Ok(())
    }

    async fn ensure_space(&self) -> IdxResult<()> {
        if !self.config.archive.check_disk_space {
            return Ok(());
        }
        let work_dir = &self.config.paths.work_dir;
        let available = self.guard.free_bytes(work_dir).await?;
        if !self.guard.meets_threshold(available) {
            return Err(IdxError::InsufficientDiskSpace {
                path: work_dir.clone(),
                available,
                required: self.guard.min_free_bytes(),
            });
        }
        Ok(())
    }

    async fn run_stage<T, F>(&self, stage: Stage, cancel: &CancellationToken, fut: F) -> IdxResult<T>
    where
        F: Future<Output = IdxResult<T>>,
    {
        let guarded = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(IdxError::Cancelled { stage }),
                result = fut => result.map_err(|e| e.in_stage(stage)),
            }
        };

        let result = match self.config.archive.stage_timeout_secs {
            0 => guarded.await,
            secs => tokio::time::timeout(Duration::from_secs(secs), guarded)
                .await
                .unwrap_or(Err(IdxError::TimedOut { stage })),
        };
        if let Err(e) = &result {
            warn!(%stage, "stage failed: {e}");
        }
        result
    }
}

/// Remove `path` and everything below it. Nested folders and files are
/// handled alike; symlinks are removed, not followed. Returns `false` if
/// nothing was there.
pub fn remove_dir_recursive(path: &Path) -> std::io::Result<bool> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(true)
}

/// Layout paths are joined onto `work_dir` and the external tools run from
/// it, so it must not be relative.
fn anchor_work_dir(config: &mut IdxVaultConfig) {
    if let Err(e) = config.resolve_paths() {
        warn!(work_dir = %config.paths.work_dir.display(), "{e}");
    }
}

async fn remove_best_effort(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "cleanup failed: {e}"),
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
