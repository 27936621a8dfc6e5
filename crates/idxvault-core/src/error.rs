use std::path::PathBuf;

use thiserror::Error;

use crate::types::Stage;

pub type IdxResult<T> = Result<T, IdxError>;

#[derive(Debug, Error)]
pub enum IdxError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Authentication tag mismatch. Treated as a security event, not an I/O error.
    #[error("decryption failed: authentication tag mismatch or corrupted ciphertext")]
    DecryptionFailed,

    #[error("compression failed (exit {}): {stderr}", fmt_code(*.code))]
    CompressionFailed { code: Option<i32>, stderr: String },

    #[error("decompression failed (exit {}): {stderr}", fmt_code(*.code))]
    DecompressionFailed { code: Option<i32>, stderr: String },

    #[error("source index folder not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("encrypted archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("disk space query failed: {0}")]
    DiskQueryFailed(String),

    #[error("decode finished without producing {}", .0.display())]
    DecodeProducedNoOutput(PathBuf),

    #[error("invalid index id {0:?}")]
    InvalidIndexId(String),

    #[error("insufficient disk space at {}: {available} bytes free, {required} required", .path.display())]
    InsufficientDiskSpace {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    #[error("{stage} stage timed out")]
    TimedOut { stage: Stage },

    #[error("{stage} stage cancelled")]
    Cancelled { stage: Stage },

    #[error("config error: {0}")]
    Config(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<IdxError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IdxError {
    /// Attach the failing lifecycle stage without changing the error kind.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            // Already attributed, or carries its own stage.
            e @ (IdxError::Stage { .. } | IdxError::TimedOut { .. } | IdxError::Cancelled { .. }) => e,
            e => IdxError::Stage {
                stage,
                source: Box::new(e),
            },
        }
    }

    /// The underlying error with any stage context peeled off.
    pub fn root(&self) -> &IdxError {
        match self {
            IdxError::Stage { source, .. } => source.root(),
            e => e,
        }
    }

    /// Stage the error was attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            IdxError::Stage { stage, .. }
            | IdxError::TimedOut { stage }
            | IdxError::Cancelled { stage } => Some(*stage),
            _ => None,
        }
    }

    pub fn is_security_event(&self) -> bool {
        matches!(self.root(), IdxError::DecryptionFailed)
    }
}

fn fmt_code(code: Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}
