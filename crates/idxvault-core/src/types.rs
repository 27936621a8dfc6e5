use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::IdxVaultConfig;
use crate::error::{IdxError, IdxResult};

/// Extension of the compressed intermediate produced by the archiver pipe.
pub const COMPRESSED_EXT: &str = ".tar.lz4";

/// Extension of the persisted encrypted archive.
pub const ENCRYPTED_EXT: &str = ".enc";

/// Fixed name of the decode intermediate written during restore.
pub const DECRYPTED_BLOB_NAME: &str = "decrypted.tar.lz4";

/// Lifecycle stage, attached to errors for context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Precheck,
    Compress,
    Encrypt,
    Decrypt,
    Decompress,
    Purge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Precheck => "precheck",
            Stage::Compress => "compress",
            Stage::Encrypt => "encrypt",
            Stage::Decrypt => "decrypt",
            Stage::Decompress => "decompress",
            Stage::Purge => "purge",
        };
        f.write_str(s)
    }
}

/// On-disk locations for one index, derived from `<prefix>_<id>_<version>`.
///
/// ```text
/// <work_dir>/
///   <data_dir>/<name>/        live (plaintext) index folder
///   <name>.tar.lz4            compressed intermediate (archive)
///   <name>.enc                encrypted archive, persists between runs
///   decrypted.tar.lz4         decode intermediate (restore)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    pub index_id: String,
    /// `<prefix>_<id>_<version>`
    pub name: String,
    pub work_dir: PathBuf,
    /// Source folder relative to `work_dir`; handed to the archiver as-is.
    pub relative_source: PathBuf,
}

impl IndexLayout {
    pub fn new(config: &IdxVaultConfig, index_id: &str) -> IdxResult<Self> {
        validate_index_id(index_id)?;
        let name = format!(
            "{}_{}_{}",
            config.archive.name_prefix, index_id, config.archive.index_version
        );
        Ok(Self {
            index_id: index_id.to_string(),
            relative_source: Path::new(&config.paths.data_dir_name).join(&name),
            work_dir: config.paths.work_dir.clone(),
            name,
        })
    }

    pub fn source_dir(&self) -> PathBuf {
        self.work_dir.join(&self.relative_source)
    }

    /// Base path handed to the compressor; it appends `.tar.lz4`.
    pub fn compressed_base(&self) -> PathBuf {
        self.work_dir.join(&self.name)
    }

    pub fn compressed_blob(&self) -> PathBuf {
        self.work_dir.join(format!("{}{COMPRESSED_EXT}", self.name))
    }

    pub fn encrypted_archive(&self) -> PathBuf {
        self.work_dir.join(format!("{}{ENCRYPTED_EXT}", self.name))
    }

    /// Staging path the encoder writes to before the archive is renamed into place.
    pub fn encrypted_partial(&self) -> PathBuf {
        self.work_dir.join(format!("{}{ENCRYPTED_EXT}.partial", self.name))
    }

    pub fn decrypted_blob(&self) -> PathBuf {
        self.work_dir.join(DECRYPTED_BLOB_NAME)
    }
}

/// Index ids end up in file names, so only a conservative character set is accepted.
pub fn validate_index_id(index_id: &str) -> IdxResult<()> {
    let ok_chars = index_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if index_id.is_empty() || !ok_chars || index_id.starts_with('.') || index_id.contains("..") {
        return Err(IdxError::InvalidIndexId(index_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_at(dir: &Path) -> IdxVaultConfig {
        let mut config = IdxVaultConfig::default();
        config.paths.work_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_layout_naming() {
        let config = config_at(Path::new("/var/lib/app"));
        let layout = IndexLayout::new(&config, "user1").unwrap();

        assert_eq!(layout.name, "search_index_user1_v1");
        assert_eq!(layout.relative_source, Path::new("data/search_index_user1_v1"));
        assert_eq!(
            layout.source_dir(),
            Path::new("/var/lib/app/data/search_index_user1_v1")
        );
        assert_eq!(
            layout.compressed_blob(),
            Path::new("/var/lib/app/search_index_user1_v1.tar.lz4")
        );
        assert_eq!(
            layout.encrypted_archive(),
            Path::new("/var/lib/app/search_index_user1_v1.enc")
        );
        assert_eq!(layout.decrypted_blob(), Path::new("/var/lib/app/decrypted.tar.lz4"));
    }

    #[test]
    fn test_layout_respects_config() {
        let mut config = config_at(Path::new("/tmp/w"));
        config.archive.name_prefix = "idx".into();
        config.archive.index_version = "v2".into();
        config.paths.data_dir_name = "live".into();

        let layout = IndexLayout::new(&config, "42").unwrap();
        assert_eq!(layout.name, "idx_42_v2");
        assert_eq!(layout.source_dir(), Path::new("/tmp/w/live/idx_42_v2"));
    }

    #[test]
    fn test_index_id_validation() {
        for good in ["user1", "7168574723", "a.b-c_d", "someone@example.com"] {
            assert!(validate_index_id(good).is_ok(), "{good} should be accepted");
        }
        for bad in ["", "../etc", "a/b", "a\\b", "..", ".hidden", "x y", "a;rm -rf"] {
            assert!(
                matches!(validate_index_id(bad), Err(IdxError::InvalidIndexId(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Decompress.to_string(), "decompress");
        assert_eq!(Stage::Precheck.to_string(), "precheck");
    }
}
