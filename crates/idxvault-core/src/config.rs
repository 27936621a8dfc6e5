use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{IdxError, IdxResult};

/// Top-level configuration (loaded from idxvault.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdxVaultConfig {
    pub paths: PathsConfig,
    pub archive: ArchiveConfig,
    pub tools: ToolsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Fixed root for archiver/compressor invocation. Holds the `.enc`
    /// archive and all intermediates. A leading `~` is expanded.
    pub work_dir: PathBuf,
    /// Live index parent folder, relative to `work_dir`
    pub data_dir_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// First component of `<prefix>_<id>_<version>`
    pub name_prefix: String,
    /// Last component of `<prefix>_<id>_<version>`
    pub index_version: String,
    /// Minimum free space in bytes before compress/decompress may run
    pub min_free_bytes: u64,
    /// Gate compress/decompress on the disk space check
    pub check_disk_space: bool,
    /// Per-stage timeout in seconds (0 = no timeout)
    pub stage_timeout_secs: u64,
    /// Read size for the encrypt/decrypt pipe
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Archiver executable (tar-compatible `-cf -` / `-xf -`)
    pub archiver: PathBuf,
    /// Block compressor executable (lz4-compatible `-c` / `-d -c`)
    pub compressor: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("~/.local/share/idxvault"),
            data_dir_name: "data".into(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            name_prefix: "search_index".into(),
            index_version: "v1".into(),
            min_free_bytes: 300_000_000,
            check_disk_space: true,
            stage_timeout_secs: 600,
            chunk_size: 64 * 1024,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        if cfg!(windows) {
            Self {
                archiver: PathBuf::from("tar.exe"),
                compressor: PathBuf::from("lz4.exe"),
            }
        } else {
            Self {
                archiver: PathBuf::from("tar"),
                compressor: PathBuf::from("lz4"),
            }
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl IdxVaultConfig {
    /// Parse a TOML document and normalise paths.
    pub fn from_toml(s: &str) -> IdxResult<Self> {
        let mut config: IdxVaultConfig =
            toml::from_str(s).map_err(|e| IdxError::Config(e.to_string()))?;
        config.resolve_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Expand a leading `~` in `paths.work_dir` and anchor a relative one at
    /// the current directory. Idempotent.
    pub fn resolve_paths(&mut self) -> IdxResult<()> {
        let expanded = expand_home(&self.paths.work_dir);
        self.paths.work_dir = std::path::absolute(&expanded).map_err(|e| {
            IdxError::Config(format!("paths.work_dir {}: {e}", expanded.display()))
        })?;
        Ok(())
    }

    pub fn validate(&self) -> IdxResult<()> {
        if self.archive.chunk_size == 0 {
            return Err(IdxError::Config("archive.chunk_size must be > 0".into()));
        }
        if self.archive.name_prefix.is_empty() || self.archive.index_version.is_empty() {
            return Err(IdxError::Config(
                "archive.name_prefix and archive.index_version must be non-empty".into(),
            ));
        }
        let data_dir = Path::new(&self.paths.data_dir_name);
        if self.paths.data_dir_name.is_empty() || data_dir.is_absolute() {
            return Err(IdxError::Config(
                "paths.data_dir_name must be a relative folder name".into(),
            ));
        }
        Ok(())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            Some(home) => PathBuf::from(home).join(rest),
            None => {
                tracing::warn!(path = %path.display(), "no home directory to expand '~'");
                path.to_path_buf()
            }
        },
        Err(_) => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[paths]
work_dir = "/var/lib/idxvault"
data_dir_name = "indexes"

[archive]
name_prefix = "idx"
index_version = "v3"
min_free_bytes = 1024
check_disk_space = false
stage_timeout_secs = 30
chunk_size = 4096

[tools]
archiver = "/usr/local/bin/gtar"
compressor = "/opt/lz4/bin/lz4"

[log]
level = "debug"
format = "json"
"#;
        let config = IdxVaultConfig::from_toml(toml_str).unwrap();

        assert_eq!(config.paths.work_dir, PathBuf::from("/var/lib/idxvault"));
        assert_eq!(config.paths.data_dir_name, "indexes");
        assert_eq!(config.archive.name_prefix, "idx");
        assert_eq!(config.archive.index_version, "v3");
        assert_eq!(config.archive.min_free_bytes, 1024);
        assert!(!config.archive.check_disk_space);
        assert_eq!(config.archive.stage_timeout_secs, 30);
        assert_eq!(config.archive.chunk_size, 4096);
        assert_eq!(config.tools.archiver, PathBuf::from("/usr/local/bin/gtar"));
        assert_eq!(config.tools.compressor, PathBuf::from("/opt/lz4/bin/lz4"));
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_parse_defaults() {
        let config: IdxVaultConfig = toml::from_str("").unwrap();

        assert_eq!(config.paths.data_dir_name, "data");
        assert_eq!(config.archive.name_prefix, "search_index");
        assert_eq!(config.archive.index_version, "v1");
        assert_eq!(config.archive.min_free_bytes, 300_000_000);
        assert!(config.archive.check_disk_space);
        assert_eq!(config.archive.chunk_size, 64 * 1024);
        assert_eq!(config.log.level, "info");
        #[cfg(unix)]
        assert_eq!(config.tools.compressor, PathBuf::from("lz4"));
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[archive]
min_free_bytes = 0
"#;
        let config = IdxVaultConfig::from_toml(toml_str).unwrap();

        // Overridden
        assert_eq!(config.archive.min_free_bytes, 0);
        // Defaults
        assert_eq!(config.archive.index_version, "v1");
        assert_eq!(config.archive.stage_timeout_secs, 600);
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_rejects_bad_values() {
        let err = IdxVaultConfig::from_toml("[archive]\nchunk_size = 0\n").unwrap_err();
        assert!(matches!(err, IdxError::Config(_)));

        let err = IdxVaultConfig::from_toml("[paths]\ndata_dir_name = \"/abs\"\n").unwrap_err();
        assert!(matches!(err, IdxError::Config(_)));

        let err = IdxVaultConfig::from_toml("[archive\n").unwrap_err();
        assert!(matches!(err, IdxError::Config(_)));
    }

    #[test]
    fn test_relative_work_dir_is_anchored() {
        let config = IdxVaultConfig::from_toml("[paths]\nwork_dir = \"state\"\n").unwrap();
        assert!(config.paths.work_dir.is_absolute());
        assert_eq!(
            config.paths.work_dir,
            std::env::current_dir().unwrap().join("state")
        );

        let mut again = config.clone();
        again.resolve_paths().unwrap();
        assert_eq!(again.paths.work_dir, config.paths.work_dir);

        let err = IdxVaultConfig::from_toml("[paths]\nwork_dir = \"\"\n").unwrap_err();
        assert!(matches!(err, IdxError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idxvault.toml");
        let work_dir = dir.path().join("work");
        std::fs::write(
            &path,
            format!(
                "[paths]\nwork_dir = {:?}\n\n[archive]\nstage_timeout_secs = 0\n",
                work_dir.display().to_string()
            ),
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let config = IdxVaultConfig::from_toml(&content).unwrap();
        assert_eq!(config.paths.work_dir, work_dir);
        assert_eq!(config.archive.stage_timeout_secs, 0);
    }

    #[test]
    fn test_home_expansion() {
        let expanded = expand_home(Path::new("/no/tilde"));
        assert_eq!(expanded, PathBuf::from("/no/tilde"));

        if let Some(home) = std::env::var_os("HOME") {
            let expanded = expand_home(Path::new("~/.local/share/idxvault"));
            assert_eq!(expanded, PathBuf::from(home).join(".local/share/idxvault"));
        }
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = IdxVaultConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: IdxVaultConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.paths.work_dir, parsed.paths.work_dir);
        assert_eq!(config.archive.min_free_bytes, parsed.archive.min_free_bytes);
        assert_eq!(config.tools.archiver, parsed.tools.archiver);
    }
}
