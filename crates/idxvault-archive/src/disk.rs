//! Pre-flight free space check.
//!
//! Queries the platform's own tool rather than statvfs so the numbers match
//! what the user sees: `df -P -k <path>` on Unix, `fsutil volume diskfree
//! <drive>` on Windows.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use idxvault_core::{IdxError, IdxResult};

/// Advisory gate: a path is "ok" when at least `min_free_bytes` are free.
#[derive(Debug, Clone, Copy)]
pub struct DiskGuard {
    min_free_bytes: u64,
}

impl DiskGuard {
    pub fn new(min_free_bytes: u64) -> Self {
        Self { min_free_bytes }
    }

    pub fn min_free_bytes(&self) -> u64 {
        self.min_free_bytes
    }

    /// Free bytes on the volume holding `path`.
    pub async fn free_bytes(&self, path: &Path) -> IdxResult<u64> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(IdxError::InvalidPath(path.to_path_buf()));
        }

        let (program, args) = query_command(path);
        let output = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| IdxError::DiskQueryFailed(format!("spawning {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No such file or directory") {
                return Err(IdxError::InvalidPath(path.to_path_buf()));
            }
            return Err(IdxError::DiskQueryFailed(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let free = if cfg!(windows) {
            parse_fsutil_output(&stdout)?
        } else {
            parse_df_output(&stdout)?
        };
        debug!(path = %path.display(), free, "disk space queried");
        Ok(free)
    }

    /// `Ok(false)` when free space is below the threshold; errors only when
    /// the query itself cannot be answered.
    pub async fn has_enough_space(&self, path: &Path) -> IdxResult<bool> {
        let free = self.free_bytes(path).await?;
        let enough = self.meets_threshold(free);
        if !enough {
            warn!(
                path = %path.display(),
                free,
                required = self.min_free_bytes,
                "free disk space below threshold"
            );
        }
        Ok(enough)
    }

    pub fn meets_threshold(&self, free_bytes: u64) -> bool {
        free_bytes >= self.min_free_bytes
    }
}

fn query_command(path: &Path) -> (&'static str, Vec<PathBuf>) {
    if cfg!(windows) {
        ("fsutil", vec!["volume".into(), "diskfree".into(), drive_of(path)])
    } else {
        ("df", vec!["-P".into(), "-k".into(), path.to_path_buf()])
    }
}

/// `C:\Users\x\AppData` → `C:`; paths without a drive prefix pass through.
fn drive_of(path: &Path) -> PathBuf {
    match path.components().next() {
        Some(std::path::Component::Prefix(prefix)) => PathBuf::from(prefix.as_os_str()),
        _ => path.to_path_buf(),
    }
}

/// Parse POSIX `df -P -k` output: last line, fourth column ("Available"), in KiB.
pub fn parse_df_output(stdout: &str) -> IdxResult<u64> {
    let line = stdout
        .trim()
        .lines()
        .last()
        .ok_or_else(|| IdxError::DiskQueryFailed("empty df output".into()))?;
    let field = line
        .split_whitespace()
        .nth(3)
        .ok_or_else(|| IdxError::DiskQueryFailed(format!("unexpected df line: {line:?}")))?;
    let kib: u64 = field
        .parse()
        .map_err(|_| IdxError::DiskQueryFailed(format!("non-numeric df field: {field:?}")))?;
    Ok(kib.saturating_mul(1024))
}

/// Parse `fsutil volume diskfree` output.
///
/// Prefers the "avail free bytes" line (the caller's quota-aware figure),
/// then any "free bytes" line, then the last line. The value follows the
/// colon and may carry thousands separators and a trailing human-readable
/// size in parentheses.
pub fn parse_fsutil_output(stdout: &str) -> IdxResult<u64> {
    let lines: Vec<&str> = stdout.trim().lines().filter(|l| l.contains(':')).collect();
    let line = lines
        .iter()
        .find(|l| l.to_ascii_lowercase().contains("avail free bytes"))
        .or_else(|| {
            lines
                .iter()
                .find(|l| l.to_ascii_lowercase().contains("free bytes"))
        })
        .or_else(|| lines.last())
        .ok_or_else(|| IdxError::DiskQueryFailed("empty fsutil output".into()))?;

    let value = line
        .split_once(':')
        .map(|(_, v)| v)
        .unwrap_or_default();
    let value = value.split('(').next().unwrap_or_default();
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse()
        .map_err(|_| IdxError::DiskQueryFailed(format!("unexpected fsutil line: {line:?}")))
}
