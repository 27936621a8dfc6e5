//! External compression: `archiver | block-compressor` over an OS pipe.
//!
//! ```text
//! compress:   tar -cf - <source>  |  lz4 -z -c  > <output_base>.tar.lz4
//! decompress: lz4 -d -c <archive> |  tar -xf -
//! ```
//!
//! Both processes are spawned with argument arrays (never through a shell)
//! from the configured working directory, so relative sources resolve the
//! same way on both sides of an archive/restore cycle. Children are killed
//! if the future driving them is dropped.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output, Stdio};

use tokio::process::Command;
use tracing::{debug, warn};

use idxvault_core::config::{IdxVaultConfig, ToolsConfig};
use idxvault_core::types::COMPRESSED_EXT;
use idxvault_core::{IdxError, IdxResult};

/// What the child processes reported on a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// stdout of the last process, when not redirected to a file
    pub stdout: String,
    /// stderr of both processes; non-empty means the run succeeded with warnings
    pub stderr: String,
}

impl ProcessOutput {
    pub fn has_warnings(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Produce and consume the compressed intermediate blob.
pub trait Compressor: Send + Sync {
    /// Archive `source` (relative to the working directory) into
    /// `<output_base>.tar.lz4`.
    fn compress(
        &self,
        source: &Path,
        output_base: &Path,
    ) -> impl Future<Output = IdxResult<ProcessOutput>> + Send;

    /// Unpack `archive` into the working directory.
    fn decompress(&self, archive: &Path) -> impl Future<Output = IdxResult<ProcessOutput>> + Send;
}

/// Production [`Compressor`]: the configured archiver and block compressor
/// executables (`tar`/`lz4`, or `tar.exe`/`lz4.exe` on Windows).
#[derive(Debug, Clone)]
pub struct ExternalCompressor {
    archiver: PathBuf,
    compressor: PathBuf,
    work_dir: PathBuf,
}

#[derive(Clone, Copy)]
enum Direction {
    Compress,
    Decompress,
}

impl Direction {
    fn failure(self, code: Option<i32>, stderr: String) -> IdxError {
        match self {
            Direction::Compress => IdxError::CompressionFailed { code, stderr },
            Direction::Decompress => IdxError::DecompressionFailed { code, stderr },
        }
    }
}

impl ExternalCompressor {
    pub fn new(tools: &ToolsConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            archiver: tools.archiver.clone(),
            compressor: tools.compressor.clone(),
            work_dir: work_dir.into(),
        }
    }

    pub fn from_config(config: &IdxVaultConfig) -> Self {
        Self::new(&config.tools, config.paths.work_dir.clone())
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(&self.work_dir)
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Spawn `producer | consumer` and wait for both.
    ///
    /// `consumer_stdout` is where the consumer writes; `None` captures it.
    async fn run_pair(
        &self,
        direction: Direction,
        mut producer: Command,
        mut consumer: Command,
        consumer_stdout: Option<Stdio>,
    ) -> IdxResult<ProcessOutput> {
        let producer_name = program_name(producer.as_std().get_program());
        let consumer_name = program_name(consumer.as_std().get_program());

        let mut first = producer
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| direction.failure(None, format!("spawning {producer_name}: {e}")))?;

        let pipe: Stdio = first
            .stdout
            .take()
            .ok_or_else(|| direction.failure(None, format!("{producer_name}: stdout not captured")))?
            .try_into()
            .map_err(|e| direction.failure(None, format!("connecting pipe: {e}")))?;

        consumer.stdin(pipe);
        match consumer_stdout {
            Some(out) => consumer.stdout(out),
            None => consumer.stdout(Stdio::piped()),
        };
        // On spawn failure `first` is dropped here and killed.
        let second = consumer
            .spawn()
            .map_err(|e| direction.failure(None, format!("spawning {consumer_name}: {e}")))?;

        let (first_out, second_out) = tokio::join!(first.wait_with_output(), second.wait_with_output());
        let first_out = first_out
            .map_err(|e| direction.failure(None, format!("waiting for {producer_name}: {e}")))?;
        let second_out = second_out
            .map_err(|e| direction.failure(None, format!("waiting for {consumer_name}: {e}")))?;

        let stderr = join_stderr(&[(&producer_name, &first_out), (&consumer_name, &second_out)]);

        if let Some(status) = first_failure(&[first_out.status, second_out.status]) {
            return Err(direction.failure(status.code(), stderr));
        }

        let output = ProcessOutput {
            stdout: String::from_utf8_lossy(&second_out.stdout).into_owned(),
            stderr,
        };
        if output.has_warnings() {
            warn!(stderr = %output.stderr.trim(), "{producer_name} | {consumer_name} succeeded with warnings");
        }
        Ok(output)
    }
}

impl Compressor for ExternalCompressor {
    async fn compress(&self, source: &Path, output_base: &Path) -> IdxResult<ProcessOutput> {
        let output_path = with_compressed_ext(output_base);
        debug!(
            source = %source.display(),
            output = %output_path.display(),
            work_dir = %self.work_dir.display(),
            "compressing"
        );

        let file = tokio::fs::File::create(self.work_dir.join(&output_path))
            .await
            .map_err(|e| IdxError::CompressionFailed {
                code: None,
                stderr: format!("creating {}: {e}", output_path.display()),
            })?
            .into_std()
            .await;

        let mut archiver = self.command(&self.archiver);
        archiver.arg("-cf").arg("-").arg(source);
        let mut compressor = self.command(&self.compressor);
        compressor.args(["-z", "-c"]);

        let result = self
            .run_pair(Direction::Compress, archiver, compressor, Some(Stdio::from(file)))
            .await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(self.work_dir.join(&output_path)).await {
                warn!(path = %output_path.display(), "removing partial compressed output: {e}");
            }
        }
        result
    }

    async fn decompress(&self, archive: &Path) -> IdxResult<ProcessOutput> {
        debug!(
            archive = %archive.display(),
            work_dir = %self.work_dir.display(),
            "decompressing"
        );

        let mut compressor = self.command(&self.compressor);
        compressor.args(["-d", "-c"]).arg(archive);
        let mut archiver = self.command(&self.archiver);
        archiver.arg("-xf").arg("-");

        self.run_pair(Direction::Decompress, compressor, archiver, None)
            .await
    }
}

/// `<base>.tar.lz4`
pub fn with_compressed_ext(base: &Path) -> PathBuf {
    let mut s = base.as_os_str().to_owned();
    s.push(COMPRESSED_EXT);
    PathBuf::from(s)
}

fn program_name(program: &std::ffi::OsStr) -> String {
    Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

fn first_failure(statuses: &[ExitStatus]) -> Option<ExitStatus> {
    statuses.iter().copied().find(|s| !s.success())
}

fn join_stderr(outputs: &[(&str, &Output)]) -> String {
    outputs
        .iter()
        .filter_map(|(name, out)| {
            let text = String::from_utf8_lossy(&out.stderr);
            let text = text.trim();
            (!text.is_empty()).then(|| format!("{name}: {text}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
