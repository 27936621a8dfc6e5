//! idxvault: encrypted snapshots of on-disk search indexes
//!
//! Commands:
//!   archive --id ID       - compress + encrypt the live index into <name>.enc
//!   restore --id ID       - decrypt + unpack <name>.enc into the live folder
//!   purge --id ID         - delete the live (plaintext) index folder
//!   keygen                - print a fresh base64 index key
//!   check-space [PATH]    - report free bytes against the configured threshold
//!   config show           - display the effective configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use idxvault_archive::{ArchiveManager, DiskGuard};
use idxvault_core::IdxVaultConfig;
use idxvault_crypto::{IndexKey, KeyInput, KEY_SIZE};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "idxvault",
    version,
    about = "Encrypted archive and restore for local search indexes"
)]
struct Cli {
    /// Path to idxvault.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "IDXVAULT_CONFIG",
        default_value = "/etc/idxvault/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides log.level
    #[arg(long, env = "IDXVAULT_LOG")]
    log: Option<String>,

    /// Log format; overrides log.format
    #[arg(long, env = "IDXVAULT_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(clap::Args, Debug)]
struct KeyArgs {
    /// Environment variable holding the base64 index key
    #[arg(long, default_value = "IDXVAULT_KEY")]
    key_env: String,

    /// File holding the key, either 32 raw bytes or base64 text
    #[arg(long, conflicts_with = "key_env")]
    key_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compress and encrypt a live index folder
    Archive {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Decrypt and unpack an archived index
    Restore {
        #[arg(long)]
        id: String,
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Delete the live index folder (the encrypted archive is kept)
    Purge {
        #[arg(long)]
        id: String,
    },

    /// Generate a new random index key
    Keygen,

    /// Report free disk space against archive.min_free_bytes
    #[command(name = "check-space")]
    CheckSpace {
        /// Defaults to paths.work_dir
        path: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, from_file) = load_config(&cli.config).await?;

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.clone().unwrap_or(if config.log.format == "json" {
        LogFormat::Json
    } else {
        LogFormat::Text
    });
    init_logging(level, &format);

    if !from_file {
        warn!("config file not found: {}  (using defaults)", cli.config.display());
    }

    match cli.command {
        Commands::Archive { id, key } => {
            let key = load_key(&key)?;
            let manager = ArchiveManager::new(config);
            let cancel = cancel_on_ctrl_c();
            manager
                .archive_with_cancel(&id, &key, &cancel)
                .await
                .with_context(|| format!("archiving index '{id}'"))?;
            println!("archived: {}", manager.layout(&id)?.encrypted_archive().display());
            Ok(())
        }
        Commands::Restore { id, key } => {
            let key = load_key(&key)?;
            let manager = ArchiveManager::new(config);
            let cancel = cancel_on_ctrl_c();
            manager
                .restore_with_cancel(&id, &key, &cancel)
                .await
                .with_context(|| format!("restoring index '{id}'"))?;
            println!("restored: {}", manager.layout(&id)?.source_dir().display());
            Ok(())
        }
        Commands::Purge { id } => {
            let manager = ArchiveManager::new(config);
            manager
                .purge_live_index(&id)
                .with_context(|| format!("purging index '{id}'"))?;
            println!("purged: {}", manager.layout(&id)?.source_dir().display());
            Ok(())
        }
        Commands::Keygen => {
            println!("{}", IndexKey::generate().to_base64());
            Ok(())
        }
        Commands::CheckSpace { path } => cmd_check_space(&config, path.as_deref()).await,
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config, from_file),
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Returns the config and whether it came from a file.
async fn load_config(path: &Path) -> Result<(IdxVaultConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        let config = IdxVaultConfig::from_toml(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((IdxVaultConfig::from_toml("")?, false))
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Key loading ───────────────────────────────────────────────────────────────

fn load_key(args: &KeyArgs) -> Result<IndexKey> {
    let input = match &args.key_file {
        Some(path) => {
            let bytes =
                std::fs::read(path).with_context(|| format!("reading key file: {}", path.display()))?;
            key_input_from_file(bytes)?
        }
        None => {
            let encoded = std::env::var(&args.key_env)
                .with_context(|| format!("index key not set: export {}=<base64 key>", args.key_env))?;
            KeyInput::Base64(encoded)
        }
    };
    IndexKey::try_from(input).context("loading index key")
}

/// Exactly 32 bytes are taken as a raw key; anything else must be base64 text.
fn key_input_from_file(bytes: Vec<u8>) -> Result<KeyInput> {
    if bytes.len() == KEY_SIZE {
        return Ok(KeyInput::Raw(bytes));
    }
    let text = String::from_utf8(bytes).context("key file is neither 32 raw bytes nor base64 text")?;
    Ok(KeyInput::Base64(text))
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

// ── `idxvault check-space` ────────────────────────────────────────────────────

async fn cmd_check_space(config: &IdxVaultConfig, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&config.paths.work_dir);
    let guard = DiskGuard::new(config.archive.min_free_bytes);
    let free = guard
        .free_bytes(path)
        .await
        .with_context(|| format!("querying free space: {}", path.display()))?;

    println!("path:      {}", path.display());
    println!("free:      {free} bytes");
    println!("required:  {} bytes", guard.min_free_bytes());
    if guard.meets_threshold(free) {
        println!("status:    ok");
        Ok(())
    } else {
        anyhow::bail!("insufficient disk space at {}", path.display())
    }
}

// ── `idxvault config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &IdxVaultConfig, config_path: &Path, from_file: bool) -> Result<()> {
    if from_file {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
