//! Daemon configuration.
//!
//! Read from a TOML file (`--config`, or `wsfs.toml` in the working
//! directory when present); every field has a default and the command
//! line overrides the common ones.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use wsfs_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_REQUEST_TIMEOUT, WS_DEFAULT_PORT, WS_PATH,
};
use wsfs_server::{ServerConfig, TransferSettings};
use wsfs_transfer::{CopyOptions, DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS};

use crate::Cli;

/// File looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "wsfs.toml";

/// Daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address to bind.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// WebSocket server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request path upgraded to WebSocket.
    #[serde(default = "default_path")]
    pub path: String,

    /// Directory that receives copied files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Bytes requested per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Concurrent chunk workers per file.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per chunk before the transfer fails.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds to wait for each chunk response.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Base delay between chunk retries, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    WS_DEFAULT_PORT
}

fn default_path() -> String {
    WS_PATH.into()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            path: default_path(),
            output_dir: default_output_dir(),
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Config {
    /// Loads `path`, or `wsfs.toml` if it exists, or the defaults.
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Self::load_file(fallback)
                } else {
                    tracing::debug!("no configuration file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration read");
        Ok(config)
    }

    /// Applies command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(dir) = &cli.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(chunk_size) = cli.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(workers) = cli.workers {
            self.workers = workers;
        }
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.copy_options().validate()?;
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        if !self.path.starts_with('/') {
            anyhow::bail!("path must start with '/': {}", self.path);
        }
        if !self.output_dir.is_dir() {
            anyhow::bail!(
                "output directory does not exist: {}",
                self.output_dir.display()
            );
        }
        Ok(())
    }

    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            chunk_size: self.chunk_size,
            workers: self.workers,
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind: self.bind,
            port: self.port,
            path: self.path.clone(),
        }
    }

    pub fn transfer_settings(&self) -> TransferSettings {
        TransferSettings {
            output_dir: self.output_dir.clone(),
            copy: self.copy_options(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}
