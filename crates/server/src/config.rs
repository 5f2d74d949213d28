//! Command line and environment configuration.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tracing::Level;

use crate::download::DEFAULT_CHUNK_SIZE;
use crate::upload::{DEFAULT_SPILL_THRESHOLD, UploadConfig};

/// How a POST is answered once its body has been consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum UploadMode {
    /// 200 OK
    #[default]
    Acknowledge,
    /// 501 Not Implemented
    NotImplemented,
}

/// micro-file - streaming file download and upload server.
#[derive(Debug, Clone, Parser)]
#[command(name = "micro-file", version, about)]
pub struct Config {
    /// Directory downloads are served from
    #[arg(short = 'r', long = "root", env = "MICRO_FILE_ROOT", default_value = ".", value_name = "DIR")]
    pub root: PathBuf,

    /// Address to listen on
    #[arg(short = 'a', long = "address", env = "MICRO_FILE_ADDRESS", default_value = "127.0.0.1:8080")]
    pub address: SocketAddr,

    /// Download chunk size in bytes
    #[arg(long = "chunk-size", env = "MICRO_FILE_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE, value_parser = parse_positive)]
    pub chunk_size: usize,

    /// Status returned after an upload body has been consumed
    #[arg(long = "upload-mode", env = "MICRO_FILE_UPLOAD_MODE", value_enum, default_value_t = UploadMode::Acknowledge)]
    pub upload_mode: UploadMode,

    /// Directory for upload fields too large to keep in memory (default: system temp dir)
    #[arg(long = "spool-dir", env = "MICRO_FILE_SPOOL_DIR", value_name = "DIR")]
    pub spool_dir: Option<PathBuf>,

    /// Field size in bytes above which upload data is spooled to disk
    #[arg(long = "spill-threshold", env = "MICRO_FILE_SPILL_THRESHOLD", default_value_t = DEFAULT_SPILL_THRESHOLD)]
    pub spill_threshold: usize,

    /// Max log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", env = "MICRO_FILE_LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid root directory {}: {source}", path.display())]
    InvalidRoot { path: PathBuf, source: io::Error },

    #[error("root is not a directory: {}", path.display())]
    RootNotDirectory { path: PathBuf },
}

/// Settings every session reads; shared read-only between connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Absolute directory downloads are resolved under.
    pub root: PathBuf,
    pub chunk_size: usize,
    pub upload_mode: UploadMode,
    pub upload: UploadConfig,
}

impl SessionConfig {
    /// Defaults for everything but the root, which is used as given.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            upload_mode: UploadMode::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    /// Resolves the root to an absolute directory and builds the session settings.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let root = std::fs::canonicalize(&self.root)
            .map_err(|source| ConfigError::InvalidRoot { path: self.root.clone(), source })?;
        if !root.is_dir() {
            return Err(ConfigError::RootNotDirectory { path: root });
        }

        Ok(SessionConfig {
            root,
            chunk_size: self.chunk_size,
            upload_mode: self.upload_mode,
            upload: UploadConfig {
                spool_dir: self.spool_dir.clone().unwrap_or_else(std::env::temp_dir),
                spill_threshold: self.spill_threshold,
            },
        })
    }
}

fn parse_positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be greater than 0".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
