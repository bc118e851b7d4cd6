//! Proxy configuration.
//!
//! Read from `$XDG_CONFIG_HOME/vfsbridge/config.toml` when present, with
//! `VFSBRIDGE_CONFIG` naming an explicit file instead. Every field has a
//! default, so an empty or missing file is a valid configuration.
//!
//! ```toml
//! buffer_capacity = 65536
//! acquire_retries = 6
//! acquire_backoff_ms = 300
//! root = "/var/lib/myapp/store"
//!
//! [codes]
//! not_found = -12
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::Deserialize;
use thiserror::Error;

use vfsbridge_types::{CodeTableError, ErrorCodes, MAX_IO};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "VFSBRIDGE_CONFIG";

/// Default size of each per-file shared buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Smallest buffer that can still carry a file size.
pub const MIN_BUFFER_CAPACITY: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Must lie in `MIN_BUFFER_CAPACITY..=MAX_IO`.
    #[error("buffer_capacity {0} is out of range")]
    BufferCapacity(usize),

    #[error("error code table: {0}")]
    Codes(#[from] CodeTableError),
}

/// Settings shared by the Caller and the Executor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Bytes per open file's shared buffer; bounds a single read or write.
    pub buffer_capacity: usize,

    /// How many times to retry acquiring a busy file before giving up.
    pub acquire_retries: u32,

    /// Base backoff between acquisition attempts. Attempt `n` waits `n` times this.
    pub acquire_backoff_ms: u64,

    /// Numeric codes for each error kind.
    pub codes: ErrorCodes,

    /// Local directory to serve. `None` means an in-memory store.
    pub root: Option<PathBuf>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            acquire_retries: 6,
            acquire_backoff_ms: 300,
            codes: ErrorCodes::default(),
            root: None,
        }
    }
}

impl ProxyConfig {
    /// Load from the default location, falling back to defaults when no
    /// file exists there. A file named by [`CONFIG_ENV`] must exist.
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&explicit));
        }
        let path = default_config_path();
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings both sides rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity < MIN_BUFFER_CAPACITY || self.buffer_capacity as u64 > MAX_IO {
            return Err(ConfigError::BufferCapacity(self.buffer_capacity));
        }
        self.codes.validate()?;
        Ok(())
    }

    pub fn acquire_backoff(&self) -> Duration {
        Duration::from_millis(self.acquire_backoff_ms)
    }

    /// Builder-style override of the served directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }
}

/// `$XDG_CONFIG_HOME/vfsbridge/config.toml`, or `~/.config/...` without XDG.
pub fn default_config_path() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("vfsbridge")
        .join("config.toml")
}
