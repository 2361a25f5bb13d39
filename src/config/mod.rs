//! Server configuration
//!
//! Configuration is loaded in order of precedence:
//! 1. CLI flags (highest priority, applied in main)
//! 2. Config file (~/.config/guardian-bridge/config.toml or --config)
//! 3. Built-in defaults (lowest priority)
//!
//! Per-request behavior never lives here: it rides in the URL path and is
//! decoded by [`request`] for every request independently.

pub mod request;

#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the gateway server to
    pub bind_addr: SocketAddr,

    /// Base directory of moderation profiles
    pub profiles_dir: PathBuf,

    /// Directory for rotated log files; None logs to stdout only
    pub log_dir: Option<PathBuf>,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Training scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Whether the memory guard background task runs
    pub memory_guard: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub check_interval_minutes: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_minutes: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".parse().expect("static bind address"),
            profiles_dir: PathBuf::from("configs/mod_profiles"),
            log_dir: None,
            logging: LoggingConfig::default(),
            scheduler: SchedulerConfig::default(),
            memory_guard: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure (the subset of Config worth persisting)
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub bind_addr: Option<String>,
    pub profiles_dir: Option<String>,
    pub log_dir: Option<String>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,

    /// Optional [scheduler] section
    pub scheduler: Option<FileScheduler>,

    pub memory_guard: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileLogging {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileScheduler {
    pub enabled: Option<bool>,
    pub check_interval_minutes: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Default config file location
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("guardian-bridge").join("config.toml"))
    }

    /// Load configuration, merging an optional TOML file over the defaults.
    /// A missing file yields defaults; an unparseable file is logged and
    /// ignored rather than refusing to start.
    pub fn load(explicit_path: Option<&Path>) -> Self {
        let mut config = Self::default();

        let path = explicit_path
            .map(Path::to_path_buf)
            .or_else(Self::default_config_path);
        let Some(path) = path else {
            return config;
        };

        let Ok(raw) = std::fs::read_to_string(&path) else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return config;
        };

        match toml::from_str::<FileConfig>(&raw) {
            Ok(file) => config.apply_file(file, &path),
            Err(e) => {
                tracing::warn!("Ignoring invalid config file {}: {}", path.display(), e);
            }
        }

        config
    }

    fn apply_file(&mut self, file: FileConfig, path: &Path) {
        if let Some(addr) = file.bind_addr {
            match addr.parse() {
                Ok(addr) => self.bind_addr = addr,
                Err(e) => tracing::warn!(
                    "Invalid bind_addr '{}' in {}: {}",
                    addr,
                    path.display(),
                    e
                ),
            }
        }
        if let Some(dir) = file.profiles_dir {
            self.profiles_dir = PathBuf::from(dir);
        }
        if let Some(dir) = file.log_dir {
            self.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
        }
        if let Some(scheduler) = file.scheduler {
            if let Some(enabled) = scheduler.enabled {
                self.scheduler.enabled = enabled;
            }
            if let Some(minutes) = scheduler.check_interval_minutes {
                self.scheduler.check_interval_minutes = minutes;
            }
        }
        if let Some(memory_guard) = file.memory_guard {
            self.memory_guard = memory_guard;
        }
    }
}
