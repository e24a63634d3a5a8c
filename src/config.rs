//! On-disk configuration: a human-editable TOML file under the daemon's
//! state directory, covering the four sections named in spec §6.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::store::models::SyncMode;

const BASE_DIR_NAME: &str = ".liked-sync";
const CONFIG_FILE: &str = "config.toml";
const PID_FILE: &str = "daemon.pid";
const SOCKET_FILE: &str = "daemon.sock";
const LOG_DIR: &str = "logs";
const STORE_FILE: &str = "liked-sync.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialise config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine the user's home directory")]
    NoHomeDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub dashboard_port: u16,
    pub log_level: LogLevel,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            dashboard_port: 9847,
            log_level: LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub interval_minutes: u32,
    pub mode: SyncMode,
    pub propagate_deletions: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            mode: SyncMode::Incremental,
            propagate_deletions: false,
        }
    }
}

/// Credentials for a token-refresh style HTTP/JSON service (client A).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceACredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub refresh_token: String,
}

impl ServiceACredentials {
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty() && !self.refresh_token.is_empty()
    }
}

/// Credentials for a service wrapping a synchronous library (client B).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceBCredentials {
    pub token: String,
}

impl ServiceBCredentials {
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub daemon: DaemonConfig,
    pub sync: SyncSettings,
    pub service_a: ServiceACredentials,
    pub service_b: ServiceBCredentials,
}

impl AppConfig {
    pub fn is_fully_configured(&self) -> bool {
        self.service_a.is_configured() && self.service_b.is_configured()
    }

    /// Render with every secret-bearing field masked — used for RPC
    /// `status` responses and any log line that might otherwise echo a
    /// config value (spec §6: "secrets are never echoed").
    pub fn masked(&self) -> serde_json::Value {
        serde_json::json!({
            "daemon": { "dashboard_port": self.daemon.dashboard_port, "log_level": self.daemon.log_level },
            "sync": {
                "interval_minutes": self.sync.interval_minutes,
                "mode": self.sync.mode,
                "propagate_deletions": self.sync.propagate_deletions,
            },
            "service_a": {
                "client_id": mask(&self.service_a.client_id),
                "client_secret": mask(&self.service_a.client_secret),
                "redirect_uri": self.service_a.redirect_uri,
                "refresh_token": mask(&self.service_a.refresh_token),
            },
            "service_b": { "token": mask(&self.service_b.token) },
        })
    }
}

fn mask(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

/// Resolved filesystem layout for the daemon's runtime state.
#[derive(Debug, Clone)]
pub struct Paths {
    pub base_dir: PathBuf,
}

impl Paths {
    pub fn discover() -> Result<Self, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.base_dir.join(PID_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        self.base_dir.join(SOCKET_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join(LOG_DIR)
    }

    pub fn store_path(&self) -> PathBuf {
        self.base_dir.join(STORE_FILE)
    }

    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        fs::create_dir_all(&self.base_dir).map_err(|source| ConfigError::Write {
            path: self.base_dir.clone(),
            source,
        })?;
        fs::create_dir_all(self.log_dir()).map_err(|source| ConfigError::Write {
            path: self.log_dir(),
            source,
        })?;
        set_owner_only(&self.base_dir);
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o700);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) {}

/// Load configuration from `path`, falling back to defaults if absent.
/// Warns (via `tracing`) if an existing file is more permissive than
/// 0600.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.is_file() {
        return Ok(AppConfig::default());
    }

    warn_if_permissive(path);

    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn warn_if_permissive(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            tracing::warn!(
                path = %path.display(),
                mode = format!("{mode:o}"),
                "config file permissions are more permissive than 0600"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_permissive(_path: &Path) {}

/// Save configuration to `path`, creating parent directories as needed
/// and restricting the file to owner read/write (0600) per spec §6.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let rendered = toml::to_string_pretty(config)?;
    fs::write(path, rendered).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    restrict_permissions(path);
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_mode(0o600);
        let _ = fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
