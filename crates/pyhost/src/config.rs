//! Layered application configuration.
//!
//! Values come from built-in defaults, then the TOML config file, then
//! `PYHOST__SECTION__KEY` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "pyhost";

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub runtime: RuntimeConfig,
    pub watcher: WatcherConfig,
    pub logs: LogsConfig,
    pub logging: LoggingConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body limit in megabytes; ZIP uploads arrive base64-encoded.
    pub max_upload_mb: usize,
    /// Allowed CORS origins. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_upload_mb: 50,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `<data_dir>/pyhost.db`.
    pub path: Option<String>,
}

/// Interpreter and workspace settings for supervised processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory holding one workspace per project. Defaults to `<data_dir>/runtime`.
    pub workspace_root: Option<String>,
    /// Interpreter executable.
    pub python_binary: String,
    /// Arguments placed before the entry file (`-u` keeps output unbuffered).
    pub interpreter_args: Vec<String>,
    /// Dependency manifest looked for in the stored tree.
    pub requirements_file: String,
    /// Extra arguments for `pip install`.
    pub pip_args: Vec<String>,
    /// Seconds to wait after SIGTERM before sending SIGKILL. `0` disables escalation.
    pub stop_escalation_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workspace_root: None,
            python_binary: "python3".to_string(),
            interpreter_args: vec!["-u".to_string()],
            requirements_file: "requirements.txt".to_string(),
            pip_args: vec!["--user".to_string(), "--break-system-packages".to_string()],
            stop_escalation_secs: 0,
        }
    }
}

impl RuntimeConfig {
    pub fn stop_escalation(&self) -> Option<Duration> {
        (self.stop_escalation_secs > 0).then(|| Duration::from_secs(self.stop_escalation_secs))
    }
}

/// Filesystem watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Quiescence window per path before reconciling.
    pub debounce_ms: u64,
    /// Capacity of the raw event channel between notify and the reconciler.
    pub channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            channel_capacity: 256,
        }
    }
}

impl WatcherConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Log fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Per-subscriber buffer; lines beyond it are dropped for that subscriber.
    pub subscriber_buffer: usize,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolved filesystem locations.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database: PathBuf,
    pub workspace_root: PathBuf,
}

impl AppPaths {
    /// Resolve the config file location, honoring an explicit override.
    pub fn config_file(override_path: Option<PathBuf>) -> Result<PathBuf> {
        match override_path {
            Some(path) => expand_path(path),
            None => Ok(default_config_dir()?.join("config.toml")),
        }
    }

    /// Resolve data locations from the loaded configuration.
    pub fn resolve(config_file: PathBuf, config: &AppConfig) -> Result<Self> {
        let data_dir = default_data_dir()?;
        let database = match &config.database.path {
            Some(path) => expand_str_path(path)?,
            None => data_dir.join(format!("{APP_NAME}.db")),
        };
        let workspace_root = match &config.runtime.workspace_root {
            Some(path) => expand_str_path(path)?,
            None => data_dir.join("runtime"),
        };
        Ok(Self {
            config_file,
            data_dir,
            database,
            workspace_root,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating data directory {}", self.data_dir.display()))?;
        fs::create_dir_all(&self.workspace_root).with_context(|| {
            format!(
                "creating workspace root {}",
                self.workspace_root.display()
            )
        })?;
        Ok(())
    }
}

impl std::fmt::Display for AppPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "config: {}, data: {}, database: {}, workspaces: {}",
            self.config_file.display(),
            self.data_dir.display(),
            self.database.display(),
            self.workspace_root.display()
        )
    }
}

/// Load the configuration, writing a default file first if none exists.
pub fn load_or_init_config(config_file: &Path) -> Result<AppConfig> {
    if !config_file.exists() {
        write_default_config(config_file)?;
    }
    load_config(config_file)
}

/// Load the configuration without touching the filesystem.
pub fn load_config(config_file: &Path) -> Result<AppConfig> {
    let defaults = AppConfig::default();
    let built = Config::builder()
        .set_default("server.host", defaults.server.host.clone())?
        .set_default("server.port", i64::from(defaults.server.port))?
        .set_default("watcher.debounce_ms", defaults.watcher.debounce_ms as i64)?
        .set_default("logging.level", defaults.logging.level.clone())?
        .add_source(
            File::from(config_file)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(&env_prefix())
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let config: AppConfig = built
        .try_deserialize()
        .context("deserializing configuration")?;
    Ok(config)
}

fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let config = AppConfig::default();
    let toml = toml::to_string_pretty(&config).context("serializing default config to TOML")?;
    let mut body = String::new();
    body.push_str("# Configuration for ");
    body.push_str(APP_NAME);
    body.push('\n');
    body.push_str("# File: ");
    body.push_str(&path.display().to_string());
    body.push_str("\n\n");
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn expand_path(path: PathBuf) -> Result<PathBuf> {
    if let Some(text) = path.to_str() {
        expand_str_path(text)
    } else {
        Ok(path)
    }
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::data_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".local").join("share").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}

fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
