//! Configuration management
//!
//! YAML configuration with:
//! - Multiple configuration file locations
//! - Environment variable overrides (prefixed with `CERTKEEPER_`)
//! - Default values for all settings, so an empty file is valid

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::SubjectDefaults;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "CERTKEEPER_CONFIG";

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Upper bound on graceful shutdown, in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Subject attributes used when a request omits them
    #[serde(default)]
    pub defaults: SubjectDefaults,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: default_shutdown_timeout(),
            manager: ManagerConfig::default(),
            defaults: SubjectDefaults::default(),
            agent: AgentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Certificate manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManagerConfig {
    /// Seconds between two full scans of the request directories
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub certificate_requests: CertificateRequestsConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            certificate_requests: CertificateRequestsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CertificateRequestsConfig {
    /// Directories holding request descriptors
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

/// Remote agent configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// TLS configuration (if not set, the agent serves plain HTTP)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            tls: None,
        }
    }
}

/// TLS configuration of the agent endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to the server certificate chain (PEM format)
    pub cert_file: PathBuf,
    /// Path to the server private key (PEM format)
    pub key_file: PathBuf,
    /// CA used to verify client certificates; also appended to the served chain
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Minimum TLS version (1.2 or 1.3, defaults to 1.3)
    #[serde(default = "default_min_tls_version")]
    pub min_version: String,
    /// Reject clients that do not present a certificate signed by `ca_file`
    #[serde(default)]
    pub require_client_cert: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log output target (console, file or both)
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file" or "both")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    #[serde(default = "default_log_rotation")]
    pub daily_rotation: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: default_log_rotation(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to stdout
    #[default]
    Console,
    /// Log to file with optional daily rotation
    File,
    /// Log to both console and file
    Both,
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_interval() -> u64 {
    300
}

fn default_listen() -> String {
    "0.0.0.0:4293".to_string()
}

fn default_min_tls_version() -> String {
    "1.3".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/certkeeper")
}

fn default_log_prefix() -> String {
    "certkeeper".to_string()
}

fn default_log_rotation() -> bool {
    true
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (`explicit_path`, `CERTKEEPER_CONFIG`, then the
    ///    standard locations)
    /// 3. Environment variables (prefixed with `CERTKEEPER_`)
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV_VAR).map(PathBuf::from).ok())
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => Self::from_file(path)?,
            Some(ref path) if explicit_path.is_some() => {
                anyhow::bail!("Configuration file not found: {:?}", path)
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse the YAML configuration file at `path`
    pub fn from_file(path: &Path) -> Result<Self> {
        eprintln!("[CONFIG] Loading configuration from: {:?}", path);
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_yaml(&contents).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(AppConfig::default());
        }
        Ok(serde_norway::from_str(contents)?)
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/certkeeper/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("certkeeper/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides looked up through `var`
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = var("CERTKEEPER_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.manager.interval_secs = secs;
        }
        if let Some(paths) = var("CERTKEEPER_REQUEST_PATHS") {
            self.manager.certificate_requests.paths = paths
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(secs) = var("CERTKEEPER_SHUTDOWN_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.shutdown_timeout_secs = secs;
        }
        if let Some(listen) = var("CERTKEEPER_AGENT_LISTEN") {
            self.agent.listen = listen;
        }

        if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Some(format) = var("CERTKEEPER_LOG_FORMAT") {
            self.logging.format = LogFormat::from_name(&format);
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.manager.interval_secs == 0 {
            anyhow::bail!("Manager interval cannot be 0");
        }

        self.listen_addr()?;

        if let Some(ref tls) = self.agent.tls {
            if !tls.cert_file.exists() {
                anyhow::bail!("TLS certificate file not found: {:?}", tls.cert_file);
            }
            if !tls.key_file.exists() {
                anyhow::bail!("TLS key file not found: {:?}", tls.key_file);
            }
            if tls.min_version != "1.2" && tls.min_version != "1.3" {
                anyhow::bail!(
                    "Invalid TLS minimum version: {}. Must be '1.2' or '1.3'",
                    tls.min_version
                );
            }
            match tls.ca_file {
                Some(ref ca) if !ca.exists() => {
                    anyhow::bail!("TLS CA file not found: {:?}", ca);
                }
                None if tls.require_client_cert => {
                    anyhow::bail!("Client certificate enforcement requires a CA file");
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Socket address of the agent endpoint
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.agent
            .listen
            .parse()
            .with_context(|| format!("Invalid agent listen address: {}", self.agent.listen))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.manager.interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
