//! Configuration management for the conversion gateway

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub converter: ConverterConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body
    pub max_upload_bytes: usize,
    /// How long a quarantined process waits for open connections before exiting anyway
    pub quarantine_grace_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub engine_path: String,
    /// Holds staged uploads and the well-known output file
    pub work_dir: PathBuf,
    pub profile_dir: PathBuf,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    /// Treat "cannot load this file" from the engine as recoverable
    pub trust_content_rejections: bool,
}

impl ConverterConfig {
    /// Timeout for a request, clamped to the configured maximum
    pub fn timeout(&self, requested_ms: Option<u64>) -> Duration {
        let ms = requested_ms
            .unwrap_or(self.default_timeout_ms)
            .min(self.max_timeout_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

fn default_work_dir() -> PathBuf {
    env::temp_dir().join("docconvert")
}

impl Default for Config {
    fn default() -> Self {
        let work_dir = default_work_dir();
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                max_upload_bytes: 256 * 1024 * 1024,
                quarantine_grace_ms: 5_000,
            },
            converter: ConverterConfig {
                engine_path: "soffice".to_string(),
                profile_dir: work_dir.join("profile"),
                work_dir,
                default_timeout_ms: 1_000,
                max_timeout_ms: 600_000,
                trust_content_rejections: false,
            },
        }
    }
}

/// Parse `key` if set, otherwise use `default`
fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let work_dir = env::var("CONVERT_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.converter.work_dir);
        let profile_dir = env::var("CONVERT_PROFILE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| work_dir.join("profile"));

        Ok(Config {
            server: ServerConfig {
                host: env::var("CONVERT_HOST").unwrap_or(defaults.server.host),
                port: parse_var("CONVERT_PORT", defaults.server.port)?,
                max_upload_bytes: parse_var(
                    "CONVERT_MAX_UPLOAD_BYTES",
                    defaults.server.max_upload_bytes,
                )?,
                quarantine_grace_ms: parse_var(
                    "CONVERT_QUARANTINE_GRACE_MS",
                    defaults.server.quarantine_grace_ms,
                )?,
            },
            converter: ConverterConfig {
                engine_path: env::var("CONVERT_ENGINE_PATH")
                    .unwrap_or(defaults.converter.engine_path),
                work_dir,
                profile_dir,
                default_timeout_ms: parse_var(
                    "CONVERT_DEFAULT_TIMEOUT_MS",
                    defaults.converter.default_timeout_ms,
                )?,
                max_timeout_ms: parse_var(
                    "CONVERT_MAX_TIMEOUT_MS",
                    defaults.converter.max_timeout_ms,
                )?,
                trust_content_rejections: parse_var(
                    "CONVERT_TRUST_CONTENT_REJECTIONS",
                    defaults.converter.trust_content_rejections,
                )?,
            },
        })
    }
}
