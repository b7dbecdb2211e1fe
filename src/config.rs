//! # Configuration
//!
//! Client and logging settings loaded from environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BERGLAS_STORAGE_ENDPOINT` | `https://storage.googleapis.com` |
//! | `BERGLAS_KMS_ENDPOINT` | `https://cloudkms.googleapis.com` |
//! | `BERGLAS_SECRETMANAGER_ENDPOINT` | `https://secretmanager.googleapis.com` |
//! | `BERGLAS_ACCESS_TOKEN` | unset (metadata server) |
//! | `BERGLAS_HTTP_TIMEOUT_SECS` | `30` |
//! | `BERGLAS_RETRY_ATTEMPTS` | `5` |
//! | `BERGLAS_RETRY_BASE_MS` | `250` |
//! | `BERGLAS_RETRY_MAX_MS` | `30000` |
//! | `BERGLAS_DELETE_WORKERS` | available parallelism |
//! | `BERGLAS_CONTINUE_ON_ERROR` | `false` |
//! | `BERGLAS_LOG_LEVEL` | `warn` |
//! | `BERGLAS_LOG_FORMAT` | `text` |
//!
//! When `PACT_MODE` is set the endpoints fall back to the `GCP_*_ENDPOINT`
//! variables used by the contract tests and a fixed test token is used.

use crate::constants::{
    user_agent, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_KMS_ENDPOINT, DEFAULT_RETRY_ATTEMPTS,
    DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_MS, DEFAULT_SECRET_MANAGER_ENDPOINT,
    DEFAULT_STORAGE_ENDPOINT,
};
use crate::retry::RetryPolicy;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Settings for [`crate::Client`] and the REST providers
#[derive(Clone)]
pub struct ClientConfig {
    /// Cloud Storage JSON API base URL
    pub storage_endpoint: String,
    /// Cloud KMS base URL
    pub kms_endpoint: String,
    /// Secret Manager base URL
    pub secret_manager_endpoint: String,
    /// Static OAuth2 bearer token; the metadata server is queried when unset
    pub access_token: Option<String>,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// User agent sent on every request
    pub user_agent: String,
    /// Retry schedule for policy updates and environment lookups
    pub retry: RetryPolicy,
    /// Deletion worker pool size; available parallelism when unset
    pub delete_workers: Option<usize>,
    /// Log and skip failed references during auto import instead of failing
    pub continue_on_error: bool,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("storage_endpoint", &self.storage_endpoint)
            .field("kms_endpoint", &self.kms_endpoint)
            .field("secret_manager_endpoint", &self.secret_manager_endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("http_timeout", &self.http_timeout)
            .field("retry", &self.retry)
            .field("delete_workers", &self.delete_workers)
            .field("continue_on_error", &self.continue_on_error)
            .finish_non_exhaustive()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            kms_endpoint: DEFAULT_KMS_ENDPOINT.to_string(),
            secret_manager_endpoint: DEFAULT_SECRET_MANAGER_ENDPOINT.to_string(),
            access_token: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            user_agent: user_agent(),
            retry: RetryPolicy::default(),
            delete_workers: None,
            continue_on_error: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let pact_mode = std::env::var("PACT_MODE").is_ok();
        let endpoint = |key: &str, pact_key: &str, default: &str| {
            std::env::var(key)
                .ok()
                .or_else(|| pact_mode.then(|| std::env::var(pact_key).ok()).flatten())
                .unwrap_or_else(|| default.to_string())
        };

        let access_token = std::env::var("BERGLAS_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| pact_mode.then(|| "test-token".to_string()));

        Self {
            storage_endpoint: endpoint(
                "BERGLAS_STORAGE_ENDPOINT",
                "GCP_STORAGE_ENDPOINT",
                DEFAULT_STORAGE_ENDPOINT,
            ),
            kms_endpoint: endpoint("BERGLAS_KMS_ENDPOINT", "GCP_KMS_ENDPOINT", DEFAULT_KMS_ENDPOINT),
            secret_manager_endpoint: endpoint(
                "BERGLAS_SECRETMANAGER_ENDPOINT",
                "GCP_SECRET_MANAGER_ENDPOINT",
                DEFAULT_SECRET_MANAGER_ENDPOINT,
            ),
            access_token,
            http_timeout: Duration::from_secs(env_var_or_default(
                "BERGLAS_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
            user_agent: user_agent(),
            retry: RetryPolicy {
                attempts: env_var_or_default("BERGLAS_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS),
                base: Duration::from_millis(env_var_or_default(
                    "BERGLAS_RETRY_BASE_MS",
                    DEFAULT_RETRY_BASE_MS,
                )),
                max: Duration::from_millis(env_var_or_default(
                    "BERGLAS_RETRY_MAX_MS",
                    DEFAULT_RETRY_MAX_MS,
                )),
            },
            delete_workers: std::env::var("BERGLAS_DELETE_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n| *n > 0),
            continue_on_error: env_var_or_default_bool("BERGLAS_CONTINUE_ON_ERROR", false),
        }
    }

    /// Size of the deletion worker pool (never below 1)
    #[must_use]
    pub fn delete_worker_count(&self) -> usize {
        self.delete_workers
            .unwrap_or_else(|| {
                std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
            })
            .max(1)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("invalid log format {other:?}, expected text or json")),
        }
    }
}

/// Log level names accepted by `BERGLAS_LOG_LEVEL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `EnvFilter`
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" | "" => Ok(LogLevel::Warn),
            "error" | "fatal" | "panic" => Ok(LogLevel::Error),
            other => Err(format!("invalid log level {other:?}")),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Load from `BERGLAS_LOG_LEVEL` and `BERGLAS_LOG_FORMAT`, ignoring bad values
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            level: env_var_or_default("BERGLAS_LOG_LEVEL", LogLevel::default()),
            format: env_var_or_default("BERGLAS_LOG_FORMAT", LogFormat::default()),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> bool {
    let v_lower = value.trim().to_lowercase();
    v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.storage_endpoint, "https://storage.googleapis.com");
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.base, Duration::from_millis(250));
        assert!(!config.continue_on_error);
        assert!(config.delete_worker_count() >= 1);
    }

    #[test]
    fn test_delete_workers_floor() {
        let config = ClientConfig {
            delete_workers: Some(0),
            ..ClientConfig::default()
        };
        assert_eq!(config.delete_worker_count(), 1);
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig {
            access_token: Some("ya29.secret".to_string()),
            ..ClientConfig::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("ya29.secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_log_parsing() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());

        assert_eq!("DEBUG".parse::<LogLevel>(), Ok(LogLevel::Debug));
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("fatal".parse::<LogLevel>(), Ok(LogLevel::Error));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_parse_bool() {
        for truthy in ["true", "TRUE", "1", "yes", "on"] {
            assert!(parse_bool(truthy), "{truthy}");
        }
        for falsy in ["false", "0", "no", ""] {
            assert!(!parse_bool(falsy), "{falsy}");
        }
    }
}
