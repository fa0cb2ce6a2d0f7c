use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub streaming: StreamingConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Seconds to wait for in-flight requests on shutdown
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8080,
            shutdown_grace_seconds: 10,
        }
    }
}

/// Leave `url` empty to run on in-memory stores
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// HMAC key for stream tokens. Rotating it invalidates all outstanding URLs.
    pub token_secret: String,
    pub token_ttl_seconds: u64,
    /// Root of the on-disk catalog: `{media_root}/{video_id}/{quality}.{ext}`
    pub media_root: String,
    /// Prefix used when building signed stream URLs
    pub public_base_url: String,
    /// Cut a transfer off once its token expires instead of only checking at start
    pub enforce_expiry_mid_stream: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            token_ttl_seconds: 7200,
            media_root: "./media".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            enforce_expiry_mid_stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub default_frequency_secs: i64,
    pub max_retries: u32,
    /// Position delta (seconds) above which replicas are considered in conflict
    pub conflict_threshold_secs: f64,
    pub scan_interval_ms: u64,
    /// Concurrent reconciliations per scan
    pub worker_pool_size: usize,
    pub scan_batch_limit: usize,
    pub retention_days: i64,
    pub cleanup_interval_hours: u64,
    pub overdue_warning_secs: i64,
    pub delivery_retry_attempts: usize,
    pub delivery_retry_delay_ms: u64,
    pub session_fetch_retries: usize,
    /// Run conflict detection on a session after each successful reconcile
    pub detect_conflicts_on_reconcile: bool,
    /// Idle time before a per-device dispatch worker exits
    pub dispatch_idle_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_frequency_secs: 5,
            max_retries: 3,
            conflict_threshold_secs: 5.0,
            scan_interval_ms: 1000,
            worker_pool_size: 10,
            scan_batch_limit: 1000,
            retention_days: 30,
            cleanup_interval_hours: 24,
            overdue_warning_secs: 30,
            delivery_retry_attempts: 3,
            delivery_retry_delay_ms: 200,
            session_fetch_retries: 3,
            detect_conflicts_on_reconcile: false,
            dispatch_idle_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // PLAYSYNC_STREAMING__TOKEN_SECRET, PLAYSYNC_SYNC__MAX_RETRIES, ...
        builder = builder.add_source(
            Environment::with_prefix("PLAYSYNC")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    #[must_use]
    pub fn uses_database(&self) -> bool {
        !self.database.url.trim().is_empty()
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Collect every problem instead of failing on the first one
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.streaming.token_secret.len() < 32 {
            errors.push("streaming.token_secret must be at least 32 bytes".to_string());
        }
        if self.streaming.token_ttl_seconds == 0 {
            errors.push("streaming.token_ttl_seconds must be positive".to_string());
        }
        if self.sync.default_frequency_secs <= 0 {
            errors.push("sync.default_frequency_secs must be positive".to_string());
        }
        if self.sync.conflict_threshold_secs <= 0.0 {
            errors.push("sync.conflict_threshold_secs must be positive".to_string());
        }
        if self.sync.worker_pool_size == 0 {
            errors.push("sync.worker_pool_size must be positive".to_string());
        }
        if self.sync.scan_interval_ms == 0 {
            errors.push("sync.scan_interval_ms must be positive".to_string());
        }
        if self.sync.scan_batch_limit == 0 {
            errors.push("sync.scan_batch_limit must be positive".to_string());
        }
        if self.sync.retention_days <= 0 {
            errors.push("sync.retention_days must be positive".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got {:?}",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
