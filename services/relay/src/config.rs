use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Smallest part size S3 accepts for every part but the last
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration for the relay service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Upload pipeline configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// Local staging configuration
    #[serde(default)]
    pub staging: StagingConfig,
    /// Object store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Directory served under `/replays`
    #[serde(default = "default_replays_dir")]
    pub replays_dir: PathBuf,
}

/// Which forms of an upload get relayed to the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// Relay the uploaded replay only; no decoding
    Original,
    /// Decode and relay only the derived JSON
    Derived,
    /// Relay the replay, then its derived JSON
    Both,
}

impl RelayMode {
    pub fn relays_original(self) -> bool {
        matches!(self, RelayMode::Original | RelayMode::Both)
    }

    pub fn relays_derived(self) -> bool {
        matches!(self, RelayMode::Derived | RelayMode::Both)
    }
}

/// Upload pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted replay size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Which objects get relayed
    #[serde(default = "default_relay_mode")]
    pub relay_mode: RelayMode,
    /// Timeout for a single object store call in seconds
    #[serde(default = "default_relay_timeout_secs")]
    pub relay_timeout_secs: u64,
    /// Reject uploads without owner/artifact identifiers
    #[serde(default = "default_true")]
    pub require_identifiers: bool,
    /// Multipart field carrying the replay
    #[serde(default = "default_file_field")]
    pub file_field: String,
}

/// Local staging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// Directory holding in-flight uploads
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

/// Object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    S3,
    Local,
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Backend to relay to
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    /// S3 bucket name for replays
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// First key segment of every relayed object
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Root directory for the local backend
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "replay-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_replays_dir() -> PathBuf {
    PathBuf::from("./replays")
}

fn default_max_upload_bytes() -> u64 {
    10 << 20 // 10MB
}

fn default_relay_mode() -> RelayMode {
    RelayMode::Both
}

fn default_relay_timeout_secs() -> u64 {
    30
}

fn default_file_field() -> String {
    "repFile".to_string()
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("replay-relay")
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::S3
}

fn default_bucket() -> String {
    "screp".to_string()
}

fn default_region() -> String {
    "ap-northeast-2".to_string()
}

fn default_key_prefix() -> String {
    "replays".to_string()
}

fn default_local_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> Result<Self, ConfigError> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .map(i64::from);

        let config = config::Config::builder()
            .set_default("service.name", "replay-relay")?
            .set_default("service.log_level", "info")?
            .add_source(config::File::with_name("config/relay").required(false))
            .add_source(config::File::with_name("/etc/replay-relay/relay").required(false))
            // RELAY__STORE__BUCKET -> store.bucket
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            // Plain PORT, as set by most hosting platforms
            .set_override_option("api.port", port)?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid(
                "upload.max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if self.upload.relay_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "upload.relay_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.upload.file_field.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "upload.file_field must not be empty".to_string(),
            ));
        }
        if self.store.backend == StoreBackend::S3 {
            if self.store.bucket.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "store.bucket is required for the s3 backend".to_string(),
                ));
            }
            if self.store.part_size_bytes < MIN_PART_SIZE {
                return Err(ConfigError::Invalid(format!(
                    "store.part_size_bytes must be at least {} bytes",
                    MIN_PART_SIZE
                )));
            }
        }
        Ok(())
    }

    /// Get the per-call relay timeout as Duration
    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.relay_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            api: ApiConfig::default(),
            upload: UploadConfig::default(),
            staging: StagingConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            replays_dir: default_replays_dir(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            relay_mode: default_relay_mode(),
            relay_timeout_secs: default_relay_timeout_secs(),
            require_identifiers: true,
            file_field: default_file_field(),
        }
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            key_prefix: default_key_prefix(),
            local_root: default_local_root(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
        }
    }
}
