use livepipe_db_postgres::PostgresConfig;
use livepipe_repository::{DEFAULT_SLOT_SECONDS, DEFAULT_TERM_END, DEFAULT_TERM_START};
use livepipe_storage::TimeWindow;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Icon image storage
    #[serde(default)]
    pub blobs: BlobConfig,
    /// Reservation term and slot grid
    #[serde(default)]
    pub reservations: ReservationConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Storage validation
        if self.storage.backend == StorageBackend::Postgres {
            let Some(ref pg) = self.storage.postgres else {
                return Err("storage.backend=postgres requires storage.postgres".into());
            };
            if pg.url.is_empty() {
                return Err("storage.postgres.url must not be empty".into());
            }
            if pg.pool_size == 0 {
                return Err("storage.postgres.pool_size must be > 0".into());
            }
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Blob validation
        if self.blobs.backend == BlobBackendKind::Fs && self.blobs.root.is_empty() {
            return Err("blobs.root must not be empty for the fs backend".into());
        }
        if self.blobs.fallback_image.is_empty() {
            return Err("blobs.fallback_image must not be empty".into());
        }
        // Reservation validation
        let r = &self.reservations;
        if r.term_start >= r.term_end {
            return Err("reservations.term_start must be < reservations.term_end".into());
        }
        if r.slot_seconds <= 0 {
            return Err("reservations.slot_seconds must be > 0".into());
        }
        if r.capacity < 0 {
            return Err("reservations.capacity must be >= 0".into());
        }
        // Metrics validation
        if let Some(ref listen) = self.metrics.listen
            && listen.parse::<SocketAddr>().is_err()
        {
            return Err(format!("metrics.listen must be a socket address, got {listen:?}"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    /// Process-local store; data is lost on exit.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_postgres")]
    pub postgres: Option<PostgresConfig>,
}

fn default_postgres() -> Option<PostgresConfig> {
    Some(PostgresConfig::default())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            postgres: default_postgres(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackendKind {
    #[default]
    Fs,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default)]
    pub backend: BlobBackendKind,
    /// Directory holding one file per blob (fs backend)
    #[serde(default = "default_blob_root")]
    pub root: String,
    /// Image served for users without an icon
    #[serde(default = "default_fallback_image")]
    pub fallback_image: String,
}

fn default_blob_root() -> String {
    "img".to_string()
}

fn default_fallback_image() -> String {
    "img/NoImage.jpg".to_string()
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackendKind::default(),
            root: default_blob_root(),
            fallback_image: default_fallback_image(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// Unix seconds
    #[serde(default = "default_term_start")]
    pub term_start: i64,
    /// Unix seconds, exclusive
    #[serde(default = "default_term_end")]
    pub term_end: i64,
    #[serde(default = "default_slot_seconds")]
    pub slot_seconds: i64,
    /// Bookings allowed per slot
    #[serde(default = "default_capacity")]
    pub capacity: i64,
    /// Create the slot grid at startup when no slots exist
    #[serde(default = "default_provision_on_startup")]
    pub provision_on_startup: bool,
}

fn default_term_start() -> i64 {
    DEFAULT_TERM_START
}

fn default_term_end() -> i64 {
    DEFAULT_TERM_END
}

fn default_slot_seconds() -> i64 {
    DEFAULT_SLOT_SECONDS
}

fn default_capacity() -> i64 {
    5
}

fn default_provision_on_startup() -> bool {
    true
}

impl ReservationConfig {
    pub fn term(&self) -> TimeWindow {
        TimeWindow::new(self.term_start, self.term_end)
    }
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            term_start: default_term_start(),
            term_end: default_term_end(),
            slot_seconds: default_slot_seconds(),
            capacity: default_capacity(),
            provision_on_startup: default_provision_on_startup(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Scrape endpoint address; unset keeps metrics in-process only
    #[serde(default = "default_metrics_listen")]
    pub listen: Option<String>,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> Option<String> {
    Some("0.0.0.0:9100".to_string())
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File, FileFormat};
    use std::path::PathBuf;

    /// Default configuration file, relative to the working directory.
    pub const DEFAULT_CONFIG_PATH: &str = "livepipe.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., LIVEPIPE__STORAGE__BACKEND=memory
        builder = builder.add_source(
            Environment::with_prefix("LIVEPIPE")
                .try_parsing(true)
                .separator("__"),
        );
        finish(builder)
    }

    /// Loads configuration from TOML text, without environment overrides.
    pub fn load_config_from_str(toml: &str) -> Result<AppConfig, String> {
        finish(Config::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    fn finish(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<AppConfig, String> {
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
