//! Configuration loading for the movies ETL.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/movies-etl/config.toml`.
//! Environment variables use the `ETL__` prefix and `__` as the section
//! separator, e.g. `ETL__POSTGRES__HOST` or `ETL__PIPELINE__PAGE_SIZE`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::entity::EntityKind;
use crate::error::EtlError;

/// Source database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSettings {
    #[serde(default = "default_pg_host")]
    pub host: String,

    #[serde(default = "default_pg_port")]
    pub port: u16,

    #[serde(default = "default_pg_dbname")]
    pub dbname: String,

    #[serde(default = "default_pg_user")]
    pub user: String,

    /// Password (normally supplied through `ETL__POSTGRES__PASSWORD`)
    #[serde(default)]
    pub password: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Schema holding the content tables
    #[serde(default = "default_pg_schema")]
    pub schema: String,
}

fn default_pg_host() -> String {
    "127.0.0.1".to_string()
}

fn default_pg_port() -> u16 {
    5432
}

fn default_pg_dbname() -> String {
    "movies_database".to_string()
}

fn default_pg_user() -> String {
    "app".to_string()
}

fn default_connect_timeout() -> u64 {
    1
}

fn default_pg_schema() -> String {
    "content".to_string()
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            host: default_pg_host(),
            port: default_pg_port(),
            dbname: default_pg_dbname(),
            user: default_pg_user(),
            password: String::new(),
            connect_timeout_secs: default_connect_timeout(),
            schema: default_pg_schema(),
        }
    }
}

/// Search index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchSettings {
    /// Base URL of the cluster
    #[serde(default = "default_es_url")]
    pub url: String,

    /// Target index name
    #[serde(default = "default_es_index")]
    pub index: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_es_timeout")]
    pub timeout_secs: u64,

    /// Create the index with the bundled mapping when it is missing
    #[serde(default = "default_true")]
    pub create_index: bool,
}

fn default_es_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_es_index() -> String {
    "movies".to_string()
}

fn default_es_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for ElasticsearchSettings {
    fn default() -> Self {
        Self {
            url: default_es_url(),
            index: default_es_index(),
            timeout_secs: default_es_timeout(),
            create_index: true,
        }
    }
}

/// Checkpoint store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    /// Path to the RocksDB directory
    #[serde(default = "default_checkpoint_path")]
    pub path: String,
}

fn default_checkpoint_path() -> String {
    ProjectDirs::from("", "", "movies-etl")
        .map(|p| p.data_local_dir().join("state"))
        .unwrap_or_else(|| PathBuf::from("./state"))
        .to_string_lossy()
        .to_string()
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
        }
    }
}

impl CheckpointSettings {
    /// Expand `~/` in the configured path.
    pub fn expanded_path(&self) -> PathBuf {
        if let Some(rest) = self.path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new() {
                return home.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.path)
    }
}

/// Polling loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Entity kinds polled on every cycle, in order
    #[serde(default = "default_entities")]
    pub entities: Vec<EntityKind>,

    /// Rows fetched per change-detection query
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Aggregates fetched per enrichment page
    #[serde(default = "default_enrich_page_size")]
    pub enrich_page_size: usize,

    /// Pause after each entity pass, in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_entities() -> Vec<EntityKind> {
    EntityKind::ALL.to_vec()
}

fn default_page_size() -> usize {
    1000
}

fn default_enrich_page_size() -> usize {
    100
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            entities: default_entities(),
            page_size: default_page_size(),
            enrich_page_size: default_enrich_page_size(),
            delay_ms: default_delay_ms(),
        }
    }
}

impl PipelineSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Retry timing shared by every external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// First retry delay in milliseconds
    #[serde(default = "default_backoff_start")]
    pub start_ms: u64,

    /// Growth factor between retries
    #[serde(default = "default_backoff_factor")]
    pub factor: f64,

    /// Upper bound for a single delay in milliseconds
    #[serde(default = "default_backoff_border")]
    pub border_ms: u64,
}

fn default_backoff_start() -> u64 {
    100
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_backoff_border() -> u64 {
    10_000
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            start_ms: default_backoff_start(),
            factor: default_backoff_factor(),
            border_ms: default_backoff_border(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub postgres: PostgresSettings,

    #[serde(default)]
    pub elasticsearch: ElasticsearchSettings,

    #[serde(default)]
    pub checkpoint: CheckpointSettings,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub backoff: BackoffSettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/movies-etl/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (ETL__*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, EtlError> {
        let config_dir = ProjectDirs::from("", "", "movies-etl")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| EtlError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("ETL")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("pipeline.entities")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| EtlError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| EtlError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), EtlError> {
        if self.pipeline.entities.is_empty() {
            return Err(EtlError::Config("pipeline.entities must not be empty".into()));
        }
        if self.pipeline.page_size == 0 {
            return Err(EtlError::Config("pipeline.page_size must be > 0".into()));
        }
        if self.pipeline.enrich_page_size == 0 {
            return Err(EtlError::Config(
                "pipeline.enrich_page_size must be > 0".into(),
            ));
        }
        if self.backoff.factor < 1.0 {
            return Err(EtlError::Config(format!(
                "backoff.factor must be >= 1, got {}",
                self.backoff.factor
            )));
        }
        if self.backoff.start_ms == 0 || self.backoff.start_ms > self.backoff.border_ms {
            return Err(EtlError::Config(format!(
                "backoff.start_ms must be in 1..={}, got {}",
                self.backoff.border_ms, self.backoff.start_ms
            )));
        }
        // The schema name is spliced into SQL, so only plain identifiers pass
        let schema = &self.postgres.schema;
        if schema.is_empty()
            || !schema
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(EtlError::Config(format!(
                "postgres.schema must be a plain identifier, got {:?}",
                schema
            )));
        }
        if self.elasticsearch.index.is_empty() {
            return Err(EtlError::Config("elasticsearch.index must not be empty".into()));
        }
        Ok(())
    }
}
