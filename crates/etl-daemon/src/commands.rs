//! Command implementations for the ETL daemon.
//!
//! `run` and `ensure-index` talk to the external systems; the remaining
//! commands only read or edit the local checkpoint store, which RocksDB
//! locks while a daemon is running.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tokio::signal;
use tracing::{error, info};

use etl_pipeline::{loader, watermark_key, BackoffPolicy, PgSource, Pipeline, PipelineConfig};
use etl_search::{movies_mapping, ElasticIndex, SearchIndex};
use etl_storage::{CheckpointStore, Storage};
use etl_types::{Checkpoint, EntityKind, FailedWrite, LogFormat, Settings, Stage};

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level));

    let installed = match settings.log_format {
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    installed.context("Failed to set tracing subscriber")
}

/// Completes on the first SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Open the checkpoint store, creating parent directories if needed.
pub fn open_storage(settings: &Settings) -> Result<Storage> {
    let path = settings.checkpoint.expanded_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create checkpoint directory")?;
    }
    Storage::open(&path)
        .with_context(|| format!("Failed to open checkpoint store at {:?} (is a daemon running?)", path))
}

/// Run the pipeline.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open the checkpoint store
/// 3. Wait for PostgreSQL, connect to Elasticsearch
/// 4. Replay unfinished work, then poll until SIGINT/SIGTERM
///
/// With `once`, every entity kind is drained a single time instead.
pub async fn run_daemon(
    config_path: Option<&str>,
    log_level_override: Option<&str>,
    once: bool,
) -> Result<()> {
    let settings = load_settings(config_path, log_level_override)?;
    init_logging(&settings)?;

    info!("Movies ETL starting...");
    info!("Configuration:");
    info!("  PostgreSQL: {}:{}/{}", settings.postgres.host, settings.postgres.port, settings.postgres.dbname);
    info!("  Elasticsearch: {} (index {})", settings.elasticsearch.url, settings.elasticsearch.index);
    info!("  Checkpoints: {}", settings.checkpoint.path);
    info!("  Log level: {}", settings.log_level);

    let storage = Arc::new(open_storage(&settings)?);
    let stats = storage.get_stats().context("Failed to read checkpoint store stats")?;
    info!(
        keys = ?stats.keys_per_stage,
        disk_usage_bytes = stats.disk_usage_bytes,
        "Checkpoint store opened"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let startup = async {
        let policy = BackoffPolicy::from_settings(&settings.backoff);
        let source = PgSource::connect(&settings.postgres, policy).await;
        let index = ElasticIndex::from_settings(&settings.elasticsearch)
            .context("Failed to build Elasticsearch client")?;
        let mapping = if settings.elasticsearch.create_index {
            Some(movies_mapping().context("Bundled index mapping is invalid")?)
        } else {
            None
        };
        let store: Arc<dyn CheckpointStore> = storage.clone();
        let pipeline = Pipeline::build(
            Arc::new(source),
            Arc::new(index),
            store,
            PipelineConfig::from_settings(&settings),
            mapping,
        )
        .await
        .context("Failed to start pipeline")?;
        anyhow::Ok(pipeline)
    };

    // Startup retries forever while dependencies are down, so it must be
    // interruptible too. Stopping mid-way is safe: checkpoints replay it.
    let mut pipeline = tokio::select! {
        _ = &mut shutdown => {
            storage.flush().context("Failed to flush checkpoint store")?;
            return Ok(());
        }
        pipeline = startup => pipeline?,
    };

    if once {
        tokio::select! {
            _ = &mut shutdown => {}
            report = pipeline.run_once() => {
                let report = report.context("Pipeline pass failed")?;
                info!(detected = ?report.detected, "Single pass finished");
            }
        }
    } else {
        pipeline.run(shutdown).await.context("Pipeline failed")?;
    }

    storage.flush().context("Failed to flush checkpoint store")?;
    info!("Movies ETL stopped");
    Ok(())
}

/// Create the search index with the bundled mapping unless it exists.
pub async fn ensure_index(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, log_level_override)?;
    init_logging(&settings)?;

    let index = ElasticIndex::from_settings(&settings.elasticsearch)
        .context("Failed to build Elasticsearch client")?;
    let name = &settings.elasticsearch.index;
    if index.exists(name).await.context("Failed to check index")? {
        println!("Index '{}' already exists", name);
        return Ok(());
    }
    let mapping = movies_mapping().context("Bundled index mapping is invalid")?;
    index
        .create(name, &mapping)
        .await
        .with_context(|| format!("Failed to create index '{}'", name))?;
    println!("Created index '{}'", name);
    Ok(())
}

/// Decoded checkpoints of the given stages, one JSON object per namespace.
pub fn state_json(store: &dyn CheckpointStore, stages: &[Stage]) -> Result<Value> {
    let mut namespaces = Map::new();
    for &stage in stages {
        let mut entries = Map::new();
        for (key, bytes) in store
            .all(stage)
            .with_context(|| format!("Failed to read {} checkpoints", stage))?
        {
            let checkpoint = Checkpoint::from_bytes(&bytes)
                .with_context(|| format!("Corrupt checkpoint {}/{}", stage, key))?;
            entries.insert(key, serde_json::to_value(checkpoint)?);
        }
        namespaces.insert(stage.to_string(), Value::Object(entries));
    }
    Ok(Value::Object(namespaces))
}

/// The failed bulk-write log, oldest first, optionally cut to the last `limit`.
pub fn recent_failures(store: &dyn CheckpointStore, limit: Option<usize>) -> Result<Vec<FailedWrite>> {
    let Some(bytes) = store
        .get(Stage::Loader, loader::FAILED_KEY)
        .context("Failed to read failure log")?
    else {
        return Ok(Vec::new());
    };
    let mut log = match Checkpoint::from_bytes(&bytes).context("Corrupt failure log")? {
        Checkpoint::FailedWrites(log) => log,
        other => anyhow::bail!("Expected failed-write log, found {}", other.kind()),
    };
    if let Some(limit) = limit {
        let skip = log.len().saturating_sub(limit);
        log.drain(..skip);
    }
    Ok(log)
}

/// Delete an entity's watermark. Returns whether one was stored.
pub fn remove_watermark(store: &dyn CheckpointStore, entity: EntityKind) -> Result<bool> {
    let key = watermark_key(entity);
    let existed = store
        .get(Stage::Extractor, &key)
        .context("Failed to read watermark")?
        .is_some();
    if existed {
        store
            .delete(Stage::Extractor, &key)
            .context("Failed to delete watermark")?;
    }
    Ok(existed)
}

/// Settings rendered as TOML with the database password masked.
pub fn redacted_config(settings: &Settings) -> Result<String> {
    let mut settings = settings.clone();
    if !settings.postgres.password.is_empty() {
        settings.postgres.password = "********".to_string();
    }
    toml::to_string_pretty(&settings).context("Failed to render configuration")
}

/// Print stored checkpoints.
pub fn show_state(config_path: Option<&str>, stage: Option<Stage>) -> Result<()> {
    let settings = load_settings(config_path, None)?;
    let storage = open_storage(&settings)?;
    let stages = match stage {
        Some(stage) => vec![stage],
        None => Stage::ALL.to_vec(),
    };
    let state = state_json(&storage, &stages)?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

/// Print the failed bulk-write log.
pub fn show_failures(config_path: Option<&str>, limit: Option<usize>) -> Result<()> {
    let settings = load_settings(config_path, None)?;
    let storage = open_storage(&settings)?;
    let failures = recent_failures(&storage, limit)?;
    if failures.is_empty() {
        println!("No failed writes recorded");
        return Ok(());
    }
    for entry in failures {
        println!("{} ({} documents)", entry.time.to_rfc3339(), entry.details.len());
        for item in entry.details {
            println!("  {} [{}] {}: {}", item.id, item.status, item.error_type, item.reason);
        }
    }
    Ok(())
}

/// Forget an entity's watermark.
pub fn reset_watermark(config_path: Option<&str>, entity: EntityKind) -> Result<()> {
    let settings = load_settings(config_path, None)?;
    let storage = open_storage(&settings)?;
    if remove_watermark(&storage, entity)? {
        println!("Watermark for {} removed; the next pass rescans it from the start", entity);
    } else {
        println!("No watermark stored for {}", entity);
    }
    Ok(())
}

/// Print the effective configuration.
pub fn show_config(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<()> {
    let settings = load_settings(config_path, log_level_override)?;
    print!("{}", redacted_config(&settings)?);
    Ok(())
}
