//! Command implementations for the sync daemon.
//!
//! Handles:
//! - run: prepare the cluster, catch every index up, then apply live changes
//! - checkpoints: print the per-table checkpoint derived from the live indices

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use search_sync_conn::{
    compute_checkpoints, disable_auto_create_index, recover_red_indices,
    wait_for_healthy_cluster, Database, DocumentStore, EsClient, EsClientConfig, PgDatabase,
};
use search_sync_indexing::{ChangeListener, IndexerConfig, IndexerSet, PendingBuffer};
use search_sync_types::{BlocknumberCheckpoint, Settings, WatchedTable};

/// Slack added on top of the health wait for the HTTP request timeout.
const HEALTH_REQUEST_SLACK: Duration = Duration::from_secs(10);

/// CLI flags applied on top of the loaded settings.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub elasticsearch_url: Option<String>,
    pub log_level: Option<String>,
}

/// Load settings, apply CLI overrides and validate.
pub fn load_settings(config_path: Option<&str>, overrides: &Overrides) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(url) = &overrides.database_url {
        settings.database_url = url.clone();
    }
    if let Some(url) = &overrides.elasticsearch_url {
        settings.elasticsearch_url = url.clone();
    }
    if let Some(level) = &overrides.log_level {
        settings.log_level = level.clone();
    }

    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn connect_store(settings: &Settings) -> Result<Arc<dyn DocumentStore>> {
    let mut config = EsClientConfig::new(settings.elasticsearch_url.as_str());
    let health_wait = Duration::from_secs(settings.health_timeout_secs) + HEALTH_REQUEST_SLACK;
    config.timeout = config.timeout.max(health_wait);
    let client = EsClient::new(config).context("Failed to build document store client")?;
    Ok(Arc::new(client))
}

/// Cluster housekeeping, then the checkpoint scoped catchups resume from.
///
/// Deletes indices that stay red, waits for yellow-or-better health, turns
/// off index auto-creation and derives the checkpoint from the live aliases.
/// A red index keeps the whole cluster red, so recovery runs before the wait.
pub async fn prepare_cluster(
    store: &dyn DocumentStore,
    settings: &Settings,
) -> Result<BlocknumberCheckpoint> {
    let deleted = recover_red_indices(
        store,
        settings.red_index_max_polls,
        Duration::from_millis(settings.red_index_poll_interval_ms),
    )
    .await
    .context("Failed to recover red indices")?;
    if !deleted.is_empty() {
        warn!(indices = ?deleted, "red indices deleted, they will be rebuilt");
    }

    wait_for_healthy_cluster(store, Duration::from_secs(settings.health_timeout_secs))
        .await
        .context("Cluster did not become healthy")?;

    disable_auto_create_index(store)
        .await
        .context("Failed to disable index auto-creation")?;

    let checkpoint = compute_checkpoints(store, &WatchedTable::ALL)
        .await
        .context("Failed to compute checkpoints")?;
    info!(checkpoint = ?checkpoint, "computed checkpoints");
    Ok(checkpoint)
}

/// Catch every kind up, cut the aliases over and refresh.
pub async fn catch_up(
    indexers: &IndexerSet,
    checkpoint: &BlocknumberCheckpoint,
    force_full: bool,
) -> Result<()> {
    let results = indexers
        .catchup_all(checkpoint, force_full)
        .await
        .context("Catchup failed")?;
    for kind in &results {
        info!(
            table = %kind.table,
            mode = ?kind.mode,
            batches = kind.stats.batches,
            rows = kind.stats.rows,
            "caught up"
        );
    }

    indexers
        .cutover_all()
        .await
        .context("Failed to cut aliases over")?;
    indexers.refresh_all().await.context("Failed to refresh indices")?;
    Ok(())
}

/// Index whatever the listener accumulated since the last call.
///
/// On failure the drained updates go back into the accumulator so the next
/// call retries them.
pub async fn drain_once(listener: &ChangeListener, indexers: &IndexerSet) -> Result<usize> {
    let Some(updates) = listener.drain() else {
        return Ok(0);
    };
    match indexers.process_pending(updates.clone()).await {
        Ok(written) => Ok(written),
        Err(e) => {
            listener.pending().merge(updates);
            Err(e).context("Failed to index pending updates")
        }
    }
}

/// Drain every `interval` until `shutdown` resolves.
///
/// A drain in progress always finishes before shutdown is observed. If the
/// listen task ends first no more changes can arrive, so this returns an
/// error instead of draining an accumulator that stays empty.
pub async fn drive(
    listener: &ChangeListener,
    indexers: &IndexerSet,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
    mut listen_task: JoinHandle<()>,
) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                listen_task.abort();
                return Ok(());
            }
            joined = &mut listen_task => {
                if let Err(e) = joined {
                    error!(error = %e, "listen task failed");
                }
                // Index what arrived before the connection dropped.
                if let Err(e) = drain_once(listener, indexers).await {
                    error!(error = %format!("{e:#}"), "final drain failed");
                }
                bail!("Change listener stopped, restart to resume live updates");
            }
            _ = ticker.tick() => match drain_once(listener, indexers).await {
                Ok(0) => {}
                Ok(written) => debug!(written = written, "drained pending updates"),
                Err(e) => error!(error = %format!("{e:#}"), "drain failed, will retry"),
            },
        }
    }
}

async fn shutdown_signal() {
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

/// Run the sync engine.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Connect the database pool and the document store
/// 3. Prepare the cluster and derive checkpoints
/// 4. Create indices and start the change listener
/// 5. Catch up, cut over, refresh
/// 6. Drain pending changes on an interval until Ctrl+C/SIGTERM, or fail
///    if the change listener stops
pub async fn run_sync(
    config_path: Option<&str>,
    overrides: &Overrides,
    drop_existing: bool,
    listen: bool,
) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_tracing(&settings.log_level)?;

    info!("search-sync starting...");
    info!(
        elasticsearch_url = %settings.elasticsearch_url,
        db_pool_size = settings.db_pool_size,
        poll_interval_ms = settings.poll_interval_ms,
        drop = drop_existing,
        listen = listen,
        "configuration"
    );

    let db: Arc<dyn Database> = Arc::new(
        PgDatabase::connect(&settings.database_url, settings.db_pool_size)
            .context("Failed to create database pool")?,
    );
    let store = connect_store(&settings)?;

    let checkpoint = prepare_cluster(store.as_ref(), &settings).await?;

    let indexers = IndexerSet::new(
        Arc::clone(&db),
        Arc::clone(&store),
        IndexerConfig::from_settings(&settings),
    );
    indexers
        .create_indices(drop_existing)
        .await
        .context("Failed to create indices")?;

    let listener = Arc::new(ChangeListener::new(
        Arc::clone(&db),
        Arc::new(PendingBuffer::new()),
    ));
    // Listen before catchup so changes landing during catchup are not missed.
    let listen_task = if listen {
        Some(
            Arc::clone(&listener)
                .start(&settings.database_url)
                .await
                .context("Failed to start change listener")?,
        )
    } else {
        None
    };

    catch_up(&indexers, &checkpoint, drop_existing).await?;

    let Some(listen_task) = listen_task else {
        info!("catchup complete, not listening for changes");
        return Ok(());
    };

    info!("catchup complete, applying live changes");
    drive(
        &listener,
        &indexers,
        Duration::from_millis(settings.poll_interval_ms),
        shutdown_signal(),
        listen_task,
    )
    .await?;

    info!("search-sync stopped");
    Ok(())
}

/// Print the per-table checkpoint as JSON.
pub async fn show_checkpoints(config_path: Option<&str>, overrides: &Overrides) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_tracing(&settings.log_level)?;

    let store = connect_store(&settings)?;
    let checkpoint = compute_checkpoints(store.as_ref(), &WatchedTable::ALL)
        .await
        .context("Failed to compute checkpoints")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&checkpoint).context("Failed to encode checkpoints")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_settings_applies_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.toml");
        fs::write(
            &path,
            "database_url = \"postgres://file/db\"\nelasticsearch_url = \"http://file:9200\"\npoll_interval_ms = 250\n",
        )
        .unwrap();

        let overrides = Overrides {
            elasticsearch_url: Some("http://flag:9200".to_string()),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        let settings = load_settings(path.to_str(), &overrides).unwrap();

        assert_eq!(settings.database_url, "postgres://file/db");
        assert_eq!(settings.elasticsearch_url, "http://flag:9200");
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.poll_interval_ms, 250);
    }

    #[test]
    fn test_load_settings_rejects_missing_urls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.toml");
        fs::write(&path, "log_level = \"warn\"\n").unwrap();

        let err = load_settings(path.to_str(), &Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("Invalid configuration"));
    }
}
