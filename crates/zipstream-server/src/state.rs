use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use zipstream::{BundleStore, BundleStreamer, FetcherRegistry, StoreError, epoch_secs_now};
use zipstream_fetch::{HttpFetcher, ObjectStoreFetcher, S3Settings};
use zipstream_store::SqliteBundleStore;

use crate::config::{AppConfig, DatabaseLocation, Environment, FetcherEntry};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BundleStore>,
    pub streamer: BundleStreamer,
    pub environment: Environment,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BundleStore>,
        streamer: BundleStreamer,
        environment: Environment,
    ) -> Self {
        Self {
            store,
            streamer,
            environment,
        }
    }
}

/// Register one fetcher per configured entry, under each of its schemes.
pub fn build_registry(entries: &[FetcherEntry]) -> Result<FetcherRegistry, reqwest::Error> {
    let mut registry = FetcherRegistry::new();

    for entry in entries {
        match entry {
            FetcherEntry::ObjectStore {
                scheme,
                region,
                endpoint,
                allow_http,
            } => {
                let fetcher = ObjectStoreFetcher::s3(S3Settings {
                    region: region.clone(),
                    endpoint: endpoint.clone(),
                    allow_http: *allow_http,
                });
                registry.register(scheme, Arc::new(fetcher));
            }
            FetcherEntry::Http { schemes } => {
                let fetcher = Arc::new(HttpFetcher::new()?);
                for scheme in schemes {
                    registry.register(scheme, fetcher.clone());
                }
            }
        }
    }

    Ok(registry)
}

/// Open the configured SQLite store, creating its directory if needed.
pub fn open_store(config: &AppConfig) -> Result<SqliteBundleStore, StoreError> {
    let lifetime = config.data_lifetime();
    match config.database_location() {
        Some(DatabaseLocation::Memory) => SqliteBundleStore::open_in_memory(lifetime),
        Some(DatabaseLocation::File(path)) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    StoreError::Database(format!(
                        "failed to create database directory {}: {e}",
                        dir.display()
                    ))
                })?;
            }
            SqliteBundleStore::open(&path, lifetime)
        }
        None => Err(StoreError::Database(
            "could not determine data directory; set `database` in the config".into(),
        )),
    }
}

/// Periodically remove expired bundles until `cancel` fires.
pub fn spawn_purger(
    store: Arc<dyn BundleStore>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match store.purge_expired(epoch_secs_now()).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "purged expired bundles"),
                Err(e) => tracing::warn!(error = %e, "failed to purge expired bundles"),
            }
        }
    })
}
