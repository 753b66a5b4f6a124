// ABOUTME: Process lifecycle for kiana: the init hook that opens and prepares storage,
// ABOUTME: and the shutdown hook that stops producers before draining and closing the store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kiana_labels::{ImportError, ImportReport, LabelError, LabelRules, LabelStore};
use kiana_series::{SampleSource, Sampler, SeriesError, TimeSeriesStore};
use kiana_store::{Store, StoreError};
use thiserror::Error;

use crate::config::KianaConfig;

/// Errors raised while bringing storage up or down.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("label store error: {0}")]
    Labels(#[from] LabelError),

    #[error("series error: {0}")]
    Series(#[from] SeriesError),

    #[error("legacy import error: {0}")]
    Import(#[from] ImportError),
}

/// Everything a request handler needs, constructed once per process and
/// passed to handlers by reference.
pub struct App {
    pub config: KianaConfig,
    pub store: Store,
    pub labels: LabelStore,
    pub series: TimeSeriesStore,
    sampler: Option<Sampler>,
}

impl App {
    /// Open the store at `db_path`, apply every component's schema, preload
    /// the retained series, and import the legacy label file if configured.
    pub async fn init(config: KianaConfig, db_path: &Path) -> Result<Self, AppError> {
        let store = Store::open(db_path)?;

        let rules = LabelRules::new(config.max_label_length);
        let labels = LabelStore::open(store.clone(), rules).await?;
        let series = TimeSeriesStore::open(
            store.clone(),
            &config.series_table,
            config.series_max_retained,
        )
        .await?;

        if let Some(path) = &config.legacy_labels_json {
            let report = kiana_labels::import_json(&labels, path).await?;
            tracing::info!(
                path = %path.display(),
                imported = report.claimed,
                total = report.total(),
                "legacy labels checked"
            );
        }

        tracing::info!(db = %db_path.display(), "kiana storage ready");
        Ok(Self {
            config,
            store,
            labels,
            series,
            sampler: None,
        })
    }

    /// Start feeding the series from `source` at the configured interval.
    /// Replaces any sampler already running.
    pub async fn start_sampler(&mut self, source: Arc<dyn SampleSource>) {
        if let Some(previous) = self.sampler.take() {
            previous.stop().await;
        }
        let interval = Duration::from_secs(self.config.sample_interval_secs);
        self.sampler = Some(Sampler::spawn(self.series.clone(), source, interval));
    }

    /// Import a legacy label file on demand.
    pub async fn import_legacy(&self, path: &Path) -> Result<ImportReport, AppError> {
        Ok(kiana_labels::import_json(&self.labels, path).await?)
    }

    /// Stop producers, then close the store once queued statements finish.
    pub async fn shutdown(self) -> Result<(), AppError> {
        if let Some(sampler) = self.sampler {
            sampler.stop().await;
        }
        self.store.close().await?;
        tracing::info!("kiana storage shut down");
        Ok(())
    }
}
