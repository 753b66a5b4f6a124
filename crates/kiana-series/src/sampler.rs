// ABOUTME: Periodic sampling trigger that feeds a retention store from an external source.
// ABOUTME: Source failures are logged and skipped; a fatal store error stops the loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::retention::TimeSeriesStore;

/// Error reported by a sample source. Only its message is kept.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SourceError(pub String);

/// Something that can produce the current value of a series, e.g. a price
/// quote fetched over HTTP.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn sample(&self) -> Result<f64, SourceError>;

    /// Name for logs.
    fn name(&self) -> &str;
}

/// Produces the timestamp for each sample, in unix seconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

fn wall_clock() -> Clock {
    Arc::new(|| Utc::now().timestamp())
}

/// Handle to a running sampling loop.
pub struct Sampler {
    task: JoinHandle<()>,
}

impl Sampler {
    /// Start sampling `source` every `interval`, recording with wall-clock seconds.
    pub fn spawn(
        series: TimeSeriesStore,
        source: Arc<dyn SampleSource>,
        interval: Duration,
    ) -> Self {
        Self::spawn_with_clock(series, source, interval, wall_clock())
    }

    /// Like [`Sampler::spawn`] with a caller-supplied clock.
    pub fn spawn_with_clock(
        series: TimeSeriesStore,
        source: Arc<dyn SampleSource>,
        interval: Duration,
        clock: Clock,
    ) -> Self {
        let task = tokio::spawn(run(series, source, interval, clock));
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit. A `record` already handed to the
    /// store still completes there.
    pub async fn stop(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn run(
    series: TimeSeriesStore,
    source: Arc<dyn SampleSource>,
    interval: Duration,
    clock: Clock,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(source = source.name(), table = series.table(), ?interval, "sampler started");

    loop {
        ticker.tick().await;

        let value = match source.sample().await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(source = source.name(), "sample failed: {}", e);
                continue;
            }
        };

        let timestamp = clock();
        match series.record(timestamp, value).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                tracing::error!(table = series.table(), "sampler stopping: {}", e);
                return;
            }
            Err(e) => {
                tracing::warn!(table = series.table(), timestamp, "sample not recorded: {}", e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiana_store::Store;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Returns the queued values in order, then fails.
    struct ScriptedSource {
        values: Mutex<Vec<Result<f64, SourceError>>>,
    }

    impl ScriptedSource {
        fn new(mut values: Vec<Result<f64, SourceError>>) -> Arc<Self> {
            values.reverse();
            Arc::new(Self {
                values: Mutex::new(values),
            })
        }
    }

    #[async_trait]
    impl SampleSource for ScriptedSource {
        async fn sample(&self) -> Result<f64, SourceError> {
            self.values
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(SourceError("exhausted".to_string())))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn counting_clock() -> Clock {
        let next = Arc::new(AtomicI64::new(1));
        Arc::new(move || next.fetch_add(1, Ordering::SeqCst))
    }

    async fn wait_for_len(series: &TimeSeriesStore, len: usize) {
        for _ in 0..200 {
            if series.render_series().await.unwrap().len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("series never reached {len} samples");
    }

    #[tokio::test]
    async fn sampler_records_values_and_skips_failures() {
        let store = Store::open_in_memory().unwrap();
        let series = TimeSeriesStore::open(store, "gold", 10).await.unwrap();
        let source = ScriptedSource::new(vec![
            Ok(610.5),
            Err(SourceError("timeout".to_string())),
            Ok(611.0),
            Ok(612.25),
        ]);

        let sampler = Sampler::spawn_with_clock(
            series.clone(),
            source,
            Duration::from_millis(5),
            counting_clock(),
        );
        wait_for_len(&series, 3).await;
        sampler.stop().await;

        let values: Vec<f64> = series
            .render_series()
            .await
            .unwrap()
            .samples()
            .iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, vec![610.5, 611.0, 612.25]);
    }

    #[tokio::test]
    async fn sampler_stops_when_store_closes() {
        let store = Store::open_in_memory().unwrap();
        let series = TimeSeriesStore::open(store.clone(), "gold", 10).await.unwrap();
        let source = ScriptedSource::new((0..1000).map(|i| Ok(i as f64)).collect());

        let sampler =
            Sampler::spawn_with_clock(series, source, Duration::from_millis(5), counting_clock());
        store.close().await.unwrap();

        for _ in 0..200 {
            if sampler.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("sampler kept running after the store closed");
    }
}
