// ABOUTME: Bounded time-series retention for kiana, built on the serialized store.
// ABOUTME: Provides the retention store, series snapshots with stats, and the periodic sampler.

pub mod retention;
pub mod sampler;
pub mod series;

pub use retention::{SeriesError, TimeSeriesStore};
pub use sampler::{Clock, SampleSource, Sampler, SourceError};
pub use series::{Sample, Series, SeriesStats};
