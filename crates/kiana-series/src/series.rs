// ABOUTME: Value types for time-series samples and read-only snapshots of a retained series.
// ABOUTME: A snapshot with fewer than two samples is "insufficient data", never an error.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One observation: unix seconds and the sampled value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub timestamp: i64,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// The timestamp as a UTC datetime, if it is in chrono's range.
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

/// Summary figures over a series of at least two samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub first: Sample,
    pub last: Sample,
    pub min: f64,
    pub max: f64,
    /// `last.value - first.value`.
    pub change: f64,
}

/// Chronological snapshot of a retention store's working set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Series {
    samples: Vec<Sample>,
}

impl Series {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whether there are enough samples to draw or summarize a trend.
    pub fn is_sufficient(&self) -> bool {
        self.samples.len() >= 2
    }

    pub fn latest(&self) -> Option<Sample> {
        self.samples.last().copied()
    }

    /// Summary figures, or `None` when the series is insufficient.
    pub fn stats(&self) -> Option<SeriesStats> {
        if !self.is_sufficient() {
            return None;
        }
        let first = *self.samples.first()?;
        let last = *self.samples.last()?;
        let (min, max) = self
            .samples
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
                (lo.min(s.value), hi.max(s.value))
            });
        Some(SeriesStats {
            first,
            last,
            min,
            max,
            change: last.value - first.value,
        })
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_samples_is_insufficient() {
        assert!(!Series::default().is_sufficient());
        assert!(Series::default().stats().is_none());

        let one = Series::new(vec![Sample::new(1, 500.0)]);
        assert!(!one.is_sufficient());
        assert!(one.stats().is_none());
        assert_eq!(one.latest(), Some(Sample::new(1, 500.0)));
    }

    #[test]
    fn stats_cover_the_whole_series() {
        let series = Series::new(vec![
            Sample::new(10, 612.5),
            Sample::new(20, 610.0),
            Sample::new(30, 618.25),
            Sample::new(40, 615.0),
        ]);

        let stats = series.stats().unwrap();
        assert_eq!(stats.first, Sample::new(10, 612.5));
        assert_eq!(stats.last, Sample::new(40, 615.0));
        assert_eq!(stats.min, 610.0);
        assert_eq!(stats.max, 618.25);
        assert_eq!(stats.change, 2.5);
    }

    #[test]
    fn recorded_at_converts_unix_seconds() {
        let sample = Sample::new(1_700_000_000, 1.0);
        let at = sample.recorded_at().unwrap();
        assert_eq!(at.timestamp(), 1_700_000_000);
    }
}
