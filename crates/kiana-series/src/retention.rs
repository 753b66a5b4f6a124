// ABOUTME: Bounded append-only time series with FIFO eviction mirrored between memory and SQLite.
// ABOUTME: Every read and write of the working set runs inside the store's exclusive slot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use kiana_store::rusqlite::{self, Connection, OptionalExtension};
use kiana_store::{Schema, Store, StoreError};
use thiserror::Error;

use crate::series::{Sample, Series};

/// Errors returned by the retention store.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("invalid series table name: {0:?}")]
    InvalidTable(String),

    #[error("max retained samples must be at least 1")]
    InvalidCapacity,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl SeriesError {
    /// True when the underlying store can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SeriesError::Store(e) if e.is_fatal())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// DDL for one series table.
pub fn schema(table: &str) -> Schema {
    Schema::new(
        format!("series:{table}"),
        [format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                ts INTEGER PRIMARY KEY,
                value REAL NOT NULL
            )"
        )],
    )
}

/// A time series keeping at most `max_retained` samples.
///
/// The in-memory working set mirrors the table. It is only touched from the
/// store's worker thread, so the mutex is never contended; it exists to share
/// the set between handle clones.
#[derive(Debug, Clone)]
pub struct TimeSeriesStore {
    store: Store,
    table: Arc<str>,
    max_retained: usize,
    working: Arc<Mutex<VecDeque<Sample>>>,
}

impl TimeSeriesStore {
    /// Apply the table schema and load the newest `max_retained` rows as the
    /// working set.
    pub async fn open(store: Store, table: &str, max_retained: usize) -> Result<Self, SeriesError> {
        if !is_valid_table_name(table) {
            return Err(SeriesError::InvalidTable(table.to_string()));
        }
        if max_retained == 0 {
            return Err(SeriesError::InvalidCapacity);
        }

        store.ensure_schema(schema(table)).await?;

        let series = Self {
            store,
            table: Arc::from(table),
            max_retained,
            working: Arc::new(Mutex::new(VecDeque::with_capacity(max_retained))),
        };

        let loaded = series.load_recent(max_retained).await?;
        tracing::info!(table, loaded, max_retained, "series loaded");
        Ok(series)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn max_retained(&self) -> usize {
        self.max_retained
    }

    /// Append a sample, evicting the oldest one first when the set is full.
    ///
    /// The eviction and the insert commit together, and memory is updated only
    /// after they do. A timestamp that is already stored is rejected with a
    /// constraint violation and changes nothing. Older-than-newest timestamps
    /// are accepted as given. Non-finite values are rejected before the
    /// database is touched.
    ///
    /// When the table still holds rows outside the working set (after a
    /// partial `load_recent` or a capacity reduction), each call also evicts
    /// the single oldest such row until the table is back within
    /// `max_retained`.
    pub async fn record(&self, timestamp: i64, value: f64) -> Result<(), SeriesError> {
        if !value.is_finite() {
            let reason = format!("sample value {value} is not finite");
            return Err(StoreError::Validation(reason).into());
        }

        let working = Arc::clone(&self.working);
        let table = Arc::clone(&self.table);
        let max_retained = self.max_retained;
        let sample = Sample::new(timestamp, value);

        let (evicted, stale) = self
            .store
            .call(move |conn| {
                let mut working = working.lock().unwrap_or_else(PoisonError::into_inner);
                let evict = if working.len() >= max_retained {
                    working.front().copied()
                } else {
                    None
                };

                let stale = persist(conn, &table, max_retained, evict, sample)?;

                if evict.is_some() {
                    working.pop_front();
                }
                if let Some(ts) = stale {
                    working.retain(|s| s.timestamp != ts);
                }
                working.push_back(sample);
                Ok((evict, stale))
            })
            .await?;

        match evicted {
            Some(old) => tracing::debug!(
                table = %self.table,
                timestamp,
                evicted = old.timestamp,
                "sample recorded"
            ),
            None => tracing::debug!(table = %self.table, timestamp, "sample recorded"),
        }
        if let Some(stale) = stale {
            tracing::debug!(table = %self.table, evicted = stale, "evicted row beyond retention");
        }
        Ok(())
    }

    /// Replace the working set with the newest `limit` rows of the table,
    /// in ascending timestamp order. `limit` is capped at `max_retained`.
    ///
    /// Read-only: rows that are not loaded stay in the table. Returns how
    /// many samples were loaded.
    pub async fn load_recent(&self, limit: usize) -> Result<usize, SeriesError> {
        let working = Arc::clone(&self.working);
        let table = Arc::clone(&self.table);
        let limit = limit.min(self.max_retained) as i64;

        let (loaded, stored) = self
            .store
            .call(move |conn| {
                let mut fresh = VecDeque::new();
                let mut stmt = conn.prepare(&format!(
                    "SELECT ts, value FROM (
                        SELECT ts, value FROM {table} ORDER BY ts DESC LIMIT ?1
                    ) ORDER BY ts ASC"
                ))?;
                let rows = stmt.query_map([limit], |row| {
                    Ok(Sample::new(row.get(0)?, row.get(1)?))
                })?;
                for row in rows {
                    fresh.push_back(row.map_err(|source| StoreError::Row { source })?);
                }
                let stored: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;

                let mut working = working.lock().unwrap_or_else(PoisonError::into_inner);
                *working = fresh;
                Ok((working.len(), stored))
            })
            .await?;

        if stored as usize > self.max_retained {
            tracing::info!(
                table = %self.table,
                stored,
                max_retained = self.max_retained,
                "table holds more rows than retained, later records will evict them"
            );
        }
        Ok(loaded)
    }

    /// Snapshot of the working set in chronological order.
    ///
    /// Runs in the exclusive slot, so it sees the state before or after any
    /// concurrent `record`, never in between.
    pub async fn render_series(&self) -> Result<Series, SeriesError> {
        let working = Arc::clone(&self.working);
        let samples = self
            .store
            .call(move |_conn| {
                let working = working.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(working.iter().copied().collect::<Vec<_>>())
            })
            .await?;
        Ok(Series::new(samples))
    }
}

/// Evict (if any), drop one row beyond `max_retained`, and insert, all in one
/// transaction so a rejected insert leaves every row in place. Returns the
/// timestamp of the extra row removed, if any.
fn persist(
    conn: &mut Connection,
    table: &str,
    max_retained: usize,
    evict: Option<Sample>,
    sample: Sample,
) -> Result<Option<i64>, StoreError> {
    let tx = conn.transaction()?;
    if let Some(oldest) = evict {
        tx.execute(&format!("DELETE FROM {table} WHERE ts = ?1"), [oldest.timestamp])?;
    }

    let stored: i64 = tx.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    let stale = if stored as usize >= max_retained {
        tx.query_row(
            &format!(
                "DELETE FROM {table} WHERE ts = (SELECT MIN(ts) FROM {table}) RETURNING ts"
            ),
            [],
            |row| row.get(0),
        )
        .optional()?
    } else {
        None
    };

    tx.execute(
        &format!("INSERT INTO {table} (ts, value) VALUES (?1, ?2)"),
        rusqlite::params![sample.timestamp, sample.value],
    )?;
    tx.commit()?;
    Ok(stale)
}
