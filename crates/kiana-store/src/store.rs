// ABOUTME: Serialized SQLite store: one connection owned by one worker thread, fed by a channel.
// ABOUTME: Async callers submit statements to it; it commits each one before replying.

use std::path::{Path, PathBuf};
use std::thread;

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use tokio::sync::{mpsc, oneshot};

use crate::error::StoreError;
use crate::row::FromRow;
use crate::schema::{Schema, SchemaRegistry};

/// Positional statement parameters. Owned, because they travel to the worker thread.
pub type Params = Vec<Value>;

/// Build [`Params`] from anything convertible into a SQLite value.
///
/// ```ignore
/// store.execute("DELETE FROM t WHERE k = ?1", sql_params![key.to_string()]).await?;
/// ```
#[macro_export]
macro_rules! sql_params {
    () => {
        ::std::vec::Vec::<$crate::rusqlite::types::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::rusqlite::types::Value::from($value)),+]
    };
}

const QUEUE_DEPTH: usize = 256;

type Job = Box<dyn FnOnce(&mut Worker) + Send>;

enum Message {
    Job(Job),
    Close(oneshot::Sender<()>),
}

/// Handle to the process-wide store.
///
/// Cloning is cheap; every clone talks to the same worker thread, which is the
/// only owner of the connection. Statements from all clones are executed one at
/// a time in the order they were enqueued. Dropping the last handle without
/// calling [`Store::close`] still shuts the worker down once the queue drains.
#[derive(Clone)]
pub struct Store {
    tx: mpsc::Sender<Message>,
    path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl Store {
    /// Open or create the database file at `path` and start the worker thread.
    /// Enables WAL journaling and foreign-key enforcement on the connection.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(StoreError::Connection)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(StoreError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(StoreError::Connection)?;

        tracing::info!(path = %path.display(), "store opened");
        Self::spawn(conn, path.to_path_buf())
    }

    /// Open a private in-memory database. Nothing survives [`Store::close`].
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::Connection)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(StoreError::Connection)?;
        Self::spawn(conn, PathBuf::from(":memory:"))
    }

    fn spawn(conn: Connection, path: PathBuf) -> Result<Self, StoreError> {
        let (tx, rx) = mpsc::channel::<Message>(QUEUE_DEPTH);
        let worker = Worker {
            conn,
            schemas: SchemaRegistry::default(),
        };

        thread::Builder::new()
            .name("kiana-store".to_string())
            .spawn(move || worker.run(rx))?;

        Ok(Self { tx, path })
    }

    /// Path of the database file this store was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply a schema set. Returns `true` if its statements ran, `false` if a
    /// set with the same name was already applied through this store.
    pub async fn ensure_schema(&self, schema: Schema) -> Result<bool, StoreError> {
        self.submit(move |worker| worker.schemas.ensure(&mut worker.conn, &schema))
            .await
    }

    /// Run one mutating statement and return the number of rows it changed.
    /// The statement is committed before this returns.
    pub async fn execute(
        &self,
        sql: impl Into<String>,
        params: Params,
    ) -> Result<usize, StoreError> {
        let sql = sql.into();
        self.submit(move |worker| {
            tracing::debug!(%sql, "execute");
            let mut stmt = worker.conn.prepare_cached(&sql)?;
            Ok(stmt.execute(params_from_iter(params.iter()))?)
        })
        .await
    }

    /// Run a read and return its first row, or `None` when nothing matched.
    pub async fn fetch_one<T: FromRow>(
        &self,
        sql: impl Into<String>,
        params: Params,
    ) -> Result<Option<T>, StoreError> {
        let sql = sql.into();
        self.submit(move |worker| {
            tracing::debug!(%sql, "fetch_one");
            query_one(&worker.conn, &sql, &params)
        })
        .await
    }

    /// Run a read and return every row in the order the engine yields them.
    /// Callers that need an order must say so with `ORDER BY`.
    pub async fn fetch_all<T: FromRow>(
        &self,
        sql: impl Into<String>,
        params: Params,
    ) -> Result<Vec<T>, StoreError> {
        let sql = sql.into();
        self.submit(move |worker| {
            tracing::debug!(%sql, "fetch_all");
            query_all(&worker.conn, &sql, &params)
        })
        .await
    }

    /// Run a closure against the connection while holding the exclusive slot.
    ///
    /// No other statement can interleave with the work done inside `f`. Each
    /// statement still autocommits unless `f` opens its own transaction.
    pub async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        self.submit(move |worker| f(&mut worker.conn)).await
    }

    /// Close the connection after every operation already queued has finished.
    ///
    /// Operations submitted afterwards, including a second `close`, fail with
    /// [`StoreError::Closed`].
    pub async fn close(&self) -> Result<(), StoreError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Message::Close(ack_tx))
            .await
            .map_err(|_| StoreError::Closed)?;
        ack_rx.await.map_err(|_| StoreError::Closed)
    }

    /// True once the worker has stopped accepting work.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn submit<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Worker) -> Result<T, StoreError> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |worker| {
            // The caller may have stopped waiting (timeout); the work still completes.
            let _ = reply_tx.send(f(worker));
        });

        self.tx
            .send(Message::Job(job))
            .await
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)?
    }
}

/// Owns the connection on the worker thread.
struct Worker {
    conn: Connection,
    schemas: SchemaRegistry,
}

impl Worker {
    fn run(mut self, mut rx: mpsc::Receiver<Message>) {
        while let Some(message) = rx.blocking_recv() {
            match message {
                Message::Job(job) => job(&mut self),
                Message::Close(ack) => {
                    rx.close();
                    // Anything that raced in behind the close is dropped, which
                    // resolves its caller with StoreError::Closed.
                    while rx.try_recv().is_ok() {}

                    match self.conn.close() {
                        Ok(()) => tracing::info!("store closed"),
                        Err((_, e)) => tracing::error!("error closing store connection: {}", e),
                    }
                    let _ = ack.send(());
                    return;
                }
            }
        }
        tracing::debug!("all store handles dropped, worker exiting");
    }
}

fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<Option<T>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    match rows.next()? {
        Some(row) => T::from_row(row)
            .map(Some)
            .map_err(|source| StoreError::Row { source }),
        None => Ok(None),
    }
}

fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(T::from_row(row).map_err(|source| StoreError::Row { source })?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    fn kv_schema() -> Schema {
        Schema::new(
            "kv",
            ["CREATE TABLE IF NOT EXISTS kv (k TEXT PRIMARY KEY, v INTEGER NOT NULL)"],
        )
    }

    async fn open_kv(dir: &TempDir) -> Store {
        let store = Store::open(&dir.path().join("data").join("test.sqlite3")).unwrap();
        store.ensure_schema(kv_schema()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn store_open_creates_parent_and_enables_wal() {
        let dir = TempDir::new().unwrap();
        let store = open_kv(&dir).await;

        assert!(dir.path().join("data").exists());
        let mode: Option<String> =
            store.fetch_one("PRAGMA journal_mode", sql_params![]).await.unwrap();
        assert_eq!(mode.as_deref(), Some("wal"));
        let fk: Option<i64> = store.fetch_one("PRAGMA foreign_keys", sql_params![]).await.unwrap();
        assert_eq!(fk, Some(1));
    }

    #[tokio::test]
    async fn store_execute_and_fetch() {
        let dir = TempDir::new().unwrap();
        let store = open_kv(&dir).await;

        let changed = store
            .execute("INSERT INTO kv (k, v) VALUES (?1, ?2)", sql_params!["a".to_string(), 1_i64])
            .await
            .unwrap();
        assert_eq!(changed, 1);
        store
            .execute("INSERT INTO kv (k, v) VALUES (?1, ?2)", sql_params!["b".to_string(), 2_i64])
            .await
            .unwrap();

        let one: Option<(String, i64)> = store
            .fetch_one("SELECT k, v FROM kv WHERE k = ?1", sql_params!["b".to_string()])
            .await
            .unwrap();
        assert_eq!(one, Some(("b".to_string(), 2)));

        let all: Vec<(String, i64)> = store
            .fetch_all("SELECT k, v FROM kv ORDER BY k", sql_params![])
            .await
            .unwrap();
        assert_eq!(all, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[tokio::test]
    async fn store_fetch_one_returns_none_for_no_rows() {
        let dir = TempDir::new().unwrap();
        let store = open_kv(&dir).await;

        let missing: Option<i64> = store
            .fetch_one("SELECT v FROM kv WHERE k = ?1", sql_params!["nope".to_string()])
            .await
            .unwrap();
        assert_eq!(missing, None);

        let none: Vec<i64> = store.fetch_all("SELECT v FROM kv", sql_params![]).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn store_surfaces_constraint_violations() {
        let dir = TempDir::new().unwrap();
        let store = open_kv(&dir).await;

        let insert = "INSERT INTO kv (k, v) VALUES (?1, ?2)";
        store.execute(insert, sql_params!["dup".to_string(), 1_i64]).await.unwrap();
        let err = store
            .execute(insert, sql_params!["dup".to_string(), 2_i64])
            .await
            .unwrap_err();

        assert!(err.is_constraint_violation(), "got {err}");
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn store_row_type_mismatch_is_typed_error() {
        let dir = TempDir::new().unwrap();
        let store = open_kv(&dir).await;
        store
            .execute("INSERT INTO kv (k, v) VALUES (?1, ?2)", sql_params!["a".to_string(), 1_i64])
            .await
            .unwrap();

        let err = store
            .fetch_one::<i64>("SELECT k FROM kv", sql_params![])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Row { .. }), "got {err}");
    }

    #[tokio::test]
    async fn store_ensure_schema_runs_once() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("s.sqlite3")).unwrap();

        assert!(store.ensure_schema(kv_schema()).await.unwrap());
        assert!(!store.ensure_schema(kv_schema()).await.unwrap());
    }

    #[tokio::test]
    async fn store_malformed_schema_fails() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .ensure_schema(Schema::new("bad", ["CREATE TABEL nope (x)"]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Schema { ref name, .. } if name == "bad"));
    }

    #[tokio::test]
    async fn store_operations_after_close_fail() {
        let dir = TempDir::new().unwrap();
        let store = open_kv(&dir).await;
        let other_handle = store.clone();

        store.close().await.unwrap();
        assert!(other_handle.is_closed());

        let err = other_handle
            .execute("INSERT INTO kv (k, v) VALUES ('x', 1)", sql_params![])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Closed));

        let err = store.fetch_all::<i64>("SELECT v FROM kv", sql_params![]).await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));

        assert!(matches!(store.close().await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn store_close_drains_queued_work() {
        let dir = TempDir::new().unwrap();
        let store = open_kv(&dir).await;

        let mut pending = Vec::new();
        for i in 0..20_i64 {
            let store = store.clone();
            pending.push(tokio::spawn(async move {
                store
                    .execute(
                        "INSERT INTO kv (k, v) VALUES (?1, ?2)",
                        sql_params![format!("k{i}"), i],
                    )
                    .await
            }));
        }
        // Let the spawned tasks enqueue before the close message.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        store.close().await.unwrap();

        let mut succeeded = 0;
        for handle in pending {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(e) => assert!(matches!(e, StoreError::Closed), "got {e}"),
            }
        }

        let reopened = Store::open(&dir.path().join("data").join("test.sqlite3")).unwrap();
        let count: Option<i64> = reopened
            .fetch_one("SELECT COUNT(*) FROM kv", sql_params![])
            .await
            .unwrap();
        assert_eq!(count, Some(succeeded));
    }

    #[tokio::test]
    async fn store_statements_never_overlap() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema(kv_schema()).await.unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    store
                        .call(move |conn| {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            conn.execute(
                                "INSERT INTO kv (k, v) VALUES (?1, ?2)",
                                rusqlite::params![format!("k{i}"), i],
                            )?;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            result.unwrap().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        let count: Option<i64> =
            store.fetch_one("SELECT COUNT(*) FROM kv", sql_params![]).await.unwrap();
        assert_eq!(count, Some(32));
    }

    #[tokio::test]
    async fn store_timeout_abandons_wait_without_breaking_store() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_schema(kv_schema()).await.unwrap();

        let slow = store.call(|conn| {
            std::thread::sleep(Duration::from_millis(200));
            conn.execute("INSERT INTO kv (k, v) VALUES ('slow', 1)", [])?;
            Ok(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), slow).await;
        assert!(timed_out.is_err(), "slow call should time out");

        // Queued behind the slow statement, so it observes its effect.
        let v: Option<i64> = store
            .fetch_one("SELECT v FROM kv WHERE k = 'slow'", sql_params![])
            .await
            .unwrap();
        assert_eq!(v, Some(1));
    }
}
