//! Database layer for the catalog materializer.

pub mod catalog;
pub mod projects;
pub mod work_items;

use crate::error::MaterializeResult;
use anyhow::Result;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Default wait for a competing writer.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create the database, waiting up to `busy_timeout` for locks.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets readers proceed while a materialization holds the write lock
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;",
        )?;
        conn.busy_timeout(busy_timeout)?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations.
    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.lock();
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    /// A poisoned lock only means another thread panicked mid-call; SQLite
    /// already rolled back its open transaction, so the connection is usable.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Execute a function with exclusive access to the connection.
    pub fn with_conn<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Connection) -> std::result::Result<T, E>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Execute a function with mutable access to the connection (for transactions).
    pub fn with_conn_mut<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Connection) -> std::result::Result<T, E>,
    {
        let mut conn = self.lock();
        f(&mut conn)
    }

    /// Run `f` inside one unit of work: commit on `Ok`, roll back on `Err`.
    pub fn in_unit_of_work<F, T>(&self, f: F) -> MaterializeResult<T>
    where
        F: FnOnce(&UnitOfWork<'_>) -> MaterializeResult<T>,
    {
        self.run_unit_of_work(Completion::Commit, f)
    }

    /// Run `f` inside a unit of work that is always rolled back.
    pub fn in_discarded_unit_of_work<F, T>(&self, f: F) -> MaterializeResult<T>
    where
        F: FnOnce(&UnitOfWork<'_>) -> MaterializeResult<T>,
    {
        self.run_unit_of_work(Completion::Rollback, f)
    }

    fn run_unit_of_work<F, T>(&self, completion: Completion, f: F) -> MaterializeResult<T>
    where
        F: FnOnce(&UnitOfWork<'_>) -> MaterializeResult<T>,
    {
        self.with_conn_mut(|conn| {
            let uow = UnitOfWork::begin(conn)?;
            match f(&uow) {
                Ok(value) => {
                    match completion {
                        Completion::Commit => uow.commit()?,
                        Completion::Rollback => uow.rollback()?,
                    }
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = uow.rollback() {
                        tracing::error!(error = %rollback_err, "rollback failed");
                    }
                    tracing::debug!(reason = err.code().as_str(), "unit of work rolled back");
                    Err(err)
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Completion {
    Commit,
    Rollback,
}

/// One commit/rollback boundary shared by every read and write of a call.
///
/// Opened with `BEGIN IMMEDIATE`, so the write lock is taken up front and
/// concurrent materializations are serialized by SQLite.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> UnitOfWork<'conn> {
    pub fn begin(conn: &'conn mut Connection) -> rusqlite::Result<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self { tx })
    }

    /// Connection view of the open transaction.
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn commit(self) -> rusqlite::Result<()> {
        self.tx.commit()
    }

    pub fn rollback(self) -> rusqlite::Result<()> {
        self.tx.rollback()
    }
}

/// Get the current timestamp in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a fresh row id.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Map `QueryReturnedNoRows` to `None`.
pub(crate) fn optional<T>(result: rusqlite::Result<T>) -> rusqlite::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}
