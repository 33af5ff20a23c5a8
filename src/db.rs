//! Database handle, per-worker sessions, transactions and cancellation.
//!
//! A [`Database`] owns one root DuckDB connection and hands out [`Session`]s,
//! each backed by its own cloned connection to the same database instance.
//! Every session call checks the [`CancelToken`] before touching the
//! database.

use std::{
    path::Path,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use duckdb::{Connection, Row, ToSql};
use log::{debug, warn};
use serde::Serialize;

use crate::error::{LoadError, Result};

/// Shared cancellation flag with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(LoadError::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(LoadError::DeadlineExceeded);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Sessions handed out since the database was opened.
    pub opened: usize,
    /// Sessions currently alive.
    pub active: usize,
}

pub struct Database {
    root: Mutex<Connection>,
    opened: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        debug!("Opening database {path:?}");
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(connection: Connection) -> Self {
        Self {
            root: Mutex::new(connection),
            opened: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Opens a new session bound to `cancel`.
    pub fn connect(&self, cancel: &CancelToken) -> Result<Session> {
        cancel.check()?;
        let connection = {
            let root = self.root.lock().unwrap_or_else(PoisonError::into_inner);
            root.try_clone()?
        };
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Session {
            connection,
            cancel: cancel.clone(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            opened: self.opened.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
        }
    }
}

pub struct Session {
    connection: Connection,
    cancel: CancelToken,
    active: Arc<AtomicUsize>,
}

impl Session {
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
        self.cancel.check()?;
        debug!("SQL: {sql}");
        Ok(self.connection.execute(sql, params)?)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.cancel.check()?;
        debug!("SQL: {sql}");
        Ok(self.connection.execute_batch(sql)?)
    }

    /// Runs a query returning a single integer in its first column.
    pub fn query_count(&self, sql: &str, params: &[&dyn ToSql]) -> Result<i64> {
        self.cancel.check()?;
        debug!("SQL: {sql}");
        let count: Option<i64> = self.connection.query_row(sql, params, |row| row.get(0))?;
        Ok(count.unwrap_or(0))
    }

    /// Collects the first column of every row as optional text.
    pub fn query_column(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Option<String>>> {
        self.query_rows(sql, params, |row| row.get::<_, Option<String>>(0))
    }

    pub fn query_rows<T, F>(&self, sql: &str, params: &[&dyn ToSql], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> duckdb::Result<T>,
    {
        self.cancel.check()?;
        debug!("SQL: {sql}");
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement.query_map(params, map)?;
        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }

    /// Starts a transaction that rolls back unless committed.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.execute_batch("BEGIN TRANSACTION")?;
        Ok(Transaction {
            session: self,
            finished: false,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Transaction<'a> {
    session: &'a Session,
    finished: bool,
}

impl Transaction<'_> {
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Commits unless the session has been cancelled, in which case the
    /// transaction is rolled back on drop.
    pub fn commit(mut self) -> Result<()> {
        self.session.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Bypasses the cancel check: a cancelled write still has to roll back.
        if let Err(err) = self.session.connection.execute_batch("ROLLBACK") {
            warn!("Rollback failed: {err}");
        } else {
            debug!("Transaction rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_reports_cancellation_and_deadline() {
        let token = CancelToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(matches!(token.check(), Err(LoadError::Cancelled)));

        let expired = CancelToken::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(expired.check(), Err(LoadError::DeadlineExceeded)));
    }

    #[test]
    fn sessions_share_one_database_and_track_counters() {
        let db = Database::open_in_memory().expect("open db");
        let cancel = CancelToken::new();
        {
            let writer = db.connect(&cancel).expect("writer");
            writer
                .execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1), (2);")
                .expect("seed");
            let reader = db.connect(&cancel).expect("reader");
            assert_eq!(reader.query_count("SELECT COUNT(*) FROM t", &[]).unwrap(), 2);
            assert_eq!(db.stats(), PoolStats { opened: 2, active: 2 });
        }
        assert_eq!(db.stats().active, 0);
    }

    #[test]
    fn uncommitted_transaction_rolls_back() {
        let db = Database::open_in_memory().expect("open db");
        let session = db.connect(&CancelToken::new()).expect("session");
        session.execute_batch("CREATE TABLE t (v INTEGER)").unwrap();
        {
            let tx = session.begin().expect("begin");
            tx.session().execute("INSERT INTO t VALUES (?)", &[&7]).unwrap();
        }
        assert_eq!(session.query_count("SELECT COUNT(*) FROM t", &[]).unwrap(), 0);

        let tx = session.begin().expect("begin");
        tx.session().execute("INSERT INTO t VALUES (?)", &[&8]).unwrap();
        tx.commit().expect("commit");
        assert_eq!(session.query_count("SELECT COUNT(*) FROM t", &[]).unwrap(), 1);
    }

    #[test]
    fn cancelled_session_refuses_queries() {
        let db = Database::open_in_memory().expect("open db");
        let cancel = CancelToken::new();
        let session = db.connect(&cancel).expect("session");
        cancel.cancel();
        assert!(matches!(
            session.execute_batch("SELECT 1"),
            Err(LoadError::Cancelled)
        ));
    }
}
