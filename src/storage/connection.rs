//! Shared `SQLite` connection handling.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Acquires a mutex, recovering the inner value if a previous holder panicked.
///
/// A panic while holding the connection leaves the connection itself usable;
/// the poison is logged and counted instead of cascading into every later
/// request.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mutex was poisoned, recovering");
            metrics::counter!("riskwatch_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Opens a database file and applies [`configure_connection`].
///
/// # Errors
///
/// Returns [`Error::StorageFailure`] if the file cannot be opened or its
/// parent directory cannot be created.
pub fn open(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::storage("create_db_dir", e))?;
    }
    let conn = Connection::open(path).map_err(|e| Error::storage("open_database", e))?;
    configure_connection(&conn);
    Ok(conn)
}

/// Applies WAL journaling, NORMAL synchronous mode and a 5 second busy timeout.
///
/// `journal_mode` reports the resulting mode as a row, and in-memory databases
/// refuse WAL, so pragma results are ignored.
pub fn configure_connection(conn: &Connection) {
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
}
