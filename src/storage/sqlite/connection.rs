//! Shared connection handling for the `SQLite` credential store.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Special database path for an in-process database.
pub const IN_MEMORY: &str = ":memory:";

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// we recover the inner value and log a warning. The connection itself is
/// still valid because `SQLite` rolls back the interrupted statement.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("SQLite mutex was poisoned, recovering");
            metrics::counter!("sqlite_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Opens the database at `database_url`, creating parent directories.
///
/// `:memory:` opens a private in-process database.
///
/// # Errors
///
/// Returns [`Error::Storage`] if the directory or database cannot be opened.
pub fn open_connection(database_url: &str) -> Result<Connection> {
    if database_url == IN_MEMORY {
        return Connection::open_in_memory().map_err(|e| Error::storage("open_memory_db", e));
    }

    let path = Path::new(database_url);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| Error::storage("create_db_dir", e))?;
    }

    let conn = Connection::open(path)
        .map_err(|e| Error::storage("open_db", format!("{}: {e}", path.display())))?;
    configure_connection(&conn);
    Ok(conn)
}

/// Configures a `SQLite` connection for a small, write-light workload.
///
/// - **WAL mode**: concurrent readers with a single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits up to 5 seconds for locks instead of failing
///
/// Pragma results are ignored; `journal_mode` returns a row that would make
/// `execute_batch` fail, and an in-memory database reports `memory`.
pub fn configure_connection(conn: &Connection) {
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.pragma_update(None, "busy_timeout", "5000");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_acquire_lock_concurrent() {
        let mutex = Arc::new(Mutex::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    let mut guard = acquire_lock(&mutex);
                    *guard += 1;
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*acquire_lock(&mutex), 10);
    }

    #[test]
    fn test_acquire_lock_recovers_from_poison() {
        let mutex = Arc::new(Mutex::new(7));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock(&mutex), 7);
    }

    #[test]
    fn test_open_connection_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.db");
        let conn = open_connection(path.to_str().unwrap()).unwrap();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_open_in_memory() {
        assert!(open_connection(IN_MEMORY).is_ok());
    }
}
