//! SQLite connection pooling
//!
//! Builds an r2d2 pool whose connections come pre-configured with the
//! pragmas the cache relies on: WAL journaling for concurrent readers, a
//! busy timeout for lock contention, and NORMAL synchronous mode.

use std::path::Path;
use std::time::Duration;

use dealflow_domain::Result;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::errors::InfraError;

/// Pool of pragma-initialised SQLite connections
pub type DbPool = Pool<SqliteConnectionManager>;

/// One checked-out connection
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// How long a caller waits for a free connection before giving up
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a connection waits on a locked database before returning busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a connection pool for the cache database at `path`
///
/// Every connection handed out by the pool has already run the pragma batch,
/// so callers never see a connection in the default rollback-journal mode.
pub fn create_pool<P: AsRef<Path>>(path: P, pool_size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path.as_ref()).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\n\
             PRAGMA wal_autocheckpoint=1000;\n\
             PRAGMA synchronous=NORMAL;",
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(())
    });

    let pool = Pool::builder()
        .max_size(pool_size.max(1))
        .connection_timeout(CONNECTION_TIMEOUT)
        .build(manager)
        .map_err(InfraError::from)?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn pool_connections_run_in_wal_mode() {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(temp_dir.path().join("test.db"), 2).unwrap();

        let conn = pool.get().unwrap();
        let journal_mode: String =
            conn.pragma_query_value(None, "journal_mode", |row| row.get(0)).unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");

        let synchronous: i32 =
            conn.pragma_query_value(None, "synchronous", |row| row.get(0)).unwrap();
        assert_eq!(synchronous, 1); // 1 = NORMAL
    }

    #[test]
    fn zero_pool_size_is_clamped() {
        let temp_dir = TempDir::new().unwrap();
        let pool = create_pool(temp_dir.path().join("test.db"), 0).unwrap();
        assert_eq!(pool.max_size(), 1);
    }
}
