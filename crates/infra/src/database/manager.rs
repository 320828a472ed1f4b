//! Database connection manager backed by the shared SQLite pool.

use std::path::{Path, PathBuf};

use chrono::Utc;
use dealflow_domain::{DealflowError, Result};
use rusqlite::params;
use tracing::info;

use super::map_sql_error;
use super::pool::{create_pool, DbConnection, DbPool};
use crate::errors::InfraError;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Owns the SQLite pool and the schema lifecycle of the local cache.
pub struct DbManager {
    pool: DbPool,
    path: PathBuf,
}

impl DbManager {
    /// Open (or create) the cache database with the given pool size.
    pub fn new<P: AsRef<Path>>(db_path: P, pool_size: u32) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let pool = create_pool(&path, pool_size)?;

        info!(
            db_path = %path.display(),
            max_connections = pool.max_size(),
            "sqlite pool initialised"
        );

        Ok(Self { pool, path })
    }

    /// Acquire a connection from the pool.
    pub fn get_connection(&self) -> Result<DbConnection> {
        self.pool.get().map_err(|e| InfraError::from(e).into())
    }

    /// Install the schema on a fresh database, or verify the recorded version
    /// on an existing one.
    ///
    /// The cache holds nothing that cannot be re-pulled from the CRM, so a
    /// version mismatch is reported as an error with a rebuild hint instead of
    /// being migrated in place.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute_batch(SCHEMA_SQL).map_err(map_sql_error)?;

        match recorded_version(&conn)? {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                    params![SCHEMA_VERSION, Utc::now().timestamp()],
                )
                .map_err(map_sql_error)?;
                info!(version = SCHEMA_VERSION, "cache schema installed");
            }
            Some(SCHEMA_VERSION) => {}
            Some(found) => {
                return Err(DealflowError::Database(format!(
                    "cache schema is v{found} but this build expects v{SCHEMA_VERSION}; \
                     delete the cache file to rebuild it from the CRM"
                )));
            }
        }
        Ok(())
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Round-trip a trivial query to confirm the pool can serve connections.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).map_err(map_sql_error)?;
        Ok(())
    }
}

fn recorded_version(conn: &DbConnection) -> Result<Option<i32>> {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i32>>(0)
    })
    .map_err(map_sql_error)
}
