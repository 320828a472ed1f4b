//! SQLite cache: connection pool, schema management and repositories
//!
//! Every repository follows the same shape: thin async trait methods that
//! clone their inputs, hop onto the blocking pool, and run plain rusqlite
//! against a pooled connection.

mod catalog_repository;
mod deal_repository;
mod manager;
mod note_repository;
mod pool;
mod sync_state_repository;

pub use catalog_repository::SqliteCatalogRepository;
pub use deal_repository::SqliteDealRepository;
pub use manager::DbManager;
pub use note_repository::SqliteNoteRepository;
pub use pool::{create_pool, DbConnection, DbPool};
pub use sync_state_repository::SqliteSyncStateRepository;

use dealflow_domain::DealflowError;

use crate::errors::InfraError;

pub(crate) fn map_sql_error(err: rusqlite::Error) -> DealflowError {
    InfraError::from(err).into()
}

pub(crate) fn map_join_error(err: tokio::task::JoinError) -> DealflowError {
    if err.is_cancelled() {
        DealflowError::Internal("blocking task cancelled".into())
    } else {
        DealflowError::Internal(format!("blocking task failed: {err}"))
    }
}
