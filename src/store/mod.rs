//! Log record storage.
//!
//! The retention engine reaches the store only through [`LogStore`] and the
//! consistent read views it hands out ([`LogSnapshot`]).
//!
//! # Backends
//!
//! - **memory**: Records in process memory (default, lost on restart)
//! - **sqlite**: SQLite database (requires `database-sqlite` feature)

mod error;
mod memory;
#[cfg(feature = "database-sqlite")]
mod sqlite;
mod traits;

use std::sync::Arc;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryLogStore;
#[cfg(feature = "database-sqlite")]
pub use sqlite::SqliteLogStore;
pub use traits::{LogLevel, LogRecord, LogSnapshot, LogStore, NewLogRecord};

use crate::config::DatabaseConfig;

/// Create a log store from configuration.
pub async fn create_store(config: &DatabaseConfig) -> StoreResult<Arc<dyn LogStore>> {
    match config {
        DatabaseConfig::Memory => {
            tracing::warn!("Using in-memory log store; records are lost on restart");
            Ok(Arc::new(InMemoryLogStore::new()))
        }
        #[cfg(feature = "database-sqlite")]
        DatabaseConfig::Sqlite(sqlite) => {
            let store = SqliteLogStore::connect(sqlite).await?;
            if sqlite.run_migrations {
                store.run_migrations().await?;
            }
            tracing::info!(path = %sqlite.path, "Connected to SQLite log store");
            Ok(Arc::new(store))
        }
    }
}
