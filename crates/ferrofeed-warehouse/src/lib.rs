//! # Ferrofeed Warehouse
//!
//! DuckDB-backed storage for the ferrofeed ingestion engine.
//!
//! ## Overview
//!
//! - **Idempotent record store**: `INSERT OR IGNORE` on the natural key
//! - **Checkpoint ledger**: one progress row per instrument
//! - **Session ledger**: one row per ingestion run with aggregate totals
//! - **Text outbox**: free-text units waiting for the embedding subsystem
//! - **Query guardrails**: read-only SQL with row and timeout limits
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ferrofeed_warehouse::{QueryGuardrails, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let result = warehouse.execute_query(
//!         "SELECT endpoint, records FROM vw_endpoint_coverage ORDER BY records DESC",
//!         QueryGuardrails::default(),
//!         false,
//!     )?;
//!     println!("{} endpoints", result.row_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Key | Description |
//! |-------|-----|-------------|
//! | `canonical_records` | `(symbol, endpoint, observed_at)` | Normalized observations |
//! | `ingestion_checkpoints` | `symbol` | Last completed endpoint per instrument |
//! | `ingestion_sessions` | `session_id` | Run status and totals |
//! | `text_units` | `id` | Text outbox for the embedding subsystem |
//! | `schema_migrations` | `version` | Applied migrations |
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `vw_endpoint_coverage` | Instruments, records and time span per endpoint |
//! | `vw_record_quality` | Record counts per endpoint and quality flag |
//! | `vw_session_throughput` | Session totals and records per second |

pub mod checkpoints;
pub mod duckdb;
pub mod migrations;
pub mod outbox;
pub mod query;
pub mod records;
pub mod sessions;
pub mod views;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::Connection;
use thiserror::Error;

pub use checkpoints::CheckpointRow;
pub use duckdb::{AccessMode, DuckDbConnectionManager, PooledConnection};
pub use outbox::TextUnitRow;
pub use query::{QueryGuardrails, QueryResult, SqlColumn};
pub use records::{InsertReport, RecordRow};
pub use sessions::{SessionRow, SessionStatus};

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("query rejected: {0}")]
    QueryRejected(String),

    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// A stored row could not be decoded.
    #[error("corrupt {table} row: {message}")]
    CorruptRow { table: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for ferrofeed data.
    pub home: PathBuf,
    pub db_path: PathBuf,
    /// Idle connections kept per access mode.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::in_home(resolve_home())
    }
}

impl WarehouseConfig {
    /// Standard layout under an explicit home directory.
    pub fn in_home(home: impl Into<PathBuf>) -> Self {
        let home = home.into();
        let db_path = home.join("warehouse.duckdb");
        Self {
            home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// Handle to the ingestion warehouse. Cheap to clone.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let manager = DuckDbConnectionManager::new(config.db_path.clone(), config.max_pool_size);
        let warehouse = Self { config, manager };
        warehouse.initialize()?;
        tracing::debug!(path = %warehouse.db_path().display(), "warehouse ready");
        Ok(warehouse)
    }

    /// Apply pending migrations and refresh views.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire(AccessMode::ReadWrite)?;
        migrations::apply_migrations(&connection)?;
        views::create_views(&connection)?;
        Ok(())
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    fn write_connection(&self) -> Result<PooledConnection, WarehouseError> {
        Ok(self.manager.acquire(AccessMode::ReadWrite)?)
    }

    fn read_connection(&self) -> Result<PooledConnection, WarehouseError> {
        Ok(self.manager.acquire(AccessMode::ReadOnly)?)
    }
}

/// Run `body` inside one transaction: commit on `Ok`, roll back on `Err`.
fn in_transaction<T>(
    connection: &Connection,
    body: impl FnOnce(&Connection) -> Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    connection.execute_batch("BEGIN TRANSACTION")?;
    match body(connection) {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = connection.execute_batch("ROLLBACK") {
                tracing::warn!(error = %rollback, "rollback failed");
            }
            Err(error)
        }
    }
}

/// `FERROFEED_HOME`, else `$HOME/.ferrofeed`, else `./.ferrofeed`.
pub fn resolve_home() -> PathBuf {
    env::var_os("FERROFEED_HOME")
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".ferrofeed")))
        .unwrap_or_else(|| PathBuf::from(".ferrofeed"))
}

/// Decode a JSON text column.
fn parse_json_column<T: serde::de::DeserializeOwned>(
    table: &'static str,
    raw: &str,
) -> Result<T, WarehouseError> {
    serde_json::from_str(raw).map_err(|error| WarehouseError::CorruptRow {
        table,
        message: error.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use tempfile::TempDir;

    use super::{Warehouse, WarehouseConfig};

    pub fn open_temp() -> (TempDir, Warehouse) {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig {
            home: temp.path().to_path_buf(),
            db_path: temp.path().join("warehouse.duckdb"),
            max_pool_size: 2,
        })
        .expect("warehouse open");
        (temp, warehouse)
    }
}
