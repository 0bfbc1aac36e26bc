//! Per-instrument progress ledger.

use ::duckdb::ToSql;
use serde::Serialize;

use crate::{parse_json_column, Warehouse, WarehouseError};

const SELECT_CHECKPOINT: &str = "SELECT symbol, last_completed_endpoint, epoch, endpoints_completed, \
     records_written, failed_endpoints, session_id, strftime(updated_at, '%Y-%m-%d %H:%M:%S') \
     FROM ingestion_checkpoints";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointRow {
    pub symbol: String,
    /// `None` until the first endpoint of the owning epoch completes.
    pub last_completed_endpoint: Option<String>,
    pub epoch: i64,
    pub endpoints_completed: i64,
    pub records_written: i64,
    pub failed_endpoints: Vec<String>,
    pub session_id: String,
    /// Set by the store on every save.
    pub updated_at: Option<String>,
}

impl CheckpointRow {
    /// Fresh checkpoint owned by `session_id` for `epoch`.
    pub fn start(symbol: impl Into<String>, epoch: i64, session_id: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last_completed_endpoint: None,
            epoch,
            endpoints_completed: 0,
            records_written: 0,
            failed_endpoints: Vec::new(),
            session_id: session_id.into(),
            updated_at: None,
        }
    }

    pub fn is_owned_by(&self, session_id: &str, epoch: i64) -> bool {
        self.session_id == session_id && self.epoch == epoch
    }
}

impl Warehouse {
    pub fn load_checkpoint(&self, symbol: &str) -> Result<Option<CheckpointRow>, WarehouseError> {
        let connection = self.read_connection()?;
        let sql = format!("{SELECT_CHECKPOINT} WHERE symbol = ?");
        let mut statement = connection.prepare(sql.as_str())?;
        let params: [&dyn ToSql; 1] = [&symbol];
        let mut rows = statement.query(params.as_slice())?;
        match rows.next()? {
            Some(row) => Ok(Some(read_checkpoint(row)?)),
            None => Ok(None),
        }
    }

    /// Checkpoints ordered by symbol, optionally limited to one session.
    pub fn list_checkpoints(
        &self,
        session_id: Option<&str>,
    ) -> Result<Vec<CheckpointRow>, WarehouseError> {
        let connection = self.read_connection()?;
        let mut checkpoints = Vec::new();
        match session_id {
            Some(session_id) => {
                let sql = format!("{SELECT_CHECKPOINT} WHERE session_id = ? ORDER BY symbol");
                let mut statement = connection.prepare(sql.as_str())?;
                let params: [&dyn ToSql; 1] = [&session_id];
                let mut rows = statement.query(params.as_slice())?;
                while let Some(row) = rows.next()? {
                    checkpoints.push(read_checkpoint(row)?);
                }
            }
            None => {
                let sql = format!("{SELECT_CHECKPOINT} ORDER BY symbol");
                let mut statement = connection.prepare(sql.as_str())?;
                let mut rows = statement.query([] as [&dyn ToSql; 0])?;
                while let Some(row) = rows.next()? {
                    checkpoints.push(read_checkpoint(row)?);
                }
            }
        }
        Ok(checkpoints)
    }

    /// Create or replace the checkpoint for `checkpoint.symbol`.
    pub fn save_checkpoint(&self, checkpoint: &CheckpointRow) -> Result<(), WarehouseError> {
        let failed = serde_json::to_string(&checkpoint.failed_endpoints).map_err(|error| {
            WarehouseError::CorruptRow {
                table: "ingestion_checkpoints",
                message: error.to_string(),
            }
        })?;

        let connection = self.write_connection()?;
        let params: [&dyn ToSql; 7] = [
            &checkpoint.symbol,
            &checkpoint.last_completed_endpoint,
            &checkpoint.epoch,
            &checkpoint.endpoints_completed,
            &checkpoint.records_written,
            &failed,
            &checkpoint.session_id,
        ];
        connection.execute(
            "INSERT OR REPLACE INTO ingestion_checkpoints \
             (symbol, last_completed_endpoint, epoch, endpoints_completed, records_written, \
              failed_endpoints, session_id, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }
}

fn read_checkpoint(row: &::duckdb::Row<'_>) -> Result<CheckpointRow, WarehouseError> {
    let failed: String = row.get(5)?;
    Ok(CheckpointRow {
        symbol: row.get(0)?,
        last_completed_endpoint: row.get(1)?,
        epoch: row.get(2)?,
        endpoints_completed: row.get(3)?,
        records_written: row.get(4)?,
        failed_endpoints: parse_json_column("ingestion_checkpoints", &failed)?,
        session_id: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;

    #[test]
    fn missing_checkpoint_is_none() {
        let (_temp, warehouse) = open_temp();
        assert_eq!(warehouse.load_checkpoint("IBM").expect("load"), None);
    }

    #[test]
    fn save_then_load_replaces_in_place() {
        let (_temp, warehouse) = open_temp();
        let mut checkpoint = CheckpointRow::start("IBM", 3, "session-a");
        warehouse.save_checkpoint(&checkpoint).expect("first save");

        checkpoint.last_completed_endpoint = Some(String::from("time_series_daily"));
        checkpoint.endpoints_completed = 2;
        checkpoint.records_written = 40;
        checkpoint.failed_endpoints = vec![String::from("time_series_intraday")];
        warehouse.save_checkpoint(&checkpoint).expect("second save");

        let loaded = warehouse
            .load_checkpoint("IBM")
            .expect("load")
            .expect("present");
        assert_eq!(loaded.last_completed_endpoint.as_deref(), Some("time_series_daily"));
        assert_eq!(loaded.endpoints_completed, 2);
        assert_eq!(loaded.failed_endpoints, vec![String::from("time_series_intraday")]);
        assert!(loaded.is_owned_by("session-a", 3));
        assert!(!loaded.is_owned_by("session-b", 3));
        assert!(loaded.updated_at.is_some());
        assert_eq!(warehouse.list_checkpoints(None).expect("list").len(), 1);
    }

    #[test]
    fn listing_filters_by_session() {
        let (_temp, warehouse) = open_temp();
        warehouse
            .save_checkpoint(&CheckpointRow::start("MSFT", 2, "session-a"))
            .expect("save");
        warehouse
            .save_checkpoint(&CheckpointRow::start("AAPL", 1, "session-a"))
            .expect("save");
        warehouse
            .save_checkpoint(&CheckpointRow::start("IBM", 1, "session-b"))
            .expect("save");

        let owned = warehouse
            .list_checkpoints(Some("session-a"))
            .expect("list");
        let symbols: Vec<_> = owned.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }
}
