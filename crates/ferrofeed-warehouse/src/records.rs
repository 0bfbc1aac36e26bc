//! Canonical record store.

use ::duckdb::ToSql;
use serde::Serialize;

use crate::{in_transaction, Warehouse, WarehouseError};

/// One canonical record in storage form.
///
/// `observed_at` is `YYYY-MM-DD HH:MM:SS` in UTC; the JSON columns are
/// already serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub symbol: String,
    pub endpoint: String,
    pub observed_at: String,
    pub data_type: String,
    pub quality: String,
    pub parsed_values: String,
    pub raw_payload: String,
    pub text_extract: Option<String>,
    pub metadata: String,
    pub session_id: String,
    pub epoch: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertReport {
    pub inserted: usize,
    /// Rows whose natural key was already stored.
    pub duplicates: usize,
}

impl Warehouse {
    /// Insert rows in one transaction, ignoring natural-key conflicts.
    ///
    /// Either every row is durable or none is.
    pub fn insert_records(&self, rows: &[RecordRow]) -> Result<InsertReport, WarehouseError> {
        if rows.is_empty() {
            return Ok(InsertReport::default());
        }

        let connection = self.write_connection()?;
        in_transaction(&connection, |connection| {
            let mut report = InsertReport::default();
            for row in rows {
                let key: [&dyn ToSql; 3] = [&row.symbol, &row.endpoint, &row.observed_at];
                let existing: i64 = connection.query_row(
                    "SELECT COUNT(*) FROM canonical_records \
                     WHERE symbol = ? AND endpoint = ? AND observed_at = CAST(? AS TIMESTAMP)",
                    key.as_slice(),
                    |result| result.get(0),
                )?;
                if existing > 0 {
                    report.duplicates += 1;
                    continue;
                }

                let params: [&dyn ToSql; 11] = [
                    &row.symbol,
                    &row.endpoint,
                    &row.observed_at,
                    &row.data_type,
                    &row.quality,
                    &row.parsed_values,
                    &row.raw_payload,
                    &row.text_extract,
                    &row.metadata,
                    &row.session_id,
                    &row.epoch,
                ];
                connection.execute(
                    "INSERT OR IGNORE INTO canonical_records \
                     (symbol, endpoint, observed_at, data_type, quality, parsed_values, raw_payload, \
                      text_extract, metadata, session_id, epoch, ingested_at) \
                     VALUES (?, ?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
                report.inserted += 1;
            }
            Ok(report)
        })
    }

    /// Stored record count, optionally for one instrument.
    pub fn count_records(&self, symbol: Option<&str>) -> Result<i64, WarehouseError> {
        let connection = self.read_connection()?;
        let count = match symbol {
            Some(symbol) => {
                let params: [&dyn ToSql; 1] = [&symbol];
                connection.query_row(
                    "SELECT COUNT(*) FROM canonical_records WHERE symbol = ?",
                    params.as_slice(),
                    |row| row.get(0),
                )?
            }
            None => {
                connection.query_row("SELECT COUNT(*) FROM canonical_records", [], |row| row.get(0))?
            }
        };
        Ok(count)
    }
}
