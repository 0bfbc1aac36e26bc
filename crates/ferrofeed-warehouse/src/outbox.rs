//! Text outbox drained by the embedding subsystem.

use ::duckdb::ToSql;

use crate::{Warehouse, WarehouseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextUnitRow {
    /// Stable id; replays of the same unit are ignored.
    pub id: String,
    pub content: String,
    /// Serialized JSON object.
    pub metadata: String,
    pub session_id: String,
}

impl Warehouse {
    /// Queue a text unit. Returns `false` when the id was already queued.
    pub fn enqueue_text_unit(&self, unit: &TextUnitRow) -> Result<bool, WarehouseError> {
        let connection = self.write_connection()?;
        let key: [&dyn ToSql; 1] = [&unit.id];
        let existing: i64 = connection.query_row(
            "SELECT COUNT(*) FROM text_units WHERE id = ?",
            key.as_slice(),
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(false);
        }

        let params: [&dyn ToSql; 4] = [&unit.id, &unit.content, &unit.metadata, &unit.session_id];
        connection.execute(
            "INSERT OR IGNORE INTO text_units (id, content, metadata, session_id, created_at) \
             VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(true)
    }

    pub fn count_text_units(&self) -> Result<i64, WarehouseError> {
        let connection = self.read_connection()?;
        Ok(connection.query_row("SELECT COUNT(*) FROM text_units", [], |row| row.get(0))?)
    }
}
