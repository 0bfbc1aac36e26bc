//! Ingestion session ledger.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use ::duckdb::ToSql;
use serde::Serialize;
use serde_json::Value;

use crate::{parse_json_column, Warehouse, WarehouseError};

const SELECT_SESSION: &str = "SELECT session_id, strftime(started_at, '%Y-%m-%d %H:%M:%S'), \
     strftime(ended_at, '%Y-%m-%d %H:%M:%S'), status, instruments_completed, records_written, \
     api_calls, errors, metadata, strftime(updated_at, '%Y-%m-%d %H:%M:%S') \
     FROM ingestion_sessions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl Display for SessionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = WarehouseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(WarehouseError::CorruptRow {
                table: "ingestion_sessions",
                message: format!("unknown status '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRow {
    pub session_id: String,
    /// `YYYY-MM-DD HH:MM:SS` UTC.
    pub started_at: String,
    pub ended_at: Option<String>,
    pub status: SessionStatus,
    pub instruments_completed: i64,
    pub records_written: i64,
    pub api_calls: i64,
    pub errors: i64,
    pub metadata: Value,
    pub updated_at: Option<String>,
}

impl SessionRow {
    pub fn running(session_id: impl Into<String>, started_at: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            started_at: started_at.into(),
            ended_at: None,
            status: SessionStatus::Running,
            instruments_completed: 0,
            records_written: 0,
            api_calls: 0,
            errors: 0,
            metadata: Value::Object(serde_json::Map::new()),
            updated_at: None,
        }
    }
}

impl Warehouse {
    pub fn insert_session(&self, session: &SessionRow) -> Result<(), WarehouseError> {
        let metadata = session.metadata.to_string();
        let status = session.status.as_str();
        let connection = self.write_connection()?;
        let params: [&dyn ToSql; 9] = [
            &session.session_id,
            &session.started_at,
            &session.ended_at,
            &status,
            &session.instruments_completed,
            &session.records_written,
            &session.api_calls,
            &session.errors,
            &metadata,
        ];
        connection.execute(
            "INSERT INTO ingestion_sessions \
             (session_id, started_at, ended_at, status, instruments_completed, records_written, \
              api_calls, errors, metadata, updated_at) \
             VALUES (?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Overwrite status, totals and metadata of an existing session.
    pub fn update_session(&self, session: &SessionRow) -> Result<(), WarehouseError> {
        let metadata = session.metadata.to_string();
        let status = session.status.as_str();
        let connection = self.write_connection()?;
        let params: [&dyn ToSql; 8] = [
            &session.ended_at,
            &status,
            &session.instruments_completed,
            &session.records_written,
            &session.api_calls,
            &session.errors,
            &metadata,
            &session.session_id,
        ];
        let updated = connection.execute(
            "UPDATE ingestion_sessions SET \
             ended_at = CAST(? AS TIMESTAMP), status = ?, instruments_completed = ?, \
             records_written = ?, api_calls = ?, errors = ?, metadata = ?, \
             updated_at = CURRENT_TIMESTAMP \
             WHERE session_id = ?",
            params.as_slice(),
        )?;
        if updated == 0 {
            return Err(WarehouseError::CorruptRow {
                table: "ingestion_sessions",
                message: format!("session '{}' does not exist", session.session_id),
            });
        }
        Ok(())
    }

    pub fn load_session(&self, session_id: &str) -> Result<Option<SessionRow>, WarehouseError> {
        let sql = format!("{SELECT_SESSION} WHERE session_id = ?");
        let params: [&dyn ToSql; 1] = [&session_id];
        self.first_session(sql.as_str(), params.as_slice())
    }

    /// Most recently started session still marked `running`.
    pub fn latest_running_session(&self) -> Result<Option<SessionRow>, WarehouseError> {
        let sql = format!(
            "{SELECT_SESSION} WHERE status = 'running' ORDER BY started_at DESC, updated_at DESC LIMIT 1"
        );
        self.first_session(sql.as_str(), &[])
    }

    pub fn latest_session(&self) -> Result<Option<SessionRow>, WarehouseError> {
        let sql = format!("{SELECT_SESSION} ORDER BY started_at DESC, updated_at DESC LIMIT 1");
        self.first_session(sql.as_str(), &[])
    }

    fn first_session(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<Option<SessionRow>, WarehouseError> {
        let connection = self.read_connection()?;
        let mut statement = connection.prepare(sql)?;
        let mut rows = statement.query(params)?;
        match rows.next()? {
            Some(row) => Ok(Some(read_session(row)?)),
            None => Ok(None),
        }
    }
}

fn read_session(row: &::duckdb::Row<'_>) -> Result<SessionRow, WarehouseError> {
    let status: String = row.get(3)?;
    let metadata: String = row.get(8)?;
    Ok(SessionRow {
        session_id: row.get(0)?,
        started_at: row.get(1)?,
        ended_at: row.get(2)?,
        status: status.parse()?,
        instruments_completed: row.get(4)?,
        records_written: row.get(5)?,
        api_calls: row.get(6)?,
        errors: row.get(7)?,
        metadata: parse_json_column("ingestion_sessions", &metadata)?,
        updated_at: row.get(9)?,
    })
}
