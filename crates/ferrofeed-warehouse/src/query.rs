//! Operator SQL under row and time limits.
//!
//! Statements are classified before a connection is taken: reads
//! (`SELECT`, `WITH`, `EXPLAIN`, `SHOW`, `DESCRIBE`) run on the read pool and
//! must be a single statement; anything else needs `allow_write` and may be a
//! `;`-separated script.

use std::time::{Duration, Instant};

use ::duckdb::types::{TimeUnit, Value as DuckValue};
use ::duckdb::{Connection, Row, ToSql};
use serde::Serialize;
use serde_json::{Number, Value};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime};

use crate::{AccessMode, Warehouse, WarehouseError};

const READ_KEYWORDS: &[&str] = &["SELECT", "WITH", "EXPLAIN", "SHOW", "DESCRIBE"];

/// Unix epoch as a Julian day number.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    pub max_rows: usize,
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    fn check(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(rejected("row limit must be at least 1"));
        }
        if self.query_timeout_ms == 0 {
            return Err(rejected("timeout must be at least 1ms"));
        }
        Ok(())
    }

    fn deadline(self) -> Deadline {
        Deadline {
            started: Instant::now(),
            limit: Duration::from_millis(self.query_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub r#type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<SqlColumn>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// More rows matched than `max_rows`.
    pub truncated: bool,
}

impl QueryResult {
    fn statement_only() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            truncated: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Statement<'a> {
    Read(&'a str),
    Write(&'a str),
}

impl Statement<'_> {
    const fn access_mode(self) -> AccessMode {
        match self {
            Self::Read(_) => AccessMode::ReadOnly,
            Self::Write(_) => AccessMode::ReadWrite,
        }
    }
}

struct Deadline {
    started: Instant,
    limit: Duration,
}

impl Deadline {
    fn check(&self) -> Result<(), WarehouseError> {
        if self.started.elapsed() <= self.limit {
            return Ok(());
        }
        Err(WarehouseError::QueryTimeout {
            timeout_ms: u64::try_from(self.limit.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

impl Warehouse {
    /// Run operator SQL. Writes require `allow_write`.
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
        allow_write: bool,
    ) -> Result<QueryResult, WarehouseError> {
        guardrails.check()?;
        let statement = classify(sql, allow_write)?;
        let connection = self.manager.acquire(statement.access_mode())?;
        let deadline = guardrails.deadline();

        match statement {
            Statement::Read(sql) => read(&connection, sql, guardrails.max_rows, &deadline),
            Statement::Write(sql) => {
                connection.execute_batch(sql)?;
                deadline.check()?;
                tracing::info!(sql, "operator write executed");
                Ok(QueryResult::statement_only())
            }
        }
    }
}

fn classify(sql: &str, allow_write: bool) -> Result<Statement<'_>, WarehouseError> {
    let sql = sql.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        return Err(rejected("query must not be empty"));
    }

    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    let is_read = READ_KEYWORDS.contains(&keyword.as_str());
    let statements = sql.split(';').filter(|part| !part.trim().is_empty()).count();

    match (is_read, allow_write) {
        (true, false) if statements > 1 => Err(rejected(
            "only one statement is allowed without --write",
        )),
        (true, false) => Ok(Statement::Read(sql)),
        (true, true) if statements == 1 => Ok(Statement::Read(sql)),
        (_, true) => Ok(Statement::Write(sql)),
        (false, false) => Err(rejected(
            "read-only queries must start with SELECT, WITH, EXPLAIN, SHOW or DESCRIBE; pass --write to modify data",
        )),
    }
}

fn read(
    connection: &Connection,
    sql: &str,
    max_rows: usize,
    deadline: &Deadline,
) -> Result<QueryResult, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    // DuckDB only knows the result schema after the first execution.
    let _ = statement.query([] as [&dyn ToSql; 0])?;
    let columns: Vec<SqlColumn> = (0..statement.column_count())
        .map(|index| SqlColumn {
            name: statement
                .column_name(index)
                .map_or_else(|_| format!("column_{index}"), ToString::to_string),
            r#type: statement.column_type(index).to_string(),
        })
        .collect();

    let width = columns.len();
    let mut cursor = statement.query([] as [&dyn ToSql; 0])?;
    let mut rows = Vec::new();
    let mut truncated = false;
    while let Some(row) = cursor.next()? {
        deadline.check()?;
        if rows.len() == max_rows {
            truncated = true;
            break;
        }
        rows.push(row_values(row, width)?);
    }
    deadline.check()?;

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

fn row_values(row: &Row<'_>, width: usize) -> Result<Vec<Value>, ::duckdb::Error> {
    (0..width)
        .map(|index| row.get::<_, DuckValue>(index).map(json_value))
        .collect()
}

fn json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(flag) => Value::Bool(flag),
        DuckValue::TinyInt(n) => Value::from(n),
        DuckValue::SmallInt(n) => Value::from(n),
        DuckValue::Int(n) => Value::from(n),
        DuckValue::BigInt(n) => Value::from(n),
        DuckValue::UTinyInt(n) => Value::from(n),
        DuckValue::USmallInt(n) => Value::from(n),
        DuckValue::UInt(n) => Value::from(n),
        DuckValue::UBigInt(n) => Value::from(n),
        DuckValue::Float(n) => float(f64::from(n)),
        DuckValue::Double(n) => float(n),
        DuckValue::Text(text) => Value::String(text),
        DuckValue::Blob(bytes) => Value::String(hex::encode(bytes)),
        DuckValue::Timestamp(unit, ticks) => timestamp(unit, ticks),
        DuckValue::Date32(days) => date(days),
        other => Value::String(format!("{other:?}")),
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Stored timestamps are UTC; render them as RFC 3339.
fn timestamp(unit: TimeUnit, ticks: i64) -> Value {
    let nanos_per_tick: i128 = match unit {
        TimeUnit::Second => 1_000_000_000,
        TimeUnit::Millisecond => 1_000_000,
        TimeUnit::Microsecond => 1_000,
        TimeUnit::Nanosecond => 1,
    };
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ticks) * nanos_per_tick)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .map_or_else(|| Value::from(ticks), Value::String)
}

fn date(days: i32) -> Value {
    days.checked_add(UNIX_EPOCH_JULIAN_DAY)
        .and_then(|julian| Date::from_julian_day(julian).ok())
        .map_or_else(|| Value::from(days), |day| Value::String(day.to_string()))
}

fn rejected(message: &str) -> WarehouseError {
    WarehouseError::QueryRejected(message.to_owned())
}
