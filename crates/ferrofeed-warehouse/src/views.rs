//! Operational views over the ingestion tables.

use ::duckdb::Connection;

/// Create or refresh the operational views:
///
/// - `vw_endpoint_coverage`: instruments, records and time span per endpoint
/// - `vw_record_quality`: record counts per endpoint and quality flag
/// - `vw_session_throughput`: per-session totals and records per second
///
/// # Errors
/// Returns an error if the view SQL fails to execute.
pub fn create_views(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r"
CREATE OR REPLACE VIEW vw_endpoint_coverage AS
SELECT
    endpoint,
    COUNT(DISTINCT symbol) AS symbols,
    COUNT(*) AS records,
    MIN(observed_at) AS first_observed_at,
    MAX(observed_at) AS last_observed_at,
    MAX(ingested_at) AS last_ingested_at
FROM canonical_records
GROUP BY endpoint;

CREATE OR REPLACE VIEW vw_record_quality AS
SELECT
    endpoint,
    quality,
    COUNT(*) AS records
FROM canonical_records
GROUP BY endpoint, quality;

CREATE OR REPLACE VIEW vw_session_throughput AS
SELECT
    session_id,
    status,
    started_at,
    COALESCE(ended_at, updated_at) AS last_seen_at,
    instruments_completed,
    records_written,
    api_calls,
    errors,
    CASE
        WHEN date_diff('second', started_at, COALESCE(ended_at, updated_at)) <= 0 THEN NULL
        ELSE records_written::DOUBLE / date_diff('second', started_at, COALESCE(ended_at, updated_at))
    END AS records_per_second
FROM ingestion_sessions;
",
    )?;

    Ok(())
}
