use ferrofeed_warehouse::Warehouse;
use serde::Serialize;
use serde_json::Value;

use crate::cli::StatusArgs;
use crate::error::CliError;

#[derive(Debug, Default, Serialize)]
struct CheckpointCoverage {
    instruments: usize,
    endpoints_completed: i64,
    records_written: i64,
    /// `SYMBOL:endpoint` pairs that failed in their owning epoch.
    failed_endpoints: Vec<String>,
    last_symbol: Option<String>,
}

pub fn run(args: &StatusArgs, warehouse: &Warehouse) -> Result<Value, CliError> {
    let session = match &args.session {
        Some(session_id) => warehouse
            .load_session(session_id)?
            .ok_or_else(|| CliError::Command(format!("session '{session_id}' not found")))?,
        None => warehouse
            .latest_session()?
            .ok_or_else(|| CliError::Command(String::from("no ingestion session recorded yet")))?,
    };

    let mut coverage = CheckpointCoverage::default();
    let mut latest_update: Option<String> = None;
    for checkpoint in warehouse.list_checkpoints(Some(&session.session_id))? {
        coverage.instruments += 1;
        coverage.endpoints_completed += checkpoint.endpoints_completed;
        coverage.records_written += checkpoint.records_written;
        coverage.failed_endpoints.extend(
            checkpoint
                .failed_endpoints
                .iter()
                .map(|endpoint| format!("{}:{endpoint}", checkpoint.symbol)),
        );
        if checkpoint.updated_at > latest_update {
            latest_update = checkpoint.updated_at.clone();
            coverage.last_symbol = Some(checkpoint.symbol.clone());
        }
    }

    Ok(serde_json::json!({
        "session": session,
        "checkpoints": coverage,
        "records_total": warehouse.count_records(None)?,
        "text_units_queued": warehouse.count_text_units()?,
    }))
}
