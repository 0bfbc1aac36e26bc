use ferrofeed_warehouse::{QueryGuardrails, Warehouse};
use serde_json::{json, Value};

use crate::cli::SqlArgs;
use crate::error::CliError;

pub fn run(args: &SqlArgs, warehouse: &Warehouse) -> Result<Value, CliError> {
    let query = args.query.trim();
    if query.is_empty() {
        return Err(CliError::Command(String::from("query must not be empty")));
    }

    let guardrails = QueryGuardrails {
        max_rows: args.max_rows,
        query_timeout_ms: args.query_timeout_ms,
    };
    let result = warehouse.execute_query(query, guardrails, args.write)?;

    let mut data = serde_json::to_value(&result)?;
    if result.truncated {
        data["warning"] = json!(format!(
            "result truncated at {} rows (use --max-rows to increase limit)",
            result.row_count
        ));
    }
    Ok(data)
}
