use serde_json::{Map, Value};

use super::{coerce_numeric, flatten, Context};
use crate::{CanonicalRecord, ParsedValue, QualityFlag, UtcDateTime};

/// Prefixes of the nested timestamp map, in priority order.
const SERIES_PREFIXES: &[&str] = &[
    "Time Series",
    "Weekly Time Series",
    "Weekly Adjusted Time Series",
    "Monthly Time Series",
    "Monthly Adjusted Time Series",
    "Technical Analysis",
];

/// Macro and commodity series carry a list of `{date, value}` rows instead.
const LIST_KEY: &str = "data";
const LIST_METADATA: &[&str] = &["name", "interval", "unit"];

pub(super) fn normalize(context: &Context<'_>) -> Vec<CanonicalRecord> {
    let Some(object) = context.payload.as_object() else {
        return vec![context.empty("payload is not an object")];
    };

    for prefix in SERIES_PREFIXES {
        let found = object
            .iter()
            .find(|(key, value)| key.starts_with(prefix) && value.is_object());
        if let Some((key, Value::Object(series))) = found {
            return from_map(context, key, series);
        }
    }

    if let Some(rows) = object.get(LIST_KEY).and_then(Value::as_array) {
        return from_rows(context, object, rows);
    }

    vec![context.empty("no time series key found")]
}

fn from_map(context: &Context<'_>, key: &str, series: &Map<String, Value>) -> Vec<CanonicalRecord> {
    let items = series
        .iter()
        .map(|(timestamp, fields)| {
            let observed_at =
                UtcDateTime::parse_lenient(timestamp).map_err(|error| error.to_string())?;
            let fields = fields
                .as_object()
                .ok_or_else(|| format!("entry '{timestamp}' is not an object"))?;
            Ok(point(context, observed_at, fields, &[]).with_metadata("series_key", key))
        })
        .collect();
    context.finish(items)
}

fn from_rows(
    context: &Context<'_>,
    object: &Map<String, Value>,
    rows: &[Value],
) -> Vec<CanonicalRecord> {
    let items = rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let fields = row
                .as_object()
                .ok_or_else(|| format!("row {index} is not an object"))?;
            let date = fields
                .get("date")
                .and_then(Value::as_str)
                .ok_or_else(|| format!("row {index} has no date"))?;
            let observed_at = UtcDateTime::parse_lenient(date).map_err(|error| error.to_string())?;

            let mut record = point(context, observed_at, fields, &["date"]);
            for name in LIST_METADATA {
                if let Some(value) = object.get(*name).and_then(Value::as_str) {
                    record = record.with_metadata(*name, value);
                }
            }
            Ok(record)
        })
        .collect();
    context.finish(items)
}

fn point(
    context: &Context<'_>,
    observed_at: UtcDateTime,
    fields: &Map<String, Value>,
    skip: &[&str],
) -> CanonicalRecord {
    let values = flatten(fields, coerce_numeric, skip);
    let quality = if !values.is_empty() && values.values().all(ParsedValue::is_null) {
        QualityFlag::Partial
    } else if values.is_empty() {
        QualityFlag::Empty
    } else {
        QualityFlag::Success
    };
    context
        .record(observed_at, Value::Object(fields.clone()))
        .with_values(values)
        .with_quality(quality)
}
