use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{coerce, flatten, Context};
use crate::{CanonicalRecord, UtcDateTime};

const LIST_KEYS: &[&str] = &["data", "events", "payload"];

/// Candidate event date fields, in priority order.
const DATE_FIELDS: &[&str] = &[
    "date",
    "ex_dividend_date",
    "effective_date",
    "transaction_date",
    "reportDate",
    "fiscalDateEnding",
];

pub(super) fn normalize(context: &Context<'_>) -> Vec<CanonicalRecord> {
    let list = match context.payload {
        Value::Array(items) => Some(items),
        Value::Object(object) => LIST_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_array)),
        _ => None,
    };
    let Some(items) = list else {
        return vec![context.empty("no event list found")];
    };

    // Events sharing a date are spread one second apart so each keeps a
    // distinct natural key; the ordinal follows provider order.
    let mut seen: HashMap<UtcDateTime, i64> = HashMap::new();
    let records = items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let fields = item
                .as_object()
                .ok_or_else(|| format!("event {index} is not an object"))?;
            let (field, date) =
                event_date(fields).ok_or_else(|| format!("event {index} has no usable date"))?;
            let ordinal = seen.entry(date).or_insert(0);
            let observed_at = date
                .checked_plus_seconds(*ordinal)
                .ok_or_else(|| format!("event {index} date is out of range"))?;
            *ordinal += 1;

            Ok(context
                .record(observed_at, item.clone())
                .with_values(flatten(fields, coerce, &[field]))
                .with_metadata("date_field", field))
        })
        .collect();
    context.finish(records)
}

fn event_date(fields: &Map<String, Value>) -> Option<(&'static str, UtcDateTime)> {
    DATE_FIELDS.iter().find_map(|name| {
        let value = fields.get(*name)?.as_str()?;
        UtcDateTime::parse_lenient(value).ok().map(|date| (*name, date))
    })
}
