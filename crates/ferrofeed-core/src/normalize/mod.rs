//! # Normalizer
//!
//! Pure mapping from a provider payload to [`CanonicalRecord`]s.
//!
//! Dispatch is by [`ShapeClass`], read from the endpoint catalog. Each shape
//! module owns an ordered list of candidate keys and tries them in priority
//! order:
//!
//! | Shape | Candidates |
//! |-------|------------|
//! | time series | `Time Series*`, `Weekly*`, `Monthly*`, `Technical Analysis*`, then a `data` list |
//! | snapshot | `Global Quote`, `Realtime Currency Exchange Rate`, then the top-level object |
//! | tabular report | `annualReports`/`quarterlyReports`, `annualEarnings`/`quarterlyEarnings` |
//! | event list | `data`, `events`, `payload`, or a top-level array |
//! | free text | `feed`, `transcript` |
//!
//! Fallbacks never panic:
//!
//! - no candidate key: one `empty` record carrying the raw payload,
//! - a broken item: skipped, the rest downgraded to `partial`,
//! - every item broken: one `error` record carrying the raw payload.

mod events;
mod snapshot;
mod tabular;
mod text;
mod time_series;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::endpoint::{self, EndpointSpec, ShapeClass};
use crate::fetcher::RawResponse;
use crate::{CanonicalRecord, ParsedValue, QualityFlag, Symbol, UtcDateTime};

/// Normalize one provider payload. `fetched_at` stands in for snapshot times.
pub fn normalize(
    endpoint_id: &str,
    payload: &Value,
    symbol: &Symbol,
    fetched_at: UtcDateTime,
) -> Vec<CanonicalRecord> {
    let Some(spec) = endpoint::find(endpoint_id) else {
        return vec![CanonicalRecord::new(
            symbol.clone(),
            endpoint_id,
            fetched_at,
            "unknown",
            payload.clone(),
        )
        .with_quality(QualityFlag::Error)
        .with_metadata("reason", format!("unknown endpoint '{endpoint_id}'"))];
    };

    let context = Context {
        spec,
        symbol,
        fetched_at,
        payload,
    };
    match spec.shape {
        ShapeClass::TimeSeries => time_series::normalize(&context),
        ShapeClass::Snapshot => snapshot::normalize(&context),
        ShapeClass::TabularReport => tabular::normalize(&context),
        ShapeClass::EventList => events::normalize(&context),
        ShapeClass::FreeText => text::normalize(&context),
    }
}

pub fn normalize_response(response: &RawResponse) -> Vec<CanonicalRecord> {
    normalize(
        &response.endpoint,
        &response.payload,
        &response.symbol,
        response.fetched_at,
    )
}

/// Per-call inputs shared by the shape modules.
struct Context<'a> {
    spec: &'static EndpointSpec,
    symbol: &'a Symbol,
    fetched_at: UtcDateTime,
    payload: &'a Value,
}

impl Context<'_> {
    fn record(&self, observed_at: UtcDateTime, raw: Value) -> CanonicalRecord {
        CanonicalRecord::new(
            self.symbol.clone(),
            self.spec.id,
            observed_at,
            self.spec.data_type,
            raw,
        )
        .with_metadata("shape", self.spec.shape.as_str())
        .with_metadata("fetched_at", self.fetched_at.format_rfc3339())
    }

    fn empty(&self, reason: &str) -> CanonicalRecord {
        self.record(self.fetched_at, self.payload.clone())
            .with_quality(QualityFlag::Empty)
            .with_metadata("reason", reason)
    }

    fn error(&self, reason: &str) -> CanonicalRecord {
        self.record(self.fetched_at, self.payload.clone())
            .with_quality(QualityFlag::Error)
            .with_metadata("reason", reason)
    }

    /// Collapse per-item results into the batch quality rules.
    fn finish(&self, items: Vec<Result<CanonicalRecord, String>>) -> Vec<CanonicalRecord> {
        if items.is_empty() {
            return vec![self.empty("no items")];
        }

        let total = items.len();
        let mut records = Vec::with_capacity(total);
        let mut failures = Vec::new();
        for item in items {
            match item {
                Ok(record) => records.push(record),
                Err(reason) => failures.push(reason),
            }
        }

        if records.is_empty() {
            let reason = format!(
                "all {total} item(s) failed to parse; first: {}",
                failures.first().map(String::as_str).unwrap_or("unknown")
            );
            return vec![self.error(&reason)];
        }

        if !failures.is_empty() {
            tracing::debug!(
                endpoint = self.spec.id,
                symbol = %self.symbol,
                skipped = failures.len(),
                "skipped malformed items"
            );
            for record in &mut records {
                record.quality = record.quality.max(QualityFlag::Partial);
                record
                    .metadata
                    .insert(String::from("skipped_items"), Value::from(failures.len()));
            }
        }
        records
    }
}

/// Strip provider numbering and normalize to snake case.
///
/// `"1. open"` becomes `open`, `"marketCapitalization"` becomes
/// `market_capitalization`, `"1a. open (USD)"` becomes `open_usd`.
pub(crate) fn clean_key(key: &str) -> String {
    let key = key.trim();
    let key = match key.split_once(". ") {
        Some((prefix, rest))
            if prefix.starts_with(|c: char| c.is_ascii_digit())
                && prefix.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            rest
        }
        _ => key,
    };

    let chars: Vec<char> = key.chars().collect();
    let mut cleaned = String::with_capacity(key.len() + 4);
    for (index, &ch) in chars.iter().enumerate() {
        if ch.is_ascii_alphanumeric() {
            let previous = index.checked_sub(1).map(|i| chars[i]);
            let next = chars.get(index + 1).copied();
            // `marketCap` and `52Week` split after the lower/digit run,
            // `PERatio` splits before the last capital of the acronym.
            let boundary = ch.is_ascii_uppercase()
                && previous.is_some_and(|p| {
                    p.is_ascii_lowercase()
                        || p.is_ascii_digit()
                        || (p.is_ascii_uppercase() && next.is_some_and(|n| n.is_ascii_lowercase()))
                });
            if boundary && !cleaned.ends_with('_') {
                cleaned.push('_');
            }
            cleaned.push(ch.to_ascii_lowercase());
        } else if !cleaned.is_empty() && !cleaned.ends_with('_') {
            cleaned.push('_');
        }
    }
    cleaned.trim_end_matches('_').to_owned()
}

/// Numeric when possible, text otherwise; provider placeholders become null.
pub(crate) fn coerce(value: &Value) -> Option<ParsedValue> {
    match value {
        Value::Null => Some(ParsedValue::Null),
        Value::Bool(flag) => Some(ParsedValue::Text(flag.to_string())),
        Value::Number(number) => Some(
            number
                .as_f64()
                .filter(|n| n.is_finite())
                .map_or(ParsedValue::Null, ParsedValue::Number),
        ),
        Value::String(text) => {
            let trimmed = text.trim();
            if is_placeholder(trimmed) {
                return Some(ParsedValue::Null);
            }
            match parse_number(trimmed) {
                Some(number) => Some(ParsedValue::Number(number)),
                None => Some(ParsedValue::Text(trimmed.to_owned())),
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Numeric or null; text is treated as a coercion failure.
pub(crate) fn coerce_numeric(value: &Value) -> Option<ParsedValue> {
    coerce(value).map(|parsed| match parsed {
        ParsedValue::Text(_) => ParsedValue::Null,
        other => other,
    })
}

/// Flatten scalar fields; nested arrays and objects stay in the raw payload only.
pub(crate) fn flatten(
    object: &Map<String, Value>,
    coerce_fn: fn(&Value) -> Option<ParsedValue>,
    skip: &[&str],
) -> BTreeMap<String, ParsedValue> {
    object
        .iter()
        .filter(|(key, _)| !skip.contains(&key.as_str()))
        .filter_map(|(key, value)| coerce_fn(value).map(|parsed| (clean_key(key), parsed)))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

fn is_placeholder(value: &str) -> bool {
    value.is_empty()
        || matches!(
            value.to_ascii_lowercase().as_str(),
            "none" | "null" | "-" | "n/a" | "na" | "nan" | "."
        )
}

fn parse_number(value: &str) -> Option<f64> {
    let value = value.strip_suffix('%').unwrap_or(value);
    value.parse::<f64>().ok().filter(|n| n.is_finite())
}
