use serde_json::Value;

use super::{coerce, flatten, Context};
use crate::{CanonicalRecord, QualityFlag};

/// Wrapper objects some snapshot reports nest their fields under.
const WRAPPERS: &[&str] = &["Global Quote", "Realtime Currency Exchange Rate"];

pub(super) fn normalize(context: &Context<'_>) -> Vec<CanonicalRecord> {
    let Some(object) = context.payload.as_object() else {
        return vec![context.empty("payload is not an object")];
    };

    let fields = match WRAPPERS.iter().find_map(|key| object.get(*key)) {
        Some(Value::Object(inner)) => inner,
        Some(_) => return vec![context.empty("snapshot wrapper is not an object")],
        None => object,
    };
    if fields.is_empty() {
        return vec![context.empty("snapshot has no fields")];
    }

    let values = flatten(fields, coerce, &[]);
    if values.is_empty() {
        return vec![context.empty("snapshot has no scalar fields")];
    }

    let complete = context
        .spec
        .presence_field
        .and_then(|field| values.get(field))
        .is_some_and(|value| !value.is_null());
    let quality = if complete {
        QualityFlag::Success
    } else {
        QualityFlag::Partial
    };

    vec![context
        .record(context.fetched_at, context.payload.clone())
        .with_values(values)
        .with_quality(quality)]
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::normalize::normalize;
    use crate::{ParsedValue, QualityFlag, Symbol, UtcDateTime};

    fn fetched_at() -> UtcDateTime {
        UtcDateTime::parse("2024-03-08T21:00:00Z").expect("ts")
    }

    fn run(endpoint: &str, payload: serde_json::Value) -> Vec<crate::CanonicalRecord> {
        normalize(
            endpoint,
            &payload,
            &Symbol::parse("IBM").expect("symbol"),
            fetched_at(),
        )
    }

    #[test]
    fn quote_is_stamped_with_fetch_time() {
        let records = run(
            "global_quote",
            json!({"Global Quote": {
                "01. symbol": "IBM",
                "05. price": "196.10",
                "07. latest trading day": "2024-03-08",
                "10. change percent": "0.52%"
            }}),
        );
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.observed_at, fetched_at());
        assert_eq!(record.quality, QualityFlag::Success);
        assert_eq!(record.parsed_values["price"], ParsedValue::Number(196.1));
        assert_eq!(record.parsed_values["change_percent"], ParsedValue::Number(0.52));
        assert_eq!(
            record.parsed_values["latest_trading_day"],
            ParsedValue::Text(String::from("2024-03-08"))
        );
    }

    #[test]
    fn overview_without_presence_field_is_partial() {
        let records = run(
            "overview",
            json!({"Name": "International Business Machines", "PERatio": "22.1"}),
        );
        assert_eq!(records[0].quality, QualityFlag::Partial);
        assert_eq!(records[0].parsed_values["pe_ratio"], ParsedValue::Number(22.1));
    }

    #[test]
    fn overview_keeps_text_and_skips_nested_values() {
        let records = run(
            "etf_profile",
            json!({"net_assets": "1000", "holdings": [{"symbol": "AAPL"}], "leveraged": "NO"}),
        );
        let record = &records[0];
        assert_eq!(record.quality, QualityFlag::Success);
        assert!(!record.parsed_values.contains_key("holdings"));
        assert_eq!(
            record.parsed_values["leveraged"],
            ParsedValue::Text(String::from("NO"))
        );
        assert_eq!(record.raw_payload["holdings"][0]["symbol"], json!("AAPL"));
    }

    #[test]
    fn exchange_rate_wrapper_is_unwrapped() {
        let records = run(
            "currency_exchange_rate",
            json!({"Realtime Currency Exchange Rate": {
                "1. From_Currency Code": "USD",
                "5. Exchange Rate": "151.20"
            }}),
        );
        assert_eq!(records[0].quality, QualityFlag::Success);
        assert_eq!(
            records[0].parsed_values["from_currency_code"],
            ParsedValue::Text(String::from("USD"))
        );
    }

    #[test]
    fn empty_quote_wrapper_is_empty() {
        let records = run("global_quote", json!({"Global Quote": {}}));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].quality, QualityFlag::Empty);
    }
}
