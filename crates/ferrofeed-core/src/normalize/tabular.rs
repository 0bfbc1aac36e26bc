use serde_json::{Map, Value};

use super::{coerce, flatten, Context};
use crate::{CanonicalRecord, UtcDateTime};

/// `(annual, quarterly)` list keys, in priority order.
const REPORT_PAIRS: &[(&str, &str)] = &[
    ("annualReports", "quarterlyReports"),
    ("annualEarnings", "quarterlyEarnings"),
];

const DATE_FIELDS: &[&str] = &["fiscalDateEnding", "reportedDate"];

pub(super) fn normalize(context: &Context<'_>) -> Vec<CanonicalRecord> {
    let Some(object) = context.payload.as_object() else {
        return vec![context.empty("payload is not an object")];
    };

    for (annual_key, quarterly_key) in REPORT_PAIRS {
        let annual = object.get(*annual_key).and_then(Value::as_array);
        let quarterly = object.get(*quarterly_key).and_then(Value::as_array);
        if annual.is_none() && quarterly.is_none() {
            continue;
        }

        let mut items = Vec::new();
        for (period, reports) in [("annual", annual), ("quarterly", quarterly)] {
            for (index, report) in reports.into_iter().flatten().enumerate() {
                items.push(report_record(context, period, index, report));
            }
        }
        return context.finish(items);
    }

    vec![context.empty("no report list found")]
}

fn report_record(
    context: &Context<'_>,
    period: &str,
    index: usize,
    report: &Value,
) -> Result<CanonicalRecord, String> {
    let fields = report
        .as_object()
        .ok_or_else(|| format!("{period} report {index} is not an object"))?;
    let observed_at = report_date(fields)
        .ok_or_else(|| format!("{period} report {index} has no usable date"))?;

    let mut record = context
        .record(observed_at, report.clone())
        .with_values(flatten(fields, coerce, DATE_FIELDS))
        .with_metadata("period", period);
    record.endpoint = format!("{}.{period}", context.spec.id);
    record.data_type = format!("{}_{period}", context.spec.data_type);
    Ok(record)
}

fn report_date(fields: &Map<String, Value>) -> Option<UtcDateTime> {
    DATE_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name).and_then(Value::as_str))
        .find_map(|value| UtcDateTime::parse_lenient(value).ok())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::normalize::normalize;
    use crate::{ParsedValue, QualityFlag, Symbol, UtcDateTime};

    fn run(endpoint: &str, payload: serde_json::Value) -> Vec<crate::CanonicalRecord> {
        normalize(
            endpoint,
            &payload,
            &Symbol::parse("IBM").expect("symbol"),
            UtcDateTime::parse("2024-03-08T21:00:00Z").expect("ts"),
        )
    }

    #[test]
    fn annual_and_quarterly_reports_get_distinct_endpoints() {
        let records = run(
            "income_statement",
            json!({
                "symbol": "IBM",
                "annualReports": [
                    {"fiscalDateEnding": "2023-12-31", "totalRevenue": "61860000000", "reportedCurrency": "USD"}
                ],
                "quarterlyReports": [
                    {"fiscalDateEnding": "2023-12-31", "totalRevenue": "17381000000"},
                    {"fiscalDateEnding": "2023-09-30", "totalRevenue": "14752000000"}
                ]
            }),
        );

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].endpoint, "income_statement.annual");
        assert_eq!(records[0].data_type, "income_statement_annual");
        assert_eq!(records[1].endpoint, "income_statement.quarterly");
        assert_eq!(records[0].observed_at, records[1].observed_at);
        assert_ne!(records[0].natural_key(), records[1].natural_key());
        assert_eq!(
            records[0].parsed_values["total_revenue"],
            ParsedValue::Number(61_860_000_000.0)
        );
        assert!(!records[0].parsed_values.contains_key("fiscal_date_ending"));
        assert!(records.iter().all(|r| r.quality == QualityFlag::Success));
    }

    #[test]
    fn earnings_fall_back_to_reported_date() {
        let records = run(
            "earnings",
            json!({
                "annualEarnings": [{"fiscalDateEnding": "2023-12-31", "reportedEPS": "9.61"}],
                "quarterlyEarnings": [
                    {"fiscalDateEnding": "None", "reportedDate": "2024-01-24", "reportedEPS": "3.87"}
                ]
            }),
        );
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].observed_at.format_sql(), "2024-01-24 00:00:00");
        assert_eq!(records[1].metadata["period"], json!("quarterly"));
    }

    #[test]
    fn undated_report_is_skipped() {
        let records = run(
            "balance_sheet",
            json!({"annualReports": [
                {"fiscalDateEnding": "2023-12-31", "totalAssets": "1"},
                {"totalAssets": "2"}
            ]}),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].quality, QualityFlag::Partial);
    }

    #[test]
    fn empty_lists_are_empty() {
        let records = run(
            "cash_flow",
            json!({"annualReports": [], "quarterlyReports": []}),
        );
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].quality, QualityFlag::Empty);
    }
}
