use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use time::{Date, Duration, Month};

use super::{coerce, Context};
use crate::{CanonicalRecord, ParsedValue, UtcDateTime};

const NEWS_KEY: &str = "feed";
const TRANSCRIPT_KEY: &str = "transcript";

const NEWS_FIELDS: &[&str] = &[
    "title",
    "url",
    "source",
    "overall_sentiment_score",
    "overall_sentiment_label",
];
const TICKER_FIELDS: &[&str] = &[
    "ticker_relevance_score",
    "ticker_sentiment_score",
    "ticker_sentiment_label",
];
const SEGMENT_FIELDS: &[&str] = &["speaker", "title", "sentiment"];

pub(super) fn normalize(context: &Context<'_>) -> Vec<CanonicalRecord> {
    let Some(object) = context.payload.as_object() else {
        return vec![context.empty("payload is not an object")];
    };

    if let Some(feed) = object.get(NEWS_KEY).and_then(Value::as_array) {
        let slots = publish_slots(feed);
        let items = feed
            .iter()
            .zip(slots)
            .enumerate()
            .map(|(index, (item, slot))| news_item(context, index, item, slot))
            .collect();
        return context.finish(items);
    }

    if let Some(segments) = object.get(TRANSCRIPT_KEY).and_then(Value::as_array) {
        let Some(base) = object
            .get("quarter")
            .and_then(Value::as_str)
            .and_then(quarter_end)
        else {
            return vec![context.error("transcript has no usable quarter")];
        };
        let items = segments
            .iter()
            .enumerate()
            .map(|(index, segment)| transcript_segment(context, base, index, segment))
            .collect();
        return context.finish(items);
    }

    vec![context.empty("no text list found")]
}

/// Key time for every article: its publish second, moved forward to the
/// next free second when another article already holds it. Articles are
/// placed in `(published, url)` order so the same feed always yields the
/// same keys regardless of provider ordering.
fn publish_slots(feed: &[Value]) -> Vec<Option<UtcDateTime>> {
    let published: Vec<Option<UtcDateTime>> = feed
        .iter()
        .map(|item| {
            item.get("time_published")
                .and_then(Value::as_str)
                .and_then(|value| UtcDateTime::parse_lenient(value).ok())
        })
        .collect();

    let mut order: Vec<usize> = (0..feed.len())
        .filter(|&index| published[index].is_some())
        .collect();
    order.sort_by_key(|&index| (published[index], article_identity(&feed[index])));

    let mut taken = BTreeSet::new();
    let mut slots = vec![None; feed.len()];
    for index in order {
        let mut candidate = published[index];
        while let Some(at) = candidate {
            if taken.insert(at) {
                slots[index] = Some(at);
                break;
            }
            candidate = at.checked_plus_seconds(1);
        }
    }
    slots
}

fn article_identity(item: &Value) -> Option<&str> {
    ["url", "title"]
        .iter()
        .find_map(|name| item.get(*name).and_then(Value::as_str))
}

fn news_item(
    context: &Context<'_>,
    index: usize,
    item: &Value,
    slot: Option<UtcDateTime>,
) -> Result<CanonicalRecord, String> {
    let fields = item
        .as_object()
        .ok_or_else(|| format!("article {index} is not an object"))?;

    let title = text_field(fields, "title");
    let summary = text_field(fields, "summary");
    let text = match (title, summary) {
        (Some(title), Some(summary)) => format!("{title}\n\n{summary}"),
        (Some(only), None) | (None, Some(only)) => only.to_owned(),
        (None, None) => return Err(format!("article {index} has no text")),
    };

    let observed_at = slot.ok_or_else(|| format!("article {index} has no usable publish time"))?;

    let mut values = pick(fields, NEWS_FIELDS);
    // Only the sentiment entry for the requested instrument is kept.
    if let Some(entry) = fields
        .get("ticker_sentiment")
        .and_then(Value::as_array)
        .and_then(|entries| {
            entries.iter().filter_map(Value::as_object).find(|entry| {
                entry.get("ticker").and_then(Value::as_str) == Some(context.symbol.as_str())
            })
        })
    {
        values.extend(pick(entry, TICKER_FIELDS));
    }

    Ok(context
        .record(observed_at, item.clone())
        .with_values(values)
        .with_text(text))
}

fn transcript_segment(
    context: &Context<'_>,
    base: UtcDateTime,
    index: usize,
    segment: &Value,
) -> Result<CanonicalRecord, String> {
    let fields = segment
        .as_object()
        .ok_or_else(|| format!("segment {index} is not an object"))?;
    let content =
        text_field(fields, "content").ok_or_else(|| format!("segment {index} has no content"))?;
    let text = match text_field(fields, "speaker") {
        Some(speaker) => format!("{speaker}: {content}"),
        None => content.to_owned(),
    };

    let observed_at = base
        .checked_plus_seconds(ordinal(index))
        .ok_or_else(|| format!("segment {index} is out of range"))?;

    Ok(context
        .record(observed_at, segment.clone())
        .with_values(pick(fields, SEGMENT_FIELDS))
        .with_text(text)
        .with_metadata("segment", index))
}

fn text_field<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn pick(fields: &Map<String, Value>, names: &[&str]) -> BTreeMap<String, ParsedValue> {
    names
        .iter()
        .filter_map(|name| {
            let parsed = coerce(fields.get(*name)?)?;
            Some(((*name).to_owned(), parsed))
        })
        .collect()
}

fn ordinal(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

/// Last day of a `YYYYQn` quarter, at midnight UTC.
fn quarter_end(quarter: &str) -> Option<UtcDateTime> {
    let (year, number) = quarter.trim().split_once(['Q', 'q'])?;
    let year: i32 = year.parse().ok()?;
    let next_start = match number.parse::<u8>().ok()? {
        1 => Date::from_calendar_date(year, Month::April, 1),
        2 => Date::from_calendar_date(year, Month::July, 1),
        3 => Date::from_calendar_date(year, Month::October, 1),
        4 => Date::from_calendar_date(year.checked_add(1)?, Month::January, 1),
        _ => return None,
    }
    .ok()?;
    let end = next_start.checked_sub(Duration::days(1))?;
    Some(UtcDateTime::from_date(end))
}
