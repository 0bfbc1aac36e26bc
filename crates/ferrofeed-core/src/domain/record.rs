use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Symbol, UtcDateTime};

/// Outcome quality attached to every canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Success,
    Partial,
    Empty,
    Error,
}

impl QualityFlag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }
}

impl Display for QualityFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flattened field value extracted from a provider payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParsedValue {
    Number(f64),
    Text(String),
    Null,
}

impl ParsedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// Normalized, storage-ready observation.
///
/// `(symbol, endpoint, observed_at)` is the natural key; the store ignores a
/// second write of the same triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub symbol: Symbol,
    pub endpoint: String,
    pub observed_at: UtcDateTime,
    pub raw_payload: Value,
    pub parsed_values: BTreeMap<String, ParsedValue>,
    pub quality: QualityFlag,
    pub data_type: String,
    pub text_extract: Option<String>,
    pub metadata: Map<String, Value>,
}

impl CanonicalRecord {
    pub fn new(
        symbol: Symbol,
        endpoint: impl Into<String>,
        observed_at: UtcDateTime,
        data_type: impl Into<String>,
        raw_payload: Value,
    ) -> Self {
        Self {
            symbol,
            endpoint: endpoint.into(),
            observed_at,
            raw_payload,
            parsed_values: BTreeMap::new(),
            quality: QualityFlag::Success,
            data_type: data_type.into(),
            text_extract: None,
            metadata: Map::new(),
        }
    }

    pub fn with_values(mut self, values: BTreeMap<String, ParsedValue>) -> Self {
        self.parsed_values = values;
        self
    }

    pub fn with_quality(mut self, quality: QualityFlag) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.trim().is_empty() {
            self.text_extract = Some(text);
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Stable identifier derived from the natural key.
    pub fn natural_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.symbol,
            self.endpoint,
            self.observed_at.format_sql()
        )
    }
}
