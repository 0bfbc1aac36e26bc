use std::fmt::{Display, Formatter};

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::ValidationError;

/// Second-precision UTC timestamp.
///
/// Provider payloads carry dates in several layouts (plain dates, space
/// separated datetimes, compact news stamps, RFC3339). [`UtcDateTime::parse_lenient`]
/// accepts all of them and always lands in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();
        Self(now.replace_nanosecond(0).unwrap_or(now))
    }

    /// Strict RFC3339 parse; any offset is converted to UTC.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let parsed = OffsetDateTime::parse(input.trim(), &Rfc3339).map_err(|_| {
            ValidationError::TimestampNotUtc {
                value: input.to_owned(),
            }
        })?;
        Ok(Self::from_offset_datetime(parsed))
    }

    /// Parse any date layout the provider is known to emit.
    pub fn parse_lenient(input: &str) -> Result<Self, ValidationError> {
        let value = input.trim();
        let unrecognized = || ValidationError::UnrecognizedTimestamp {
            value: input.to_owned(),
        };

        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            return Err(unrecognized());
        }

        if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
            return Ok(Self::from_offset_datetime(parsed));
        }

        let spaced = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        let t_separated = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
        let minutes = format_description!("[year]-[month]-[day] [hour]:[minute]");
        let compact = format_description!("[year][month][day]T[hour][minute][second]");
        let compact_minutes = format_description!("[year][month][day]T[hour][minute]");
        for layout in [spaced, t_separated, minutes, compact, compact_minutes] {
            if let Ok(parsed) = PrimitiveDateTime::parse(value, layout) {
                return Ok(Self(parsed.assume_utc()));
            }
        }

        if let Ok(date) = Date::parse(value, format_description!("[year]-[month]-[day]")) {
            return Ok(Self::from_date(date));
        }

        // Monthly macro series report "2024-01".
        if let Some((year, month)) = value.split_once('-') {
            let year: i32 = year.parse().map_err(|_| unrecognized())?;
            let month: u8 = month.parse().map_err(|_| unrecognized())?;
            let month = Month::try_from(month).map_err(|_| unrecognized())?;
            let date = Date::from_calendar_date(year, month, 1).map_err(|_| unrecognized())?;
            return Ok(Self::from_date(date));
        }

        // Annual series report a bare year.
        if value.len() == 4 {
            let year: i32 = value.parse().map_err(|_| unrecognized())?;
            let date =
                Date::from_calendar_date(year, Month::January, 1).map_err(|_| unrecognized())?;
            return Ok(Self::from_date(date));
        }

        Err(unrecognized())
    }

    pub fn from_offset_datetime(value: OffsetDateTime) -> Self {
        Self(value.to_offset(UtcOffset::UTC))
    }

    pub fn from_date(date: Date) -> Self {
        Self(date.midnight().assume_utc())
    }

    pub fn from_unix_seconds(seconds: i64) -> Result<Self, ValidationError> {
        OffsetDateTime::from_unix_timestamp(seconds)
            .map(Self)
            .map_err(|_| ValidationError::UnrecognizedTimestamp {
                value: seconds.to_string(),
            })
    }

    pub fn unix_seconds(self) -> i64 {
        self.0.unix_timestamp()
    }

    /// `None` when the result falls outside the representable range.
    pub fn checked_plus_seconds(self, seconds: i64) -> Option<Self> {
        self.0.checked_add(time::Duration::seconds(seconds)).map(Self)
    }

    pub fn into_inner(self) -> OffsetDateTime {
        self.0
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .expect("UtcDateTime must be RFC3339 formattable")
    }

    /// `YYYY-MM-DD HH:MM:SS`, the literal DuckDB casts to `TIMESTAMP`.
    pub fn format_sql(self) -> String {
        format!(
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.0.year(),
            u8::from(self.0.month()),
            self.0.day(),
            self.0.hour(),
            self.0.minute(),
            self.0.second()
        )
    }
}

impl Display for UtcDateTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.format_rfc3339())
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Self::parse_lenient(&value).map_err(D::Error::custom)
    }
}
