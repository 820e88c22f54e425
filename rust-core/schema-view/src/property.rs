use chrono::Datelike;
use serde::{Deserialize, Serialize};

/// A dotted path from the root document down to a (possibly nested) field,
/// e.g. `current_players_nested.nicknames`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// The empty path, identifying the root document itself.
    pub fn root() -> Self {
        Self(vec![])
    }

    pub fn single(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_segments(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn dotted(&self) -> String {
        self.0.join(".")
    }

    pub fn join(&self, child: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(child.into());
        Self(segments)
    }

    /// Appends `suffix` to the final segment in place, e.g. the `nicknames`
    /// path becomes `nicknames__count` — used to address a list field's
    /// precomputed sibling length field.
    pub fn with_suffix(&self, suffix: &str) -> FieldPath {
        let mut segments = self.0.clone();
        if let Some(last) = segments.last_mut() {
            last.push_str(suffix);
        } else {
            segments.push(suffix.to_string());
        }
        Self(segments)
    }

    pub fn parent(&self) -> Option<FieldPath> {
        if self.0.len() <= 1 {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dotted())
    }
}

/// Runtime value for a scalar field, used throughout the filter tree and
/// aggregation bucket decoding. Untagged so it round-trips through the
/// datastore's own loosely-typed JSON responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    /// `LongString`: a 64-bit integer too large to round-trip through a
    /// JSON number safely, carried as decimal text instead.
    LongString(String),
    Double(f64),
    Boolean(bool),
    Date(String),
    DateTime(String),
    LocalTime(String),
    Geo { latitude: f64, longitude: f64 },
    Null,
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScalarError {
    #[error("'{0}' is not a valid Date (expected ISO-8601, e.g. 2022-11-23)")]
    InvalidDate(String),
    #[error("'{0}' is not a valid DateTime (expected ISO-8601 with a 4-digit year and millisecond precision)")]
    InvalidDateTime(String),
    #[error("DateTime year {0} is outside the supported range 0001..9999")]
    DateTimeYearOutOfRange(i32),
    #[error("'{0}' is not a valid LocalTime (expected HH:MM:SS[.sss])")]
    InvalidLocalTime(String),
    #[error("'{0}' is not within the JsonSafeLong range (+/- 2^53)")]
    JsonSafeLongOverflow(i64),
    #[error("'{0}' is not a valid 64-bit integer")]
    InvalidLongString(String),
    #[error("latitude {0} is outside -90..=90")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside -180..=180")]
    LongitudeOutOfRange(f64),
    #[error("'{0}' is not a recognized IANA time zone")]
    UnknownTimeZone(String),
    #[error("'{0}' is not a valid cursor")]
    InvalidCursor(String),
}

/// `JsonSafeLong`: integers representable without precision loss in an
/// IEEE-754 double, i.e. within `+/- 2^53`.
pub const JSON_SAFE_LONG_MAX: i64 = 9_007_199_254_740_992; // 2^53
pub const JSON_SAFE_LONG_MIN: i64 = -9_007_199_254_740_992;

pub fn coerce_json_safe_long(value: i64) -> Result<i64, ScalarError> {
    if (JSON_SAFE_LONG_MIN..=JSON_SAFE_LONG_MAX).contains(&value) {
        Ok(value)
    } else {
        Err(ScalarError::JsonSafeLongOverflow(value))
    }
}

/// `LongString`: an arbitrary 64-bit integer carried as a decimal string.
pub fn coerce_long_string(value: &str) -> Result<i64, ScalarError> {
    value
        .parse::<i64>()
        .map_err(|_| ScalarError::InvalidLongString(value.to_string()))
}

/// `Date`: an ISO-8601 calendar date with no time component.
pub fn coerce_date(value: &str) -> Result<chrono::NaiveDate, ScalarError> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ScalarError::InvalidDate(value.to_string()))
}

/// `DateTime`: ISO-8601 with a 4-digit year and millisecond precision;
/// rendered in UTC on output regardless of the offset it was parsed from.
pub fn coerce_date_time(value: &str) -> Result<chrono::DateTime<chrono::Utc>, ScalarError> {
    let parsed = chrono::DateTime::parse_from_rfc3339(value)
        .map_err(|_| ScalarError::InvalidDateTime(value.to_string()))?;
    let year = parsed.year();
    if !(1..=9999).contains(&year) {
        return Err(ScalarError::DateTimeYearOutOfRange(year));
    }
    Ok(parsed.with_timezone(&chrono::Utc))
}

/// `LocalTime`: `HH:MM:SS[.sss]`, no date or offset component.
pub fn coerce_local_time(value: &str) -> Result<chrono::NaiveTime, ScalarError> {
    chrono::NaiveTime::parse_from_str(value, "%H:%M:%S%.f")
        .map_err(|_| ScalarError::InvalidLocalTime(value.to_string()))
}

/// `GeoLocation`: a validated latitude/longitude pair.
pub fn coerce_geo_location(latitude: f64, longitude: f64) -> Result<(f64, f64), ScalarError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ScalarError::LatitudeOutOfRange(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ScalarError::LongitudeOutOfRange(longitude));
    }
    Ok((latitude, longitude))
}

/// `TimeZone`: an IANA id, checked against `chrono-tz`'s compiled database —
/// the "curated allow-list" the spec calls for (its exact membership policy
/// is an Open Question; `chrono_tz::TZ_VARIANTS` is the concrete mechanism
/// this implementation decided on).
pub fn coerce_time_zone(value: &str) -> Result<chrono_tz::Tz, ScalarError> {
    value
        .parse::<chrono_tz::Tz>()
        .map_err(|_| ScalarError::UnknownTimeZone(value.to_string()))
}
