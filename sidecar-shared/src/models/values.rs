//! # Typed Property Values
//!
//! Dynamically typed values carried through failure-detail property maps and
//! similar pass-through channels. On the wire every value is one of: null,
//! bool, number (double-wide), string, struct, or list. Date/time values are
//! encoded as strings with reserved prefixes (`dt:` for wall-clock,
//! `dto:` for offset-carrying) so they survive the round trip; decoders that
//! fail to parse a prefixed string fall back to the plain string.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat};

/// Reserved prefix for round-trippable wall-clock date/time strings.
pub const DATETIME_PREFIX: &str = "dt:";

/// Reserved prefix for date/time strings carrying a UTC offset.
pub const DATETIME_OFFSET_PREFIX: &str = "dto:";

/// Wall-clock format with microsecond precision.
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// A dynamically typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    Struct(BTreeMap<String, PropertyValue>),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Encode a date-bearing variant into its tagged string form.
    ///
    /// Non-date variants return `None`; they have a direct wire shape.
    pub fn to_tagged_string(&self) -> Option<String> {
        match self {
            PropertyValue::DateTime(dt) => {
                Some(format!("{DATETIME_PREFIX}{}", dt.format(DATETIME_FORMAT)))
            }
            PropertyValue::DateTimeOffset(dto) => Some(format!(
                "{DATETIME_OFFSET_PREFIX}{}",
                dto.to_rfc3339_opts(SecondsFormat::Micros, true)
            )),
            _ => None,
        }
    }

    /// Decode a wire string, promoting tagged date strings back to typed
    /// values. Parse failure keeps the full original string.
    pub fn from_wire_string(s: &str) -> PropertyValue {
        if let Some(rest) = s.strip_prefix(DATETIME_PREFIX) {
            if let Ok(dt) = NaiveDateTime::parse_from_str(rest, "%Y-%m-%dT%H:%M:%S%.f") {
                return PropertyValue::DateTime(dt);
            }
        } else if let Some(rest) = s.strip_prefix(DATETIME_OFFSET_PREFIX) {
            if let Ok(dto) = DateTime::parse_from_rfc3339(rest) {
                return PropertyValue::DateTimeOffset(dto);
            }
        }
        PropertyValue::String(s.to_owned())
    }
}

/// Coercion from arbitrary JSON. Numbers widen to `f64`; anything without a
/// typed-value shape ends up as its string form.
impl From<serde_json::Value> for PropertyValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PropertyValue::Null,
            serde_json::Value::Bool(b) => PropertyValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => PropertyValue::Number(f),
                None => PropertyValue::String(n.to_string()),
            },
            serde_json::Value::String(s) => PropertyValue::from_wire_string(&s),
            serde_json::Value::Array(items) => {
                PropertyValue::List(items.into_iter().map(PropertyValue::from).collect())
            }
            serde_json::Value::Object(fields) => PropertyValue::Struct(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, PropertyValue::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn test_datetime_round_trip_preserves_microseconds() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_micro_opt(12, 34, 56, 789_012)
            .unwrap();
        let tagged = PropertyValue::DateTime(dt).to_tagged_string().unwrap();
        assert!(tagged.starts_with(DATETIME_PREFIX));
        assert_eq!(
            PropertyValue::from_wire_string(&tagged),
            PropertyValue::DateTime(dt)
        );
    }

    #[test]
    fn test_datetime_offset_round_trip() {
        let dto = Utc
            .with_ymd_and_hms(2024, 3, 7, 12, 34, 56)
            .unwrap()
            .fixed_offset();
        let tagged = PropertyValue::DateTimeOffset(dto).to_tagged_string().unwrap();
        assert!(tagged.starts_with(DATETIME_OFFSET_PREFIX));
        assert_eq!(
            PropertyValue::from_wire_string(&tagged),
            PropertyValue::DateTimeOffset(dto)
        );
    }

    #[test]
    fn test_unparseable_prefixed_string_falls_back_to_string() {
        let decoded = PropertyValue::from_wire_string("dt:not-a-date");
        assert_eq!(decoded, PropertyValue::String("dt:not-a-date".to_owned()));

        let decoded = PropertyValue::from_wire_string("dto:also-not-a-date");
        assert_eq!(decoded, PropertyValue::String("dto:also-not-a-date".to_owned()));
    }

    #[test]
    fn test_plain_string_passes_through() {
        let decoded = PropertyValue::from_wire_string("hello");
        assert_eq!(decoded, PropertyValue::String("hello".to_owned()));
    }

    #[test]
    fn test_json_coercion_nested() {
        let json = serde_json::json!({
            "count": 3,
            "flags": [true, false],
            "detail": { "note": null }
        });
        let value = PropertyValue::from(json);
        let PropertyValue::Struct(fields) = value else {
            panic!("expected struct");
        };
        assert_eq!(fields["count"], PropertyValue::Number(3.0));
        assert_eq!(
            fields["flags"],
            PropertyValue::List(vec![PropertyValue::Bool(true), PropertyValue::Bool(false)])
        );
        let PropertyValue::Struct(detail) = &fields["detail"] else {
            panic!("expected nested struct");
        };
        assert_eq!(detail["note"], PropertyValue::Null);
    }

    #[test]
    fn test_non_date_variants_have_no_tagged_form() {
        assert!(PropertyValue::Bool(true).to_tagged_string().is_none());
        assert!(PropertyValue::Number(1.5).to_tagged_string().is_none());
        assert!(PropertyValue::Null.to_tagged_string().is_none());
    }
}
