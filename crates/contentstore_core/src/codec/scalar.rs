//! Scalar codecs: strings, numbers, flags and dates.

use super::{json_type_name, AttributeCodec, CodecError, CodecResult, EntityLookup};
use crate::model::value::TypedValue;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value as JsonValue;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Plain text codec. Numbers and booleans are stringified on input.
pub struct StringCodec {
    long: bool,
}

impl StringCodec {
    pub fn plain() -> Self {
        Self { long: false }
    }

    /// Same encoding, decodes to [`TypedValue::Text`].
    pub fn long_text() -> Self {
        Self { long: true }
    }
}

impl AttributeCodec for StringCodec {
    fn serialize(&self, value: &JsonValue) -> CodecResult<String> {
        match value {
            JsonValue::String(text) => Ok(text.clone()),
            JsonValue::Number(number) => Ok(number.to_string()),
            JsonValue::Bool(flag) => Ok(if *flag { "1" } else { "0" }.to_string()),
            other => Err(CodecError::TypeMismatch {
                expected: "string",
                found: json_type_name(other),
            }),
        }
    }

    fn deserialize(
        &self,
        raw: &str,
        _lookup: &dyn EntityLookup,
    ) -> CodecResult<Option<TypedValue>> {
        let text = raw.to_string();
        Ok(Some(if self.long {
            TypedValue::Text(text)
        } else {
            TypedValue::String(text)
        }))
    }
}

/// Floating point codec; numeric strings are accepted on input.
pub struct NumberCodec;

impl NumberCodec {
    fn parse(value: &JsonValue) -> CodecResult<f64> {
        let mismatch = || CodecError::TypeMismatch {
            expected: "number",
            found: json_type_name(value),
        };
        let number = match value {
            JsonValue::Number(number) => number.as_f64().ok_or_else(mismatch)?,
            JsonValue::String(text) => text.trim().parse::<f64>().map_err(|_| mismatch())?,
            _ => return Err(mismatch()),
        };
        if number.is_finite() {
            Ok(number)
        } else {
            Err(mismatch())
        }
    }
}

impl AttributeCodec for NumberCodec {
    fn serialize(&self, value: &JsonValue) -> CodecResult<String> {
        // f64 Display is the shortest text that parses back to the same value.
        Self::parse(value).map(|number| number.to_string())
    }

    fn deserialize(
        &self,
        raw: &str,
        _lookup: &dyn EntityLookup,
    ) -> CodecResult<Option<TypedValue>> {
        raw.trim()
            .parse::<f64>()
            .map(|number| Some(TypedValue::Number(number)))
            .map_err(|_| CodecError::InvalidStoredValue {
                expected: "number",
                raw: raw.to_string(),
            })
    }
}

/// Boolean codec stored as `"0"` / `"1"`.
pub struct FlagCodec;

impl AttributeCodec for FlagCodec {
    fn serialize(&self, value: &JsonValue) -> CodecResult<String> {
        let flag = match value {
            JsonValue::Bool(flag) => Some(*flag),
            JsonValue::Number(number) => match number.as_f64() {
                Some(n) if n == 0.0 => Some(false),
                Some(n) if n == 1.0 => Some(true),
                _ => None,
            },
            JsonValue::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "0" | "false" => Some(false),
                "1" | "true" => Some(true),
                _ => None,
            },
            _ => None,
        };
        flag.map(|flag| if flag { "1" } else { "0" }.to_string())
            .ok_or(CodecError::TypeMismatch {
                expected: "boolean",
                found: json_type_name(value),
            })
    }

    fn deserialize(
        &self,
        raw: &str,
        _lookup: &dyn EntityLookup,
    ) -> CodecResult<Option<TypedValue>> {
        match raw {
            "1" => Ok(Some(TypedValue::Flag(true))),
            "0" => Ok(Some(TypedValue::Flag(false))),
            _ => Err(CodecError::InvalidStoredValue {
                expected: "flag",
                raw: raw.to_string(),
            }),
        }
    }
}

/// Calendar date or date-time codec.
///
/// Input accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, the `T`-separated form
/// and RFC 3339 (converted to UTC). Sub-second precision is dropped.
pub struct DateCodec {
    with_time: bool,
}

impl DateCodec {
    pub fn date() -> Self {
        Self { with_time: false }
    }

    pub fn datetime() -> Self {
        Self { with_time: true }
    }

    fn expected(&self) -> &'static str {
        if self.with_time {
            "datetime"
        } else {
            "date"
        }
    }
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    for format in [DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

impl AttributeCodec for DateCodec {
    fn serialize(&self, value: &JsonValue) -> CodecResult<String> {
        let mismatch = || CodecError::TypeMismatch {
            expected: self.expected(),
            found: json_type_name(value),
        };
        let JsonValue::String(text) = value else {
            return Err(mismatch());
        };
        let parsed = parse_datetime(text).ok_or_else(mismatch)?;
        Ok(if self.with_time {
            parsed.format(DATETIME_FORMAT).to_string()
        } else {
            parsed.date().format(DATE_FORMAT).to_string()
        })
    }

    fn deserialize(
        &self,
        raw: &str,
        _lookup: &dyn EntityLookup,
    ) -> CodecResult<Option<TypedValue>> {
        let invalid = || CodecError::InvalidStoredValue {
            expected: self.expected(),
            raw: raw.to_string(),
        };
        if self.with_time {
            NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT)
                .map(|value| Some(TypedValue::DateTime(value)))
                .map_err(|_| invalid())
        } else {
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(|value| Some(TypedValue::Date(value)))
                .map_err(|_| invalid())
        }
    }
}
