// Value coercion for `{"value": ...}` response bodies.

use serde_json::Value;

use crate::error::{DecodeError, ItemError};
use crate::template::ParameterTemplate;

/// The raw `value` field of a response body.
pub fn extract_value(body: &[u8]) -> Result<Value, DecodeError> {
    let mut json: Value =
        serde_json::from_slice(body).map_err(|e| DecodeError::Json(e.to_string()))?;

    match json.get_mut("value").map(Value::take) {
        None | Some(Value::Null) => Err(DecodeError::MissingValue),
        Some(v) => Ok(v),
    }
}

/// Pull the integer out of a GET response body.
///
/// Numbers, integral floats and numeric strings are accepted, since the card
/// reports some integer parameters as strings.
pub fn decode_value(body: &[u8]) -> Result<i64, DecodeError> {
    match extract_value(body)? {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(i);
            }
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                _ => Err(DecodeError::NotInteger(n.to_string())),
            }
        }
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| DecodeError::NotInteger(format!("{:?}", s))),
        Value::Bool(b) => Ok(i64::from(b)),
        other => Err(DecodeError::NotInteger(other.to_string())),
    }
}

/// Decode and check against the template's domain.
///
/// An out-of-domain value comes back as `ItemError::Domain` with the value
/// attached, never clamped.
pub fn coerce(template: &ParameterTemplate, body: &[u8]) -> Result<i64, ItemError> {
    let value = decode_value(body)?;
    template.domain.check(value)?;
    Ok(value)
}

/// Textual form used in SET requests. Must stay the inverse of `decode_value`.
pub fn format_value(value: i64) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::FALSE_TRUE;

    const THRESHOLD: ParameterTemplate = ParameterTemplate::numeric("CPU Usage Threshold", "343@i", 0, 100, "%");
    const FLAG: ParameterTemplate = ParameterTemplate::selector("NTP Error", "850.18@i", FALSE_TRUE, "System Notify");

    #[test]
    fn decodes_numbers_and_strings() {
        assert_eq!(decode_value(br#"{"value": 42}"#).unwrap(), 42);
        assert_eq!(decode_value(br#"{"value": "42"}"#).unwrap(), 42);
        assert_eq!(decode_value(br#"{"value": -7}"#).unwrap(), -7);
        assert_eq!(decode_value(br#"{"value": 3.0}"#).unwrap(), 3);
        assert_eq!(decode_value(br#"{"value": true}"#).unwrap(), 1);
    }

    #[test]
    fn decode_failures() {
        assert!(matches!(decode_value(b"not json"), Err(DecodeError::Json(_))));
        assert_eq!(decode_value(br#"{"other": 1}"#), Err(DecodeError::MissingValue));
        assert_eq!(decode_value(br#"{"value": null}"#), Err(DecodeError::MissingValue));
        assert!(matches!(decode_value(br#"{"value": "abc"}"#), Err(DecodeError::NotInteger(_))));
        assert!(matches!(decode_value(br#"{"value": 2.5}"#), Err(DecodeError::NotInteger(_))));
        assert!(matches!(decode_value(br#"{"value": [1]}"#), Err(DecodeError::NotInteger(_))));
    }

    #[test]
    fn domain_errors_keep_the_value() {
        match coerce(&FLAG, br#"{"value": 2}"#) {
            Err(ItemError::Domain(e)) => assert_eq!(e.value, 2),
            other => panic!("expected domain error, got {:?}", other),
        }
        match coerce(&THRESHOLD, br#"{"value": 150}"#) {
            Err(ItemError::Domain(e)) => assert_eq!(e.value, 150),
            other => panic!("expected domain error, got {:?}", other),
        }
        assert_eq!(coerce(&FLAG, br#"{"value": 0}"#).unwrap(), 0);
    }

    #[test]
    fn formatting_round_trips() {
        for v in [0, 1, 42, -60, 600] {
            let body = format!(r#"{{"value": "{}"}}"#, format_value(v));
            assert_eq!(decode_value(body.as_bytes()).unwrap(), v);
        }
    }
}
