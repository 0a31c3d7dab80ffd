//! Document mapper: untyped feed document to [`GlucoseReading`].
//!
//! Pure and deterministic. Numbers are accepted either as JSON numbers or as
//! numeric strings, since uploaders disagree on which one to send.

use serde_json::Value;

use crate::error::MappingError;
use crate::models::{GlucoseReading, RawChangeDocument, SourceSensor, TrendArrow};

const FIELD_DATE: &str = "date";
const FIELD_SGV: &str = "sgv";
const FIELD_DIRECTION: &str = "direction";
const FIELD_DEVICE: &str = "device";
const FIELD_IDENTIFIER: &str = "identifier";
const FIELD_DOC_ID: &str = "_id";
const FIELD_UTC_OFFSET: &str = "utcOffset";
const FIELD_UNFILTERED: &str = "unfiltered";
const FIELD_NOISE: &str = "noise";

const MS_PER_MINUTE: i64 = 60_000;

pub fn map_document(doc: &RawChangeDocument) -> Result<GlucoseReading, MappingError> {
    let timestamp = required_i64(doc, FIELD_DATE)?;
    if timestamp <= 0 {
        return Err(MappingError::NonPositive(FIELD_DATE));
    }

    let value = required_f64(doc, FIELD_SGV)?;
    if value <= 0.0 {
        return Err(MappingError::NonPositive(FIELD_SGV));
    }

    let trend_arrow = text(doc, FIELD_DIRECTION)
        .map(TrendArrow::from_token)
        .unwrap_or(TrendArrow::Unknown);
    let source_sensor = text(doc, FIELD_DEVICE)
        .map(SourceSensor::from_token)
        .unwrap_or(SourceSensor::Unknown);

    let source_id = identifier(doc, FIELD_IDENTIFIER).or_else(|| identifier(doc, FIELD_DOC_ID));

    let utc_offset_minutes = doc.get(FIELD_UTC_OFFSET).and_then(as_i64).unwrap_or(0);

    let raw = doc.get(FIELD_UNFILTERED).and_then(as_f64).unwrap_or(0.0);
    let noise = doc.get(FIELD_NOISE).and_then(as_f64);

    Ok(GlucoseReading {
        timestamp,
        value,
        raw,
        noise,
        trend_arrow,
        source_sensor,
        source_id,
        utc_offset_ms: utc_offset_minutes.saturating_mul(MS_PER_MINUTE),
    })
}

fn present<'a>(doc: &'a RawChangeDocument, field: &'static str) -> Result<&'a Value, MappingError> {
    match doc.get(field) {
        None | Some(Value::Null) => Err(MappingError::MissingField(field)),
        Some(value) => Ok(value),
    }
}

fn required_i64(doc: &RawChangeDocument, field: &'static str) -> Result<i64, MappingError> {
    let value = present(doc, field)?;
    as_i64(value).ok_or_else(|| invalid(field, value))
}

fn required_f64(doc: &RawChangeDocument, field: &'static str) -> Result<f64, MappingError> {
    let value = present(doc, field)?;
    as_f64(value).ok_or_else(|| invalid(field, value))
}

fn invalid(field: &'static str, value: &Value) -> MappingError {
    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    MappingError::InvalidNumber {
        field,
        value: rendered,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn text<'a>(doc: &'a RawChangeDocument, field: &str) -> Option<&'a str> {
    doc.get(field).and_then(Value::as_str)
}

fn identifier(doc: &RawChangeDocument, field: &str) -> Option<String> {
    match doc.get(field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> RawChangeDocument {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn maps_reference_document() {
        let reading = map_document(&doc(json!({
            "date": "1700000000000",
            "sgv": "120",
            "direction": "Flat",
            "device": "glimp"
        })))
        .unwrap();

        assert_eq!(reading.timestamp, 1_700_000_000_000);
        assert_eq!(reading.value, 120.0);
        assert_eq!(reading.trend_arrow, TrendArrow::Flat);
        assert_eq!(reading.source_sensor, SourceSensor::Glimp);
        assert_eq!(reading.raw, 0.0);
        assert_eq!(reading.noise, None);
        assert_eq!(reading.source_id, None);
        assert_eq!(reading.utc_offset_ms, 0);
    }

    #[test]
    fn missing_date_is_rejected() {
        let err = map_document(&doc(json!({"sgv": "120"}))).unwrap_err();
        assert_eq!(err, MappingError::MissingField("date"));
    }

    #[test]
    fn missing_or_null_sgv_is_rejected() {
        let err = map_document(&doc(json!({"date": 1_700_000_000_000_i64}))).unwrap_err();
        assert_eq!(err, MappingError::MissingField("sgv"));

        let err = map_document(&doc(json!({"date": 1_700_000_000_000_i64, "sgv": null})))
            .unwrap_err();
        assert_eq!(err, MappingError::MissingField("sgv"));
    }

    #[test]
    fn unparseable_numbers_are_invalid() {
        let err = map_document(&doc(json!({"date": "yesterday", "sgv": "120"}))).unwrap_err();
        assert_eq!(
            err,
            MappingError::InvalidNumber {
                field: "date",
                value: "yesterday".into()
            }
        );

        let err = map_document(&doc(json!({"date": 1, "sgv": {"mg": 120}}))).unwrap_err();
        assert!(matches!(err, MappingError::InvalidNumber { field: "sgv", .. }));
    }

    #[test]
    fn non_positive_values_are_rejected() {
        let err = map_document(&doc(json!({"date": 0, "sgv": 120}))).unwrap_err();
        assert_eq!(err, MappingError::NonPositive("date"));

        let err = map_document(&doc(json!({"date": 1, "sgv": -4}))).unwrap_err();
        assert_eq!(err, MappingError::NonPositive("sgv"));
    }

    #[test]
    fn unknown_direction_and_device_fall_back() {
        let reading = map_document(&doc(json!({
            "date": 1_700_000_000_000_i64,
            "sgv": 98,
            "direction": "SIDEWAYS",
            "device": 42
        })))
        .unwrap();

        assert_eq!(reading.trend_arrow, TrendArrow::Unknown);
        assert_eq!(reading.source_sensor, SourceSensor::Unknown);
    }

    #[test]
    fn optional_fields_are_read_and_defaulted() {
        let reading = map_document(&doc(json!({
            "date": 1_700_000_000_000_i64,
            "sgv": "101.5",
            "identifier": "abc-123",
            "utcOffset": "-300",
            "unfiltered": 154000,
            "noise": 1,
            "someFutureField": true
        })))
        .unwrap();

        assert_eq!(reading.value, 101.5);
        assert_eq!(reading.source_id.as_deref(), Some("abc-123"));
        assert_eq!(reading.utc_offset_ms, -300 * 60_000);
        assert_eq!(reading.raw, 154000.0);
        assert_eq!(reading.noise, Some(1.0));
    }

    #[test]
    fn unparsable_utc_offset_defaults_to_zero() {
        let reading = map_document(&doc(json!({
            "date": 1_700_000_000_000_i64,
            "sgv": 100,
            "utcOffset": "east"
        })))
        .unwrap();
        assert_eq!(reading.utc_offset_ms, 0);
    }

    #[test]
    fn doc_id_is_used_when_identifier_missing() {
        let reading = map_document(&doc(json!({
            "date": 1_700_000_000_000_i64,
            "sgv": 100,
            "identifier": "  ",
            "_id": "65f0c0ffee"
        })))
        .unwrap();
        assert_eq!(reading.source_id.as_deref(), Some("65f0c0ffee"));
    }

    #[test]
    fn integral_float_dates_are_accepted() {
        let reading = map_document(&doc(json!({"date": 1.7e12, "sgv": 100}))).unwrap();
        assert_eq!(reading.timestamp, 1_700_000_000_000);

        let err = map_document(&doc(json!({"date": "1.5", "sgv": 100}))).unwrap_err();
        assert!(matches!(err, MappingError::InvalidNumber { field: "date", .. }));
    }
}
