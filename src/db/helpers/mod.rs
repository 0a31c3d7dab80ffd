use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::models::{SourceSensor, TrendArrow};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_trend_arrow(value: &str) -> Result<TrendArrow> {
    let arrow = TrendArrow::from_token(value);
    if arrow.as_str() == value {
        Ok(arrow)
    } else {
        Err(anyhow!("unknown trend arrow '{value}'"))
    }
}

pub fn parse_source_sensor(value: &str) -> Result<SourceSensor> {
    let sensor = SourceSensor::from_token(value);
    if sensor.as_str() == value {
        Ok(sensor)
    } else {
        Err(anyhow!("unknown source sensor '{value}'"))
    }
}

/// Wraps a conversion failure so it can be returned from a rusqlite row
/// mapper.
pub fn row_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            err.to_string(),
        )),
    )
}
