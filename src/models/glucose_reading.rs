//! Glucose reading domain model.
//!
//! One timestamped blood-glucose measurement, normalised from whatever shape
//! the remote feed delivered. Persisted by the storage port and never
//! partially constructed: `timestamp` and `value` are always present.

use serde::{Deserialize, Serialize};

/// Serialized with the same tokens as [`TrendArrow::as_str`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TrendArrow {
    TripleUp,
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
    TripleDown,
    Unknown,
}

impl TrendArrow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendArrow::TripleUp => "TripleUp",
            TrendArrow::DoubleUp => "DoubleUp",
            TrendArrow::SingleUp => "SingleUp",
            TrendArrow::FortyFiveUp => "FortyFiveUp",
            TrendArrow::Flat => "Flat",
            TrendArrow::FortyFiveDown => "FortyFiveDown",
            TrendArrow::SingleDown => "SingleDown",
            TrendArrow::DoubleDown => "DoubleDown",
            TrendArrow::TripleDown => "TripleDown",
            TrendArrow::Unknown => "Unknown",
        }
    }

    /// Total parse: any token that is not a known direction becomes
    /// [`TrendArrow::Unknown`].
    pub fn from_token(token: &str) -> Self {
        const ALL: [TrendArrow; 9] = [
            TrendArrow::TripleUp,
            TrendArrow::DoubleUp,
            TrendArrow::SingleUp,
            TrendArrow::FortyFiveUp,
            TrendArrow::Flat,
            TrendArrow::FortyFiveDown,
            TrendArrow::SingleDown,
            TrendArrow::DoubleDown,
            TrendArrow::TripleDown,
        ];
        let token = token.trim();
        ALL.into_iter()
            .find(|arrow| arrow.as_str().eq_ignore_ascii_case(token))
            .unwrap_or(TrendArrow::Unknown)
    }
}

/// Originating sensor or integration that produced a reading. Serialized
/// with the same tokens as [`SourceSensor::as_str`], which is also the
/// stored form.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SourceSensor {
    #[serde(rename = "G5")]
    DexcomG5,
    #[serde(rename = "G6")]
    DexcomG6,
    #[serde(rename = "G7")]
    DexcomG7,
    #[serde(rename = "Dexcom Native")]
    DexcomNative,
    Libre1,
    Libre2,
    Libre3,
    Glimp,
    Eversense,
    #[serde(rename = "MM600Series")]
    Medtronic600,
    #[serde(rename = "GlucoRx Aidex")]
    Aidex,
    Ottai,
    Syai,
    Random,
    Unknown,
}

impl SourceSensor {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSensor::DexcomG5 => "G5",
            SourceSensor::DexcomG6 => "G6",
            SourceSensor::DexcomG7 => "G7",
            SourceSensor::DexcomNative => "Dexcom Native",
            SourceSensor::Libre1 => "Libre1",
            SourceSensor::Libre2 => "Libre2",
            SourceSensor::Libre3 => "Libre3",
            SourceSensor::Glimp => "Glimp",
            SourceSensor::Eversense => "Eversense",
            SourceSensor::Medtronic600 => "MM600Series",
            SourceSensor::Aidex => "GlucoRx Aidex",
            SourceSensor::Ottai => "Ottai",
            SourceSensor::Syai => "Syai",
            SourceSensor::Random => "Random",
            SourceSensor::Unknown => "Unknown",
        }
    }

    /// Total parse with an unknown fallback. Matching is case-insensitive and
    /// accepts the common device strings uploaders put in `device`.
    pub fn from_token(token: &str) -> Self {
        let normalized = token.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "g5" | "g5 native" | "dexcom g5" | "xdrip-dexcomg5" => SourceSensor::DexcomG5,
            "g6" | "g6 native" | "dexcom g6" | "xdrip-dexcomg6" => SourceSensor::DexcomG6,
            "g7" | "g7 native" | "dexcom g7" | "xdrip-dexcomg7" => SourceSensor::DexcomG7,
            "dexcom native" | "dexcom" => SourceSensor::DexcomNative,
            "libre1" | "libre 1" | "xdrip-libremanual" => SourceSensor::Libre1,
            "libre2" | "libre 2" | "libre2 native" => SourceSensor::Libre2,
            "libre3" | "libre 3" => SourceSensor::Libre3,
            "glimp" => SourceSensor::Glimp,
            "eversense" => SourceSensor::Eversense,
            "mm600series" | "medtronic 600" => SourceSensor::Medtronic600,
            "glucorx aidex" | "aidex" => SourceSensor::Aidex,
            "ottai" => SourceSensor::Ottai,
            "syai" | "syai tag" => SourceSensor::Syai,
            "random" => SourceSensor::Random,
            _ => SourceSensor::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlucoseReading {
    /// Epoch milliseconds, always > 0.
    pub timestamp: i64,
    /// Glucose concentration, always > 0.
    pub value: f64,
    pub raw: f64,
    pub noise: Option<f64>,
    pub trend_arrow: TrendArrow,
    pub source_sensor: SourceSensor,
    /// Remote identifier; primary de-duplication key when present.
    pub source_id: Option<String>,
    pub utc_offset_ms: i64,
}

impl GlucoseReading {
    /// Key under which storage de-duplicates this reading: the remote
    /// identifier when known, otherwise the timestamp and sensor pair.
    pub fn dedup_key(&self) -> String {
        match self.source_id.as_deref() {
            Some(id) => format!("id:{id}"),
            None => format!("ts:{}:{}", self.timestamp, self.source_sensor.as_str()),
        }
    }
}
