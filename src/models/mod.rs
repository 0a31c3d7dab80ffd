pub mod change;
pub mod glucose_reading;
pub mod ingestion;

pub use change::{ChangeKind, ChangeNotification, DocumentChange, RawChangeDocument};
pub use glucose_reading::{GlucoseReading, SourceSensor, TrendArrow};
pub use ingestion::{IngestionResult, IngestionStats};
