mod glucose_readings;

pub use glucose_readings::StoredGlucoseReading;
