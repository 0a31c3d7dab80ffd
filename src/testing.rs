//! Fakes and helpers shared by the unit tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::ingest::GlucoseStore;
use crate::models::{GlucoseReading, IngestionResult, RawChangeDocument, SourceSensor, TrendArrow};

pub fn doc(value: Value) -> RawChangeDocument {
    value
        .as_object()
        .cloned()
        .expect("test documents are JSON objects")
}

pub fn reading(timestamp: i64, source_id: Option<&str>) -> GlucoseReading {
    GlucoseReading {
        timestamp,
        value: 120.0,
        raw: 0.0,
        noise: None,
        trend_arrow: TrendArrow::Flat,
        source_sensor: SourceSensor::Glimp,
        source_id: source_id.map(String::from),
        utc_offset_ms: 0,
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within 2s");
}

#[derive(Default)]
struct MemoryInner {
    rows: Vec<GlucoseReading>,
    keys: HashSet<String>,
    calls: usize,
    failure: Option<StorageError>,
}

/// In-memory [`GlucoseStore`] with the same dedup rules as the SQLite one.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    hold: Mutex<Option<Arc<Notify>>>,
}

impl MemoryStore {
    pub fn stored(&self) -> Vec<GlucoseReading> {
        self.inner.lock().unwrap().rows.clone()
    }

    pub fn calls(&self) -> usize {
        self.inner.lock().unwrap().calls
    }

    pub fn fail_with(&self, error: StorageError) {
        self.inner.lock().unwrap().failure = Some(error);
    }

    /// Makes every following insert wait until the returned `Notify` fires
    /// or the insert is cancelled.
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.hold.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }
}

#[async_trait]
impl GlucoseStore for MemoryStore {
    async fn insert_glucose_readings(
        &self,
        readings: Vec<GlucoseReading>,
        _source_tag: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestionResult, StorageError> {
        self.inner.lock().unwrap().calls += 1;

        let hold = self.hold.lock().unwrap().clone();
        if let Some(notify) = hold {
            tokio::select! {
                _ = notify.notified() => {}
                _ = cancel.cancelled() => {}
            }
        }
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = inner.failure.clone() {
            return Err(err);
        }

        let mut result = IngestionResult::default();
        for reading in readings {
            if inner.keys.insert(reading.dedup_key()) {
                inner.rows.push(reading);
                result.inserted += 1;
            } else {
                result.skipped += 1;
            }
        }
        Ok(result)
    }
}
