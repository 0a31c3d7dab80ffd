use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::db::{
    helpers::{parse_datetime, parse_source_sensor, parse_trend_arrow, row_error},
    Database,
};
use crate::error::StorageError;
use crate::ingest::GlucoseStore;
use crate::models::{GlucoseReading, IngestionResult};

/// A reading as persisted, with its storage metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredGlucoseReading {
    pub id: i64,
    pub dedup_key: String,
    pub source_tag: String,
    pub created_at: DateTime<Utc>,
    pub reading: GlucoseReading,
}

const SELECT_COLUMNS: &str = "id, dedup_key, source_tag, created_at, timestamp, value, raw, noise,
     trend_arrow, source_sensor, source_id, utc_offset_ms";

fn stored_from_row(row: &Row<'_>) -> rusqlite::Result<StoredGlucoseReading> {
    let created_at: String = row.get(3)?;
    let trend_arrow: String = row.get(8)?;
    let source_sensor: String = row.get(9)?;

    Ok(StoredGlucoseReading {
        id: row.get(0)?,
        dedup_key: row.get(1)?,
        source_tag: row.get(2)?,
        created_at: parse_datetime(&created_at, "created_at").map_err(row_error)?,
        reading: GlucoseReading {
            timestamp: row.get(4)?,
            value: row.get(5)?,
            raw: row.get(6)?,
            noise: row.get(7)?,
            trend_arrow: parse_trend_arrow(&trend_arrow).map_err(row_error)?,
            source_sensor: parse_source_sensor(&source_sensor).map_err(row_error)?,
            source_id: row.get(10)?,
            utc_offset_ms: row.get(11)?,
        },
    })
}

impl Database {
    /// Inserts a batch in one transaction. Rows whose dedup key is already
    /// stored (or repeated earlier in the batch) are skipped; any failure
    /// rolls the whole batch back.
    pub async fn insert_glucose_batch(
        &self,
        readings: &[GlucoseReading],
        source_tag: &str,
    ) -> Result<IngestionResult> {
        self.insert_glucose_batch_until(readings, source_tag, &CancellationToken::new())
            .await
    }

    /// Same as [`insert_glucose_batch`](Self::insert_glucose_batch), but
    /// `cancel` is checked on the DB thread before every row and right before
    /// the commit. A cancelled batch is rolled back with
    /// [`StorageError::Cancelled`].
    pub async fn insert_glucose_batch_until(
        &self,
        readings: &[GlucoseReading],
        source_tag: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestionResult> {
        let records = readings.to_vec();
        let source_tag = source_tag.to_string();
        let cancel = cancel.clone();
        self.execute(move |conn| {
            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled.into());
            }

            let tx = conn
                .transaction()
                .context("failed to open glucose insert transaction")?;
            let created_at = Utc::now().to_rfc3339();
            let mut result = IngestionResult::default();

            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO glucose_readings (
                        dedup_key,
                        source_id,
                        timestamp,
                        value,
                        raw,
                        noise,
                        trend_arrow,
                        source_sensor,
                        utc_offset_ms,
                        source_tag,
                        created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(dedup_key) DO NOTHING",
                )?;

                for record in &records {
                    if cancel.is_cancelled() {
                        return Err(StorageError::Cancelled.into());
                    }

                    let changed = stmt
                        .execute(params![
                            record.dedup_key(),
                            record.source_id,
                            record.timestamp,
                            record.value,
                            record.raw,
                            record.noise,
                            record.trend_arrow.as_str(),
                            record.source_sensor.as_str(),
                            record.utc_offset_ms,
                            source_tag,
                            created_at,
                        ])
                        .with_context(|| {
                            format!("failed to insert glucose reading {}", record.dedup_key())
                        })?;

                    if changed == 0 {
                        result.skipped += 1;
                    } else {
                        result.inserted += 1;
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(StorageError::Cancelled.into());
            }
            tx.commit().context("failed to commit glucose readings")?;
            Ok(result)
        })
        .await
    }

    pub async fn get_glucose_readings_since(
        &self,
        since_ms: i64,
    ) -> Result<Vec<StoredGlucoseReading>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM glucose_readings
                 WHERE timestamp > ?1
                 ORDER BY timestamp ASC, id ASC"
            ))?;

            let rows = stmt.query_map(params![since_ms], stored_from_row)?;
            let mut readings = Vec::new();
            for row in rows {
                readings.push(row?);
            }
            Ok(readings)
        })
        .await
    }

    pub async fn count_glucose_readings(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM glucose_readings", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
    }
}

#[async_trait]
impl GlucoseStore for Database {
    async fn insert_glucose_readings(
        &self,
        readings: Vec<GlucoseReading>,
        source_tag: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestionResult, StorageError> {
        self.insert_glucose_batch_until(&readings, source_tag, cancel)
            .await
            .map_err(StorageError::from_anyhow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceSensor, TrendArrow};
    use crate::testing::reading;

    #[tokio::test]
    async fn second_insert_of_same_source_id_is_skipped() {
        let db = Database::open_in_memory().unwrap();
        let batch = vec![reading(1_700_000_000_000, Some("abc"))];

        let first = db.insert_glucose_batch(&batch, "test").await.unwrap();
        let second = db.insert_glucose_batch(&batch, "test").await.unwrap();

        assert_eq!((first.inserted, first.skipped), (1, 0));
        assert_eq!((second.inserted, second.skipped), (0, 1));
        assert_eq!(db.count_glucose_readings().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicates_inside_one_batch_are_skipped() {
        let db = Database::open_in_memory().unwrap();
        let batch = vec![
            reading(1_000, None),
            reading(1_000, None),
            reading(1_000, Some("x")),
        ];

        let result = db.insert_glucose_batch(&batch, "test").await.unwrap();

        assert_eq!((result.inserted, result.skipped), (2, 1));
    }

    #[tokio::test]
    async fn failing_row_rolls_back_whole_batch() {
        let db = Database::open_in_memory().unwrap();
        let mut bad = reading(2_000, Some("bad"));
        bad.value = -1.0;
        let batch = vec![reading(1_000, Some("good")), bad];

        let err = db
            .insert_glucose_readings(batch, "test", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Backend(_)));
        assert_eq!(db.count_glucose_readings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancelled_batch_is_rolled_back() {
        let db = Database::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = db
            .insert_glucose_readings(vec![reading(1_000, Some("a"))], "test", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, StorageError::Cancelled);
        assert_eq!(db.count_glucose_readings().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn readings_round_trip_with_metadata() {
        let db = Database::open_in_memory().unwrap();
        let mut stored = reading(5_000, Some("r1"));
        stored.trend_arrow = TrendArrow::FortyFiveDown;
        stored.source_sensor = SourceSensor::Medtronic600;
        stored.noise = Some(2.0);
        stored.utc_offset_ms = 3_600_000;

        db.insert_glucose_batch(&[reading(1_000, Some("old")), stored.clone()], "cloud")
            .await
            .unwrap();

        let rows = db.get_glucose_readings_since(1_000).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reading, stored);
        assert_eq!(rows[0].source_tag, "cloud");
        assert_eq!(rows[0].dedup_key, "id:r1");
    }

    #[tokio::test]
    async fn file_database_keeps_readings_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("glucose.sqlite3");

        {
            let db = Database::new(path.clone()).unwrap();
            db.insert_glucose_batch(&[reading(1_000, Some("a"))], "test")
                .await
                .unwrap();
        }

        let db = Database::new(path.clone()).unwrap();
        assert_eq!(db.path(), path.as_path());
        let again = db
            .insert_glucose_batch(&[reading(1_000, Some("a"))], "test")
            .await
            .unwrap();
        assert_eq!(again.skipped, 1);
        assert_eq!(db.count_glucose_readings().await.unwrap(), 1);
    }
}
