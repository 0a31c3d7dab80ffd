//! Glucose change-feed ingestion.
//!
//! ```text
//! LifecycleController ─► ChangeFeedSubscriber ─► map_document ─► IdempotentSink ─► GlucoseStore
//!   (on_enable/             (one live query,                      (batch per          (SQLite
//!    on_disable)             ordered notifications)                notification)       Database)
//! ```
//!
//! * **`feed`**: the `FeedClient` port, the in-process `ChannelFeed`, and the
//!   subscriber state machine.
//! * **`ingest`**: document mapping, the idempotent sink, observability hooks.
//! * **`lifecycle`**: enable/disable handling and the background work unit.
//! * **`db`**: SQLite storage with de-duplication by source id.
//! * **`settings`**: persisted source settings and the feature flag.

pub mod db;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod settings;
pub mod utils;

#[cfg(test)]
mod testing;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};

pub use db::Database;
pub use error::{FeedError, MappingError, StorageError};
pub use feed::{ChangeFeedSubscriber, ChannelFeed, ExecutionMode, FeedClient};
pub use ingest::{map_document, GlucoseStore, IdempotentSink, LogObserver};
pub use lifecycle::{IngestionWorker, LifecycleController, WorkOutcome};
pub use models::{GlucoseReading, IngestionResult, SourceSensor, TrendArrow};
pub use settings::{FeatureFlag, SettingsStore, SourceSettings};

/// Everything a host needs to drive one glucose source.
pub struct GlucoseSource {
    pub controller: LifecycleController,
    pub settings: Arc<SettingsStore>,
    pub db: Database,
}

/// Opens the database and settings under `data_dir` and wires a controller
/// around `feed`.
pub fn setup(data_dir: &Path, feed: Arc<dyn FeedClient>) -> Result<GlucoseSource> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let db = Database::new(data_dir.join("glucose.sqlite3"))?;
    let settings = Arc::new(SettingsStore::new(data_dir.join("settings.json"))?);
    let source_settings = settings.source();

    log::info!(
        "glucose source configured: collection='{}' mode={:?} enabled={}",
        source_settings.collection,
        source_settings.execution_mode,
        source_settings.enabled
    );

    let controller = LifecycleController::new(
        &source_settings,
        settings.clone(),
        feed,
        Arc::new(db.clone()),
        Arc::new(LogObserver),
    );

    Ok(GlucoseSource {
        controller,
        settings,
        db,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::models::{ChangeNotification, DocumentChange};
    use crate::testing::{doc, now_ms, wait_until};

    #[tokio::test]
    async fn setup_wires_settings_feed_and_database() {
        utils::init_logging();
        let dir = tempfile::tempdir().unwrap();
        let feed = ChannelFeed::new();

        let source = setup(dir.path(), Arc::new(feed.clone())).unwrap();
        assert!(!source.controller.on_enable().await.unwrap());

        source.settings.set_enabled(true).unwrap();
        assert!(source.controller.on_enable().await.unwrap());

        feed.publish(
            "entries",
            ChangeNotification::new(vec![DocumentChange::added(doc(json!({
                "date": now_ms().to_string(),
                "sgv": "120",
                "direction": "Flat",
                "device": "glimp",
            })))]),
        );
        wait_until(|| source.controller.subscriber().status().stats.inserted == 1).await;

        source.controller.on_disable().await.unwrap();
        let rows = source.db.get_glucose_readings_since(0).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source_tag, "cloud-entries");
        assert_eq!(rows[0].reading.trend_arrow, TrendArrow::Flat);
        assert_eq!(rows[0].reading.source_sensor, SourceSensor::Glimp);
    }
}
