//! Idempotent sink in front of the storage port.
//!
//! The store decides what is a duplicate (it owns the persisted keys); the
//! sink maps documents, hands whole batches to the store and turns storage
//! failures into an [`IngestionResult`] instead of an error.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;
use crate::models::{GlucoseReading, IngestionResult, RawChangeDocument};

use super::mapper::map_document;
use super::observer::IngestionObserver;

/// Storage port.
///
/// Implementations must be idempotent by [`GlucoseReading::dedup_key`] and
/// commit each call atomically: either every new reading of the batch is
/// stored or none is. The returned result only fills `inserted` and
/// `skipped`.
///
/// `cancel` is checked up to the commit. A cancelled batch is rolled back
/// and reported as [`StorageError::Cancelled`]; a batch that already
/// committed is reported as stored.
#[async_trait]
pub trait GlucoseStore: Send + Sync {
    async fn insert_glucose_readings(
        &self,
        readings: Vec<GlucoseReading>,
        source_tag: &str,
        cancel: &CancellationToken,
    ) -> Result<IngestionResult, StorageError>;
}

#[derive(Clone)]
pub struct IdempotentSink {
    store: Arc<dyn GlucoseStore>,
    observer: Arc<dyn IngestionObserver>,
    source_tag: String,
}

impl IdempotentSink {
    pub fn new(
        store: Arc<dyn GlucoseStore>,
        observer: Arc<dyn IngestionObserver>,
        source_tag: impl Into<String>,
    ) -> Self {
        Self {
            store,
            observer,
            source_tag: source_tag.into(),
        }
    }

    /// Inserts one batch. Never fails: storage errors are reported in the
    /// result and the batch counts as not inserted.
    pub async fn insert(&self, readings: Vec<GlucoseReading>) -> IngestionResult {
        self.insert_until(readings, &CancellationToken::new()).await
    }

    /// Like [`insert`](Self::insert), but the store rolls the batch back if
    /// `cancel` fires before it commits.
    pub async fn insert_until(
        &self,
        readings: Vec<GlucoseReading>,
        cancel: &CancellationToken,
    ) -> IngestionResult {
        if readings.is_empty() {
            return IngestionResult::default();
        }

        match self
            .store
            .insert_glucose_readings(readings, &self.source_tag, cancel)
            .await
        {
            Ok(result) => {
                self.observer.insert_succeeded(&result);
                IngestionResult {
                    inserted: result.inserted,
                    skipped: result.skipped,
                    rejected: 0,
                    error: None,
                }
            }
            Err(StorageError::Cancelled) => {
                self.observer.insert_abandoned();
                IngestionResult {
                    error: Some(StorageError::Cancelled),
                    ..IngestionResult::default()
                }
            }
            Err(err) => {
                self.observer.insert_failed(&err);
                IngestionResult {
                    error: Some(err),
                    ..IngestionResult::default()
                }
            }
        }
    }

    /// Maps each document and inserts the valid ones as a single batch,
    /// preserving the given order. Rejected documents are counted and
    /// dropped.
    pub async fn ingest<'a, I>(&self, documents: I) -> IngestionResult
    where
        I: IntoIterator<Item = &'a RawChangeDocument>,
    {
        self.ingest_until(documents, &CancellationToken::new()).await
    }

    pub async fn ingest_until<'a, I>(
        &self,
        documents: I,
        cancel: &CancellationToken,
    ) -> IngestionResult
    where
        I: IntoIterator<Item = &'a RawChangeDocument>,
    {
        let mut readings = Vec::new();
        let mut rejected = 0;

        for document in documents {
            match map_document(document) {
                Ok(reading) => readings.push(reading),
                Err(err) => {
                    self.observer.document_rejected(document, &err);
                    rejected += 1;
                }
            }
        }

        let mut result = self.insert_until(readings, cancel).await;
        result.rejected = rejected;
        result
    }
}
