//! Observability hooks for the ingestion pipeline.
//!
//! The default [`LogObserver`] writes everything through the `log` facade;
//! hosts that keep their own event journal can supply another implementation.

use crate::error::{FeedError, MappingError, StorageError};
use crate::models::{IngestionResult, RawChangeDocument};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub trait IngestionObserver: Send + Sync {
    fn listener_started(&self, subscription_id: &str, collection: &str, lower_bound_ms: i64);
    fn listener_stopped(&self, subscription_id: &str);
    fn document_received(&self, subscription_id: &str, document: &RawChangeDocument);
    fn document_rejected(&self, document: &RawChangeDocument, error: &MappingError);
    fn insert_succeeded(&self, result: &IngestionResult);
    fn insert_failed(&self, error: &StorageError);
    fn insert_abandoned(&self);
    fn feed_failed(&self, subscription_id: &str, error: &FeedError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl IngestionObserver for LogObserver {
    fn listener_started(&self, subscription_id: &str, collection: &str, lower_bound_ms: i64) {
        log_info!(
            "starting listener {subscription_id} on '{collection}' for date > {lower_bound_ms}"
        );
    }

    fn listener_stopped(&self, subscription_id: &str) {
        log_info!("listener {subscription_id} stopped");
    }

    fn document_received(&self, subscription_id: &str, document: &RawChangeDocument) {
        log_debug!("listener {subscription_id} got added document {document:?}");
    }

    fn document_rejected(&self, document: &RawChangeDocument, error: &MappingError) {
        log_warn!("dropping document {document:?}: {error}");
    }

    fn insert_succeeded(&self, result: &IngestionResult) {
        log_info!(
            "stored glucose readings: inserted={} skipped={} rejected={}",
            result.inserted,
            result.skipped,
            result.rejected
        );
    }

    fn insert_failed(&self, error: &StorageError) {
        log_error!("error inserting glucose readings: {error}");
    }

    fn insert_abandoned(&self) {
        log_warn!("glucose insert cancelled before commit, batch rolled back");
    }

    fn feed_failed(&self, subscription_id: &str, error: &FeedError) {
        log_error!("error listening to feed on {subscription_id}: {error}");
    }
}
