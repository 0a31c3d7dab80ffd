use serde::Serialize;

use crate::error::StorageError;

/// Outcome of one sink call.
///
/// Partial success is not a failure: duplicates land in `skipped`, rejected
/// documents in `rejected`. Only a genuine storage failure sets `error`, in
/// which case nothing from the batch counts as inserted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub inserted: usize,
    pub skipped: usize,
    pub rejected: usize,
    #[serde(skip)]
    pub error: Option<StorageError>,
}

impl IngestionResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Running totals kept across every notification of a subscriber's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionStats {
    pub notifications: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub storage_failures: u64,
    /// Batches rolled back because the listener was cancelled mid-insert.
    pub abandoned: u64,
}

impl IngestionStats {
    pub fn record(&mut self, result: &IngestionResult) {
        self.inserted += result.inserted as u64;
        self.skipped += result.skipped as u64;
        self.rejected += result.rejected as u64;
        match result.error {
            Some(StorageError::Cancelled) => self.abandoned += 1,
            Some(_) => self.storage_failures += 1,
            None => {}
        }
    }
}
