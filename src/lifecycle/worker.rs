//! Background work unit.
//!
//! Runs the shared subscriber under a cancellation token and an optional
//! deadline, and reports a [`WorkOutcome`] the host's scheduler can act on.
//! Retry and backoff stay with the scheduler.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::feed::{ChangeFeedSubscriber, SubscriberState};
use crate::ingest::map_document;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "result", content = "message")]
pub enum WorkOutcome {
    Success(Option<String>),
    Failure(String),
}

impl WorkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WorkOutcome::Success(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitReason {
    Cancelled,
    DeadlineReached,
    FeedEnded,
}

#[derive(Clone)]
pub struct IngestionWorker {
    subscriber: Arc<ChangeFeedSubscriber>,
    deadline: Option<Duration>,
}

impl IngestionWorker {
    pub fn new(subscriber: Arc<ChangeFeedSubscriber>, deadline: Option<Duration>) -> Self {
        Self {
            subscriber,
            deadline,
        }
    }

    /// Listens until cancelled, until the deadline passes, or until the feed
    /// fails. The subscription is always released before this returns.
    pub async fn run(&self, cancel_token: CancellationToken) -> WorkOutcome {
        if !self.subscriber.gate().is_enabled() {
            return WorkOutcome::Success(Some("Plugin not enabled".into()));
        }

        let failures_before = self.subscriber.status().stats.storage_failures;

        if let Err(err) = self.subscriber.start().await {
            return WorkOutcome::Failure(err.to_string());
        }

        let mut state = self.subscriber.watch_state();
        let deadline = self.deadline;
        let reason = tokio::select! {
            _ = cancel_token.cancelled() => ExitReason::Cancelled,
            _ = async {
                match deadline {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => future::pending::<()>().await,
                }
            } => ExitReason::DeadlineReached,
            _ = state.wait_for(|s| *s == SubscriberState::Stopped) => ExitReason::FeedEnded,
        };

        self.subscriber.stop().await;

        let status = self.subscriber.status();
        log_info!(
            "ingestion work unit finished ({reason:?}): inserted={} skipped={} rejected={}",
            status.stats.inserted,
            status.stats.skipped,
            status.stats.rejected
        );

        if reason == ExitReason::FeedEnded {
            let message = status
                .last_error
                .unwrap_or_else(|| "feed closed unexpectedly".into());
            log_error!("ingestion work unit failed: {message}");
            return WorkOutcome::Failure(message);
        }

        let new_failures = status.stats.storage_failures - failures_before;
        if new_failures > 0 {
            let message = status
                .last_error
                .unwrap_or_else(|| format!("{new_failures} storage failures"));
            return WorkOutcome::Failure(message);
        }

        match reason {
            ExitReason::DeadlineReached => WorkOutcome::Success(Some("Deadline reached".into())),
            _ => WorkOutcome::Success(None),
        }
    }

    /// One-shot ingestion of a single remote document by id.
    pub async fn ingest_document(&self, document_id: &str) -> WorkOutcome {
        if !self.subscriber.gate().is_enabled() {
            return WorkOutcome::Success(Some("Plugin not enabled".into()));
        }

        let collection = &self.subscriber.config().collection;
        let document = match self
            .subscriber
            .feed()
            .fetch_document(collection, document_id)
            .await
        {
            Ok(Some(document)) => document,
            Ok(None) => return WorkOutcome::Failure("No data in document".into()),
            Err(err) => {
                log_error!("failed to fetch document {document_id}: {err}");
                return WorkOutcome::Failure(err.to_string());
            }
        };

        let reading = match map_document(&document) {
            Ok(reading) => reading,
            Err(err) => {
                log_warn!("document {document_id} rejected: {err}");
                return WorkOutcome::Failure(err.to_string());
            }
        };

        let result = self.subscriber.sink().insert(vec![reading]).await;
        match result.error {
            Some(err) => WorkOutcome::Failure(err.to_string()),
            None => WorkOutcome::Success(None),
        }
    }
}
