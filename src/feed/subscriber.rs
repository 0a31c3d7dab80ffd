//! Change-feed subscriber.
//!
//! State machine: `Stopped -> Starting -> Listening -> Stopped`, with
//! `Listening -> Error -> Stopped` when the feed fails. At most one live
//! query exists per subscriber; `start` and `stop` are serialized through
//! one async mutex so a stale listener cannot outlive a racing `stop`.
//!
//! Notifications are consumed on a spawned task, one at a time and in
//! arrival order. The feed callback only enqueues, so mapping and storage
//! never run on the client's callback context.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{FeedError, StorageError};
use crate::ingest::{IdempotentSink, IngestionObserver};
use crate::models::{ChangeNotification, IngestionResult, IngestionStats};
use crate::settings::{FeatureFlag, SourceSettings};

use super::{FeedClient, FeedSubscription};

const ENABLE_LOGS: bool = true;
const MAX_LOOKBACK_MINUTES: i64 = 7 * 24 * 60;

use crate::{log_error, log_info, log_warn};

/// Where the subscriber's work is driven from, and what cancellation does to
/// a sink call that is already running.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    /// Driven directly by enable/disable. `stop` lets an in-flight insert
    /// finish before returning.
    #[default]
    Foreground,
    /// Driven by a cancellable work unit. Cancellation rolls back an
    /// in-flight insert that has not committed yet.
    Background,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SubscriberState {
    Stopped,
    Starting,
    Listening,
    Error,
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub collection: String,
    pub lookback: ChronoDuration,
    pub mode: ExecutionMode,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self::from(&SourceSettings::default())
    }
}

impl From<&SourceSettings> for SubscriberConfig {
    fn from(settings: &SourceSettings) -> Self {
        Self {
            collection: settings.collection.clone(),
            lookback: ChronoDuration::minutes(
                settings.lookback_minutes.clamp(0, MAX_LOOKBACK_MINUTES),
            ),
            mode: settings.execution_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberStatus {
    pub state: SubscriberState,
    pub subscription_id: Option<String>,
    pub lower_bound_ms: Option<i64>,
    pub last_error: Option<String>,
    pub stats: IngestionStats,
}

#[derive(Default)]
struct StatusDetails {
    subscription_id: Option<String>,
    lower_bound_ms: Option<i64>,
    last_error: Option<String>,
    stats: IngestionStats,
}

struct Shared {
    state_tx: watch::Sender<SubscriberState>,
    details: Mutex<StatusDetails>,
}

impl Shared {
    fn new() -> Self {
        let (state_tx, _) = watch::channel(SubscriberState::Stopped);
        Self {
            state_tx,
            details: Mutex::new(StatusDetails::default()),
        }
    }

    fn details(&self) -> MutexGuard<'_, StatusDetails> {
        match self.details.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, state: SubscriberState) {
        self.state_tx.send_replace(state);
    }

    fn state(&self) -> SubscriberState {
        *self.state_tx.borrow()
    }

    fn opened(&self, subscription_id: &str, lower_bound_ms: i64) {
        let mut details = self.details();
        details.subscription_id = Some(subscription_id.to_string());
        details.lower_bound_ms = Some(lower_bound_ms);
        details.last_error = None;
    }

    fn closed(&self, subscription_id: &str) {
        let mut details = self.details();
        if details.subscription_id.as_deref() == Some(subscription_id) {
            details.subscription_id = None;
        }
    }

    fn failed(&self, error: &FeedError) {
        self.details().last_error = Some(error.to_string());
        self.set_state(SubscriberState::Error);
    }

    fn record(&self, result: &IngestionResult) {
        let mut details = self.details();
        details.stats.notifications += 1;
        details.stats.record(result);
        match &result.error {
            Some(StorageError::Cancelled) | None => {}
            Some(err) => details.last_error = Some(err.to_string()),
        }
    }
}

struct ActiveListener {
    subscription_id: String,
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ChangeFeedSubscriber {
    feed: Arc<dyn FeedClient>,
    sink: IdempotentSink,
    gate: Arc<dyn FeatureFlag>,
    observer: Arc<dyn IngestionObserver>,
    config: SubscriberConfig,
    active: AsyncMutex<Option<ActiveListener>>,
    shared: Arc<Shared>,
}

impl ChangeFeedSubscriber {
    pub fn new(
        feed: Arc<dyn FeedClient>,
        sink: IdempotentSink,
        gate: Arc<dyn FeatureFlag>,
        observer: Arc<dyn IngestionObserver>,
        config: SubscriberConfig,
    ) -> Self {
        Self {
            feed,
            sink,
            gate,
            observer,
            config,
            active: AsyncMutex::new(None),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Opens a live query for documents newer than now minus the lookback.
    /// An existing listener is torn down first.
    pub async fn start(&self) -> Result<(), FeedError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            log_info!(
                "listener {} still registered, stopping it before restart",
                previous.subscription_id
            );
            self.shutdown(previous).await;
        }

        self.shared.set_state(SubscriberState::Starting);
        let subscription_id = Uuid::new_v4().to_string();
        let lower_bound_ms = (Utc::now() - self.config.lookback).timestamp_millis();

        let subscription = match self
            .feed
            .subscribe(&self.config.collection, lower_bound_ms)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                self.observer.feed_failed(&subscription_id, &err);
                self.shared.failed(&err);
                self.shared.set_state(SubscriberState::Stopped);
                return Err(err);
            }
        };

        self.shared.opened(&subscription_id, lower_bound_ms);
        self.observer
            .listener_started(&subscription_id, &self.config.collection, lower_bound_ms);

        // Listening must be visible before the loop can report a failure.
        self.shared.set_state(SubscriberState::Listening);

        let cancel_token = CancellationToken::new();
        let context = ListenContext {
            subscription_id: subscription_id.clone(),
            sink: self.sink.clone(),
            gate: Arc::clone(&self.gate),
            observer: Arc::clone(&self.observer),
            mode: self.config.mode,
            shared: Arc::clone(&self.shared),
        };
        let handle = tokio::spawn(listen_loop(context, subscription, cancel_token.clone()));

        *active = Some(ActiveListener {
            subscription_id,
            cancel_token,
            handle,
        });
        Ok(())
    }

    /// Cancels the live query. Safe from any state; once this returns no
    /// further sink call can come from the old subscription.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(listener) = active.take() {
            self.shutdown(listener).await;
        }
        self.shared.set_state(SubscriberState::Stopped);
    }

    async fn shutdown(&self, listener: ActiveListener) {
        listener.cancel_token.cancel();
        if let Err(err) = listener.handle.await {
            log_error!(
                "listener {} task failed to join: {err}",
                listener.subscription_id
            );
        }
    }

    pub fn state(&self) -> SubscriberState {
        self.shared.state()
    }

    pub fn is_listening(&self) -> bool {
        self.state() == SubscriberState::Listening
    }

    pub fn watch_state(&self) -> watch::Receiver<SubscriberState> {
        self.shared.state_tx.subscribe()
    }

    pub fn status(&self) -> SubscriberStatus {
        let state = self.shared.state();
        let details = self.shared.details();
        SubscriberStatus {
            state,
            subscription_id: details.subscription_id.clone(),
            lower_bound_ms: details.lower_bound_ms,
            last_error: details.last_error.clone(),
            stats: details.stats,
        }
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn feed(&self) -> &Arc<dyn FeedClient> {
        &self.feed
    }

    pub fn sink(&self) -> &IdempotentSink {
        &self.sink
    }

    pub fn gate(&self) -> &Arc<dyn FeatureFlag> {
        &self.gate
    }
}

struct ListenContext {
    subscription_id: String,
    sink: IdempotentSink,
    gate: Arc<dyn FeatureFlag>,
    observer: Arc<dyn IngestionObserver>,
    mode: ExecutionMode,
    shared: Arc<Shared>,
}

impl ListenContext {
    /// Returns `false` when cancellation rolled back the in-flight insert.
    async fn handle_notification(
        &self,
        notification: &ChangeNotification,
        cancel_token: &CancellationToken,
    ) -> bool {
        let mut documents = Vec::new();
        for document in notification.added_documents() {
            // Disabled mid-flight: drop, don't queue.
            if !self.gate.is_enabled() {
                continue;
            }
            self.observer.document_received(&self.subscription_id, document);
            documents.push(document);
        }

        // The store result is always awaited so the counters match what
        // was committed.
        let result = match self.mode {
            ExecutionMode::Foreground => self.sink.ingest(documents).await,
            ExecutionMode::Background => self.sink.ingest_until(documents, cancel_token).await,
        };

        self.shared.record(&result);
        if result.error == Some(StorageError::Cancelled) {
            log_warn!(
                "listener {} cancelled with an insert in flight",
                self.subscription_id
            );
            return false;
        }
        true
    }

    fn fail(&self, error: FeedError) {
        self.observer.feed_failed(&self.subscription_id, &error);
        self.shared.failed(&error);
    }
}

async fn listen_loop(
    context: ListenContext,
    mut subscription: FeedSubscription,
    cancel_token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            next = subscription.recv() => next,
        };

        match next {
            Some(Ok(notification)) => {
                if !context
                    .handle_notification(&notification, &cancel_token)
                    .await
                {
                    break;
                }
            }
            Some(Err(err)) => {
                context.fail(err);
                break;
            }
            None => {
                context.fail(FeedError::Closed);
                break;
            }
        }
    }

    subscription.close();
    context.shared.closed(&context.subscription_id);
    context.observer.listener_stopped(&context.subscription_id);
    context.shared.set_state(SubscriberState::Stopped);
}
