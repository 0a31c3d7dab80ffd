use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::feed::{ChangeFeedSubscriber, ExecutionMode, FeedClient, SubscriberConfig};
use crate::ingest::{GlucoseStore, IdempotentSink, IngestionObserver};
use crate::settings::{FeatureFlag, SourceSettings};

use super::worker::{IngestionWorker, WorkOutcome};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

struct RunningWork {
    cancel_token: CancellationToken,
    handle: JoinHandle<WorkOutcome>,
}

/// Starts and stops ingestion in response to the host's enable/disable
/// hooks. In foreground mode the subscriber is driven directly; in
/// background mode it runs inside an [`IngestionWorker`] task.
pub struct LifecycleController {
    flag: Arc<dyn FeatureFlag>,
    subscriber: Arc<ChangeFeedSubscriber>,
    worker: IngestionWorker,
    mode: ExecutionMode,
    running: Mutex<Option<RunningWork>>,
}

impl LifecycleController {
    pub fn new(
        settings: &SourceSettings,
        flag: Arc<dyn FeatureFlag>,
        feed: Arc<dyn FeedClient>,
        store: Arc<dyn GlucoseStore>,
        observer: Arc<dyn IngestionObserver>,
    ) -> Self {
        let sink = IdempotentSink::new(store, Arc::clone(&observer), settings.source_tag.clone());
        let subscriber = Arc::new(ChangeFeedSubscriber::new(
            feed,
            sink,
            Arc::clone(&flag),
            observer,
            SubscriberConfig::from(settings),
        ));

        Self {
            flag,
            worker: IngestionWorker::new(Arc::clone(&subscriber), settings.work_deadline()),
            subscriber,
            mode: settings.execution_mode,
            running: Mutex::new(None),
        }
    }

    /// Returns whether ingestion is running afterwards.
    pub async fn on_enable(&self) -> Result<bool> {
        if !self.flag.is_enabled() {
            log_info!("glucose source disabled, not starting listener");
            return Ok(false);
        }

        match self.mode {
            ExecutionMode::Foreground => {
                if self.subscriber.is_listening() {
                    return Ok(true);
                }
                self.subscriber
                    .start()
                    .await
                    .context("failed to start change feed listener")?;
                Ok(true)
            }
            ExecutionMode::Background => {
                let mut running = self.running.lock().await;
                if let Some(work) = running.as_ref() {
                    if !work.handle.is_finished() {
                        return Ok(true);
                    }
                }
                if let Some(finished) = running.take() {
                    let outcome = finished
                        .handle
                        .await
                        .context("ingestion work unit failed to join")?;
                    log_info!("previous ingestion work unit ended with {outcome:?}");
                }

                let cancel_token = CancellationToken::new();
                let worker = self.worker.clone();
                let token = cancel_token.clone();
                let handle = tokio::spawn(async move { worker.run(token).await });
                *running = Some(RunningWork {
                    cancel_token,
                    handle,
                });
                Ok(true)
            }
        }
    }

    /// Stops ingestion. Returns the work unit's outcome in background mode.
    pub async fn on_disable(&self) -> Result<Option<WorkOutcome>> {
        match self.mode {
            ExecutionMode::Foreground => {
                self.subscriber.stop().await;
                Ok(None)
            }
            ExecutionMode::Background => {
                let work = self.running.lock().await.take();
                let outcome = match work {
                    Some(work) => {
                        work.cancel_token.cancel();
                        Some(
                            work.handle
                                .await
                                .context("ingestion work unit failed to join")?,
                        )
                    }
                    None => None,
                };
                // The work unit stops the subscriber itself; this covers a
                // unit that never got that far.
                self.subscriber.stop().await;
                if let Some(WorkOutcome::Failure(message)) = &outcome {
                    log_warn!("ingestion work unit reported failure: {message}");
                }
                Ok(outcome)
            }
        }
    }

    pub fn subscriber(&self) -> &Arc<ChangeFeedSubscriber> {
        &self.subscriber
    }

    /// One-shot ingestion by document id goes through here.
    pub fn worker(&self) -> &IngestionWorker {
        &self.worker
    }
}
