//! Remote change-feed port and the subscriber that consumes it.
//!
//! A [`FeedClient`] opens live queries; each query yields a
//! [`FeedSubscription`] carrying the ordered notification stream and the
//! remote listener registration. The registration is released exactly once,
//! either explicitly through [`FeedSubscription::close`] or on drop.

pub mod channel;
pub mod subscriber;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FeedError;
use crate::models::{ChangeNotification, RawChangeDocument};

pub use channel::ChannelFeed;
pub use subscriber::{
    ChangeFeedSubscriber, ExecutionMode, SubscriberConfig, SubscriberState, SubscriberStatus,
};

pub type NotificationReceiver = mpsc::UnboundedReceiver<Result<ChangeNotification, FeedError>>;

#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Opens a live query for documents of `collection` whose `date` is
    /// strictly greater than `lower_bound_ms`.
    async fn subscribe(
        &self,
        collection: &str,
        lower_bound_ms: i64,
    ) -> Result<FeedSubscription, FeedError>;

    /// One-shot read of a single document. `Ok(None)` when it does not exist.
    async fn fetch_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<RawChangeDocument>, FeedError>;
}

/// Handle on the remote side of a live query.
pub trait ListenerRegistration: Send {
    fn remove(&mut self);
}

/// Releases the wrapped registration at most once.
pub struct SubscriptionGuard {
    registration: Option<Box<dyn ListenerRegistration>>,
}

impl SubscriptionGuard {
    pub fn new(registration: Box<dyn ListenerRegistration>) -> Self {
        Self {
            registration: Some(registration),
        }
    }

    pub fn release(&mut self) {
        if let Some(mut registration) = self.registration.take() {
            registration.remove();
        }
    }

    pub fn is_released(&self) -> bool {
        self.registration.is_none()
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct FeedSubscription {
    notifications: NotificationReceiver,
    guard: SubscriptionGuard,
}

impl FeedSubscription {
    pub fn new(notifications: NotificationReceiver, registration: Box<dyn ListenerRegistration>) -> Self {
        Self {
            notifications,
            guard: SubscriptionGuard::new(registration),
        }
    }

    /// Next notification in arrival order; `None` once the feed side is gone.
    pub async fn recv(&mut self) -> Option<Result<ChangeNotification, FeedError>> {
        if self.guard.is_released() {
            return None;
        }
        self.notifications.recv().await
    }

    /// Removes the remote listener and discards anything still queued.
    pub fn close(&mut self) {
        self.guard.release();
        self.notifications.close();
        while self.notifications.try_recv().is_ok() {}
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_released()
    }
}
