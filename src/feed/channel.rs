//! In-process [`FeedClient`].
//!
//! Host adapters around a callback-based database SDK push every snapshot
//! into [`ChannelFeed::publish`] from the SDK's callback. Publishing never
//! blocks: each live query gets an unbounded queue and the subscriber drains
//! it on its own task. The `date > lower_bound` query filter is applied here,
//! the way the remote query would apply it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::FeedError;
use crate::models::{ChangeNotification, RawChangeDocument};

use super::{FeedClient, FeedSubscription, ListenerRegistration};

type NotificationSender = mpsc::UnboundedSender<Result<ChangeNotification, FeedError>>;

struct Listener {
    collection: String,
    lower_bound_ms: i64,
    sender: NotificationSender,
}

#[derive(Default)]
struct ChannelFeedInner {
    next_id: u64,
    listeners: HashMap<u64, Listener>,
    documents: HashMap<(String, String), RawChangeDocument>,
    subscribe_error: Option<FeedError>,
    total_subscriptions: u64,
}

#[derive(Clone, Default)]
pub struct ChannelFeed {
    inner: Arc<Mutex<ChannelFeedInner>>,
}

fn lock(inner: &Mutex<ChannelFeedInner>) -> MutexGuard<'_, ChannelFeedInner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ChannelFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a notification to every live query on `collection`. Returns
    /// how many listeners received a non-empty notification.
    pub fn publish(&self, collection: &str, notification: ChangeNotification) -> usize {
        let mut inner = lock(&self.inner);
        inner.listeners.retain(|_, listener| !listener.sender.is_closed());

        let mut delivered = 0;
        for listener in inner.listeners.values() {
            if listener.collection != collection {
                continue;
            }
            let filtered = filter_by_date(&notification, listener.lower_bound_ms);
            if filtered.document_changes.is_empty() {
                continue;
            }
            if listener.sender.send(Ok(filtered)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Reports a subscription-level failure to every live query on
    /// `collection`.
    pub fn fail(&self, collection: &str, error: FeedError) {
        let inner = lock(&self.inner);
        for listener in inner.listeners.values() {
            if listener.collection == collection {
                let _ = listener.sender.send(Err(error.clone()));
            }
        }
    }

    /// Makes the next `subscribe` calls fail until cleared with `None`.
    pub fn set_subscribe_error(&self, error: Option<FeedError>) {
        lock(&self.inner).subscribe_error = error;
    }

    /// Stores a document for [`FeedClient::fetch_document`].
    pub fn put_document(&self, collection: &str, document_id: &str, document: RawChangeDocument) {
        lock(&self.inner)
            .documents
            .insert((collection.to_string(), document_id.to_string()), document);
    }

    pub fn active_listeners(&self) -> usize {
        let mut inner = lock(&self.inner);
        inner.listeners.retain(|_, listener| !listener.sender.is_closed());
        inner.listeners.len()
    }

    pub fn total_subscriptions(&self) -> u64 {
        lock(&self.inner).total_subscriptions
    }
}

#[async_trait]
impl FeedClient for ChannelFeed {
    async fn subscribe(
        &self,
        collection: &str,
        lower_bound_ms: i64,
    ) -> Result<FeedSubscription, FeedError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut inner = lock(&self.inner);
            if let Some(err) = inner.subscribe_error.clone() {
                return Err(err);
            }
            let id = inner.next_id;
            inner.next_id += 1;
            inner.total_subscriptions += 1;
            inner.listeners.insert(
                id,
                Listener {
                    collection: collection.to_string(),
                    lower_bound_ms,
                    sender,
                },
            );
            id
        };

        let registration = ChannelRegistration {
            id,
            inner: Arc::clone(&self.inner),
        };
        Ok(FeedSubscription::new(receiver, Box::new(registration)))
    }

    async fn fetch_document(
        &self,
        collection: &str,
        document_id: &str,
    ) -> Result<Option<RawChangeDocument>, FeedError> {
        let inner = lock(&self.inner);
        Ok(inner
            .documents
            .get(&(collection.to_string(), document_id.to_string()))
            .cloned())
    }
}

struct ChannelRegistration {
    id: u64,
    inner: Arc<Mutex<ChannelFeedInner>>,
}

impl ListenerRegistration for ChannelRegistration {
    fn remove(&mut self) {
        lock(&self.inner).listeners.remove(&self.id);
    }
}

fn filter_by_date(notification: &ChangeNotification, lower_bound_ms: i64) -> ChangeNotification {
    let document_changes = notification
        .document_changes
        .iter()
        .filter(|change| match document_date(&change.document) {
            Some(date) => date > lower_bound_ms,
            // The mapper decides what to do with a document without a date.
            None => true,
        })
        .cloned()
        .collect();
    ChangeNotification { document_changes }
}

fn document_date(document: &RawChangeDocument) -> Option<i64> {
    match document.get("date")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|v| v as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentChange;
    use crate::testing::doc;
    use serde_json::json;

    #[tokio::test]
    async fn publish_applies_lower_bound_filter() {
        let feed = ChannelFeed::new();
        let mut subscription = feed.subscribe("entries", 1_000).await.unwrap();

        feed.publish(
            "entries",
            ChangeNotification::new(vec![
                DocumentChange::added(doc(json!({"date": 999, "sgv": 1}))),
                DocumentChange::added(doc(json!({"date": "1001", "sgv": 2}))),
            ]),
        );

        let notification = subscription.recv().await.unwrap().unwrap();
        assert_eq!(notification.document_changes.len(), 1);
        assert_eq!(notification.document_changes[0].document["sgv"], json!(2));
    }

    #[tokio::test]
    async fn other_collections_are_not_delivered() {
        let feed = ChannelFeed::new();
        let _subscription = feed.subscribe("entries", 0).await.unwrap();

        let delivered = feed.publish(
            "treatments",
            ChangeNotification::new(vec![DocumentChange::added(doc(json!({"date": 5})))]),
        );
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn closing_subscription_removes_listener() {
        let feed = ChannelFeed::new();
        let mut subscription = feed.subscribe("entries", 0).await.unwrap();
        assert_eq!(feed.active_listeners(), 1);

        subscription.close();
        assert_eq!(feed.active_listeners(), 0);
    }

    #[tokio::test]
    async fn subscribe_error_is_returned() {
        let feed = ChannelFeed::new();
        feed.set_subscribe_error(Some(FeedError::Unauthorized("entries".into())));

        let result = feed.subscribe("entries", 0).await;
        assert!(matches!(result, Err(FeedError::Unauthorized(_))));
        assert_eq!(feed.total_subscriptions(), 0);
    }

    #[tokio::test]
    async fn fetch_document_returns_stored_copy() {
        let feed = ChannelFeed::new();
        feed.put_document("entries", "abc", doc(json!({"date": 1, "sgv": 90})));

        let found = feed.fetch_document("entries", "abc").await.unwrap();
        assert_eq!(found.unwrap()["sgv"], json!(90));
        assert!(feed.fetch_document("entries", "nope").await.unwrap().is_none());
    }
}
