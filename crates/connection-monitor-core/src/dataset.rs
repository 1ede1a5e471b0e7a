//! Capability surface over the backing keyed store.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::event::EntryEvent;
use crate::filter::SubscriptionFilter;

/// Identifier of one active subscription registration.
pub type SubscriptionId = Uuid;

/// One row of a query result: the selected fields, in select order.
pub type Row = Vec<serde_json::Value>;

/// Name of the static membership collection.
pub const LOCAL_CONNECTIONS: &str = "local_connections";

/// Name of the mutable live-status collection.
pub const LIVE_CONNECTIONS: &str = "live_connections";

/// Dataset error.
///
/// An absent key on a point lookup is NOT an error; `get` returns
/// `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("session is closed")]
    Closed,
    #[error("unsupported query: {0}")]
    BadQuery(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// One active registration of a filter against a named collection.
///
/// Delivery continues until the subscription is dropped or the session
/// ends; there is no independent persistence.
pub struct Subscription {
    id: SubscriptionId,
    events: mpsc::Receiver<EntryEvent>,
}

impl Subscription {
    #[must_use]
    pub const fn new(id: SubscriptionId, events: mpsc::Receiver<EntryEvent>) -> Self {
        Self { id, events }
    }

    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Await the next delivered event. `None` once the session has torn
    /// the registration down.
    pub async fn next_event(&mut self) -> Option<EntryEvent> {
        self.events.recv().await
    }

    /// Non-blocking probe for an already-delivered event.
    pub fn try_next(&mut self) -> Option<EntryEvent> {
        self.events.try_recv().ok()
    }

    /// The delivery stream, in delivery order.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, EntryEvent> {
        Box::pin(ReceiverStream::new(self.events))
    }
}

/// A partitioned store of named keyed collections, queryable and
/// subscribable.
#[async_trait]
pub trait KeyedDataset: Send + Sync {
    /// Point lookup. An unset key is `Ok(None)`, never an error.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, DatasetError>;

    /// Run a finite, ordered query (`SELECT f, g FROM coll ORDER BY f`).
    async fn query(&self, sql: &str) -> Result<Vec<Row>, DatasetError>;

    /// Register a filter; subsequent matching mutations are delivered on
    /// the returned subscription, values included.
    async fn subscribe(
        &self,
        collection: &str,
        filter: SubscriptionFilter,
    ) -> Result<Subscription, DatasetError>;
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::event::EventKind;

    #[test]
    fn subscription_stream_yields_in_delivery_order() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel(4);
            let subscription = Subscription::new(Uuid::new_v4(), rx);

            for key in ["a", "b"] {
                tx.send(EntryEvent {
                    kind: EventKind::Added,
                    key: key.into(),
                    value: "{}".into(),
                })
                .await
                .unwrap();
            }
            drop(tx);

            let keys: Vec<_> = subscription
                .into_stream()
                .map(|event| event.key)
                .collect()
                .await;
            assert_eq!(keys, ["a", "b"]);
        });
    }

    #[test]
    fn dropped_sender_ends_subscription() {
        tokio_test::block_on(async {
            let (tx, rx) = mpsc::channel::<EntryEvent>(4);
            let mut subscription = Subscription::new(Uuid::new_v4(), rx);
            drop(tx);
            assert!(subscription.next_event().await.is_none());
        });
    }
}
