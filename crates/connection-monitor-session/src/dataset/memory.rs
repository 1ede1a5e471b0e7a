//! In-memory dataset.
//!
//! Useful for tests and single-process experiments. Mutations made
//! through [`MemoryDataset::put`] are delivered to live subscriptions
//! exactly like cluster-side entry events.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use connection_monitor_core::{
    DatasetError, EntryEvent, EventKind, KeyedDataset, Row, Subscription, SubscriptionFilter,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

struct Subscriber {
    collection: String,
    filter: SubscriptionFilter,
    sender: mpsc::Sender<EntryEvent>,
}

/// In-memory implementation of the dataset surface.
#[derive(Default)]
pub struct MemoryDataset {
    collections: RwLock<HashMap<String, BTreeMap<String, String>>>,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl MemoryDataset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, delivering the mutation to every
    /// matching live subscription.
    ///
    /// # Errors
    /// Returns error if the backing lock is poisoned.
    pub async fn put(
        &self,
        collection: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DatasetError> {
        let kind = {
            let mut collections = self
                .collections
                .write()
                .map_err(|e| DatasetError::Backend(e.to_string()))?;
            let entries = collections.entry(collection.to_owned()).or_default();
            if entries.insert(key.to_owned(), value.to_owned()).is_some() {
                EventKind::Updated
            } else {
                EventKind::Added
            }
        };

        let event = EntryEvent {
            kind,
            key: key.to_owned(),
            value: value.to_owned(),
        };
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        for subscriber in subscribers.iter() {
            if subscriber.collection == collection && subscriber.filter.matches(key, value) {
                let _ = subscriber.sender.send(event.clone()).await;
            }
        }
        Ok(())
    }
}

struct QueryPlan<'a> {
    fields: Vec<&'a str>,
    collection: &'a str,
    order_by: Option<&'a str>,
}

fn strip_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let candidate = input.get(..keyword.len())?;
    candidate
        .eq_ignore_ascii_case(keyword)
        .then(|| &input[keyword.len()..])
}

fn split_keyword<'a>(input: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let haystack = input.to_ascii_lowercase();
    let at = haystack.find(keyword)?;
    Some((&input[..at], &input[at + keyword.len()..]))
}

/// Exactly the shape the static listing needs:
/// `SELECT f, g FROM coll [ORDER BY f]`.
fn parse_query(sql: &str) -> Result<QueryPlan<'_>, DatasetError> {
    let bad = || DatasetError::BadQuery(sql.to_owned());

    let rest = strip_keyword(sql.trim(), "select ").ok_or_else(bad)?;
    let (fields_part, rest) = split_keyword(rest, " from ").ok_or_else(bad)?;
    let fields: Vec<&str> = fields_part.split(',').map(str::trim).collect();
    if fields.iter().any(|field| field.is_empty()) {
        return Err(bad());
    }

    let (collection, order_by) = match split_keyword(rest, " order by ") {
        Some((collection, field)) => (collection.trim(), Some(field.trim())),
        None => (rest.trim(), None),
    };
    if collection.is_empty() || collection.contains(char::is_whitespace) {
        return Err(bad());
    }
    if order_by.is_some_and(|field| field.is_empty() || field.contains(char::is_whitespace)) {
        return Err(bad());
    }

    Ok(QueryPlan {
        fields,
        collection,
        order_by,
    })
}

fn field_text(value: &serde_json::Value, field: &str) -> String {
    value
        .get(field)
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[async_trait]
impl KeyedDataset for MemoryDataset {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, DatasetError> {
        Ok(self
            .collections
            .read()
            .map_err(|e| DatasetError::Backend(e.to_string()))?
            .get(collection)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, DatasetError> {
        let plan = parse_query(sql)?;

        let mut values: Vec<serde_json::Value> = self
            .collections
            .read()
            .map_err(|e| DatasetError::Backend(e.to_string()))?
            .get(plan.collection)
            .map(|entries| {
                entries
                    .values()
                    .filter_map(|raw| serde_json::from_str(raw).ok())
                    .collect()
            })
            .unwrap_or_default();

        if let Some(field) = plan.order_by {
            values.sort_by_key(|value| field_text(value, field));
        }

        Ok(values
            .iter()
            .map(|value| {
                plan.fields
                    .iter()
                    .map(|field| value.get(field).cloned().unwrap_or(serde_json::Value::Null))
                    .collect()
            })
            .collect())
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: SubscriptionFilter,
    ) -> Result<Subscription, DatasetError> {
        let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.subscribers.lock().await.push(Subscriber {
            collection: collection.to_owned(),
            filter,
            sender,
        });
        Ok(Subscription::new(Uuid::new_v4(), receiver))
    }
}

#[cfg(test)]
mod tests {
    use connection_monitor_core::{LIVE_CONNECTIONS, LOCAL_CONNECTIONS, Predicate};

    use super::*;

    fn record(arriving: &str, departing: &str, status: &str) -> String {
        serde_json::json!({
            "arriving_flight": arriving,
            "departing_flight": departing,
            "connection_status": status,
        })
        .to_string()
    }

    #[tokio::test]
    async fn absent_key_is_a_miss_not_an_error() {
        let dataset = MemoryDataset::new();
        assert!(
            dataset
                .get(LIVE_CONNECTIONS, "AA100BB200")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn put_then_get() {
        let dataset = MemoryDataset::new();
        let value = record("AA100", "BB200", "OK");
        dataset
            .put(LIVE_CONNECTIONS, "AA100BB200", &value)
            .await
            .unwrap();
        assert_eq!(
            dataset.get(LIVE_CONNECTIONS, "AA100BB200").await.unwrap(),
            Some(value)
        );
    }

    #[tokio::test]
    async fn listing_query_orders_by_arriving_flight() {
        let dataset = MemoryDataset::new();
        dataset
            .put(
                LOCAL_CONNECTIONS,
                "CC300DD400",
                &record("CC300", "DD400", "OK"),
            )
            .await
            .unwrap();
        dataset
            .put(
                LOCAL_CONNECTIONS,
                "AA100BB200",
                &record("AA100", "BB200", "OK"),
            )
            .await
            .unwrap();

        let rows = dataset
            .query(
                "SELECT arriving_flight, departing_flight FROM local_connections \
                 ORDER BY arriving_flight",
            )
            .await
            .unwrap();
        let pairs: Vec<(String, String)> = rows
            .iter()
            .map(|row| {
                (
                    row[0].as_str().unwrap().to_owned(),
                    row[1].as_str().unwrap().to_owned(),
                )
            })
            .collect();
        assert_eq!(
            pairs,
            [
                ("AA100".to_owned(), "BB200".to_owned()),
                ("CC300".to_owned(), "DD400".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn unsupported_query_is_rejected() {
        let dataset = MemoryDataset::new();
        assert!(matches!(
            dataset.query("DELETE FROM local_connections").await,
            Err(DatasetError::BadQuery(_))
        ));
    }

    #[tokio::test]
    async fn single_key_subscription_never_sees_other_keys() {
        let dataset = MemoryDataset::new();
        let mut subscription = dataset
            .subscribe(LIVE_CONNECTIONS, SubscriptionFilter::key("AA100BB200"))
            .await
            .unwrap();

        dataset
            .put(
                LIVE_CONNECTIONS,
                "CC300DD400",
                &record("CC300", "DD400", "AT RISK"),
            )
            .await
            .unwrap();
        dataset
            .put(
                LIVE_CONNECTIONS,
                "AA100BB200",
                &record("AA100", "BB200", "OK"),
            )
            .await
            .unwrap();

        let event = subscription.next_event().await.unwrap();
        assert_eq!(event.key, "AA100BB200");
        assert!(subscription.try_next().is_none());
    }

    #[tokio::test]
    async fn predicate_subscription_matches_at_mutation_time() {
        let dataset = MemoryDataset::new();
        let filter = SubscriptionFilter::predicate(Predicate::field_equals(
            "connection_status",
            "AT RISK",
        ));
        let mut subscription = dataset.subscribe(LIVE_CONNECTIONS, filter).await.unwrap();

        dataset
            .put(
                LIVE_CONNECTIONS,
                "AA100BB200",
                &record("AA100", "BB200", "OK"),
            )
            .await
            .unwrap();
        dataset
            .put(
                LIVE_CONNECTIONS,
                "CC300DD400",
                &record("CC300", "DD400", "AT RISK"),
            )
            .await
            .unwrap();

        let event = subscription.next_event().await.unwrap();
        assert_eq!(event.key, "CC300DD400");
        assert_eq!(event.kind, EventKind::Added);
        assert!(subscription.try_next().is_none());
    }

    #[tokio::test]
    async fn second_put_is_an_update() {
        let dataset = MemoryDataset::new();
        let mut subscription = dataset
            .subscribe(LIVE_CONNECTIONS, SubscriptionFilter::key("AA100BB200"))
            .await
            .unwrap();

        let first = record("AA100", "BB200", "OK");
        let second = record("AA100", "BB200", "AT RISK");
        dataset
            .put(LIVE_CONNECTIONS, "AA100BB200", &first)
            .await
            .unwrap();
        dataset
            .put(LIVE_CONNECTIONS, "AA100BB200", &second)
            .await
            .unwrap();

        assert_eq!(
            subscription.next_event().await.unwrap().kind,
            EventKind::Added
        );
        let updated = subscription.next_event().await.unwrap();
        assert_eq!(updated.kind, EventKind::Updated);
        assert_eq!(updated.value, second);
    }
}
