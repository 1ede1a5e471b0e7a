//! Dataset surface bound to a live session.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use connection_monitor_core::{DatasetError, KeyedDataset, Row, Subscription, SubscriptionFilter};

use crate::session::{Command, Request};

/// Cheap cloneable handle; all operations route through the session
/// driver and fail with `Closed` once the session has shut down.
#[derive(Clone)]
pub struct RemoteDataset {
    commands: mpsc::Sender<Command>,
}

impl RemoteDataset {
    pub(crate) const fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl KeyedDataset for RemoteDataset {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<String>, DatasetError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Request(Request::Get {
                collection: collection.to_owned(),
                key: key.to_owned(),
                reply,
            }))
            .await
            .map_err(|_| DatasetError::Closed)?;
        response.await.map_err(|_| DatasetError::Closed)?
    }

    async fn query(&self, sql: &str) -> Result<Vec<Row>, DatasetError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Request(Request::Query {
                sql: sql.to_owned(),
                reply,
            }))
            .await
            .map_err(|_| DatasetError::Closed)?;
        response.await.map_err(|_| DatasetError::Closed)?
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: SubscriptionFilter,
    ) -> Result<Subscription, DatasetError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Request(Request::Subscribe {
                collection: collection.to_owned(),
                filter,
                reply,
            }))
            .await
            .map_err(|_| DatasetError::Closed)?;
        response.await.map_err(|_| DatasetError::Closed)?
    }
}
