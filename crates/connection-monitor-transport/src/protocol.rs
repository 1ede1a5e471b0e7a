//! Wire protocol for client-cluster communication.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use connection_monitor_core::{EventKind, Row, SubscriptionFilter};

/// Correlates a request with its reply frame. Subscribe requests reuse
/// the id as the subscription id for event frames.
pub type RequestId = Uuid;

/// Frame from client to cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// First frame on every link; names the cluster and optionally
    /// carries a discovery token for the cloud paths.
    Hello {
        cluster: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    /// Point lookup.
    Get {
        id: RequestId,
        collection: String,
        key: String,
    },
    /// Finite ordered query.
    Query { id: RequestId, sql: String },
    /// Register a filtered listener. Values are always included.
    Subscribe {
        id: RequestId,
        collection: String,
        filter: SubscriptionFilter,
    },
    /// Keepalive.
    Ping,
}

/// Frame from cluster to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Hello accepted; names the member that answered.
    Welcome { member: String },
    /// Reply to `Get`. An unset key is `value: None`, not an error.
    Value {
        id: RequestId,
        value: Option<String>,
    },
    /// Reply to `Query`.
    Rows { id: RequestId, rows: Vec<Row> },
    /// Reply to `Subscribe`; events for the registration follow.
    Subscribed { id: RequestId },
    /// One delivered mutation on a subscribed collection.
    Event {
        subscription: RequestId,
        kind: EventKind,
        key: String,
        value: String,
    },
    /// Request failed, or (without an id) the link itself is unhappy.
    Error {
        id: Option<RequestId>,
        message: String,
    },
    /// Keepalive reply.
    Pong,
}
