//! Mutation events delivered to subscribers.

use serde::{Deserialize, Serialize};

use crate::record::ConnectionKey;

/// Kind of mutation observed on a keyed collection.
///
/// First-known-status and status-changed carry no rendering distinction,
/// so both kinds flow through the same dispatch path. Removal and expiry
/// are never observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The key had no value before this mutation.
    Added,
    /// The key held an earlier version of the value.
    Updated,
}

/// One delivered mutation: the key and the raw JSON payload of the new
/// value. The payload is decoded by the dispatcher, not at the boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryEvent {
    pub kind: EventKind,
    pub key: ConnectionKey,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization() {
        let event = EntryEvent {
            kind: EventKind::Updated,
            key: "AA100BB200".into(),
            value: "{}".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("updated"));

        let parsed: EntryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, EventKind::Updated);
        assert_eq!(parsed.key, "AA100BB200");
    }
}
