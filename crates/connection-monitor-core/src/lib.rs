//! Core abstractions for flight connection monitoring.
//!
//! This crate provides the fundamental building blocks:
//! - `ConnectionRecord` - Decoded live-status record with derived status
//! - `EntryEvent` - Tagged mutation event (added or updated)
//! - `SubscriptionFilter` - Single-key and predicate event filtering
//! - `KeyedDataset` - Capability surface over the backing store
//! - `Dispatcher` - Decode-and-render loop for delivered events

pub mod dataset;
pub mod dispatch;
pub mod event;
pub mod filter;
pub mod record;

pub use dataset::{
    DatasetError, KeyedDataset, LIVE_CONNECTIONS, LOCAL_CONNECTIONS, Row, Subscription,
    SubscriptionId,
};
pub use dispatch::{Dispatcher, LineRenderer, Renderer, format_connection};
pub use event::{EntryEvent, EventKind};
pub use filter::{Predicate, PredicateParseError, SubscriptionFilter};
pub use record::{
    ConnectionKey, ConnectionRecord, ConnectionStatus, DecodeError, STATUS_AT_RISK, STATUS_OK,
    connection_key, time_of_day,
};
