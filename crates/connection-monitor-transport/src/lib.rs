//! Transport layer for the cluster link.
//!
//! Provides:
//! - Wire protocol (tagged JSON frames, one per line)
//! - Framed TCP link with optional mutual TLS
//! - Keystore/truststore loading for the secured paths

pub mod link;
pub mod protocol;
pub mod tls;

pub use link::{Link, LinkReader, LinkWriter, TransportError};
pub use protocol::{ClientRequest, RequestId, ServerFrame};
pub use tls::{TlsConnector, TlsError, TlsSettings};
