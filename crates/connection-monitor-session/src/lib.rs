//! Session bootstrap and dataset access.
//!
//! Three mutually exclusive bootstrap modes resolve into one
//! [`BootstrapConfig`] (local vault, cloud environment, plain members),
//! and [`Session::establish`] turns it into a live, reconnect-enabled
//! session over the transport link.

pub mod config;
pub mod dataset;
pub mod discovery;
pub mod session;

pub use config::{
    BootstrapConfig, BootstrapMode, ConfigError, Discovery, EnvSource, ProcessEnv, resolve,
    select_mode,
};
pub use dataset::{MemoryDataset, RemoteDataset};
pub use session::{Session, SessionError};
