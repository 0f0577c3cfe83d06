//! Data models for the connectors.
//!
//! - `connection` - DbCredentials, TunnelConfig, SshAuth, SslMode
//! - `storage` - StorageConfig, AccessKeys, TabularFormat, TabularOptions
//! - `table` - Table, the in-memory result of queries and file reads

pub mod connection;
pub mod storage;
pub mod table;

pub use connection::{DbCredentials, Endpoint, SshAuth, SslMode, TunnelConfig};
pub use storage::{AccessKeys, SheetSelector, StorageConfig, TabularFormat, TabularOptions};
pub use table::{Row, Table};
