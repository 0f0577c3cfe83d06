//! Helpers for moving tabular data between a SQL warehouse and object storage.
//!
//! - **error**: Error taxonomy shared by every connector
//! - **models**: Credentials, tunnel and storage configuration, result tables
//! - **services**: Warehouse queries, SSH tunnels, object storage, module fetch
//! - **blocking**: Synchronous wrappers that own a tokio runtime
//! - **logging**: Structured logging setup
//!
//! ```no_run
//! use data_connectors::blocking::Connectors;
//! use data_connectors::models::{DbCredentials, StorageConfig};
//!
//! # fn main() -> data_connectors::ConnectorResult<()> {
//! let connectors = Connectors::new()?;
//! let creds = DbCredentials::new("analytics", "etl", "secret", "warehouse.internal");
//! let table = connectors.execute("SELECT id, name FROM users", &creds, None)?;
//!
//! let storage = connectors.storage(StorageConfig::anonymous("public-datasets"))?;
//! let listing = storage.list_prefix("exports/")?;
//! # let _ = (table, listing);
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod error;
pub mod logging;
pub mod models;
pub mod services;

#[cfg(test)]
mod verification_tests;

pub use error::{ConnectorError, ConnectorResult, ErrorInfo};
pub use models::{
    AccessKeys, DbCredentials, Endpoint, Row, SheetSelector, SshAuth, SslMode, StorageConfig,
    Table, TabularFormat, TabularOptions, TunnelConfig,
};
pub use services::{
    DbSession, MemoryStore, ObjectStorage, ObjectStore, S3Store, SshTunnelService, TunnelHandle,
    WarehouseService,
};
