//! Connector services.
//!
//! - `warehouse` - Query execution against a PostgreSQL-compatible warehouse
//! - `ssh_tunnel` - SSH port forwarding to reach a warehouse behind a bastion
//! - `object_store` - Bucket-bound object storage client and backends
//! - `tabular` - CSV and spreadsheet decoding
//! - `module_fetch` - Download and install gzip tar module archives

pub mod module_fetch;
pub mod object_store;
pub mod ssh_tunnel;
pub mod tabular;
pub mod warehouse;

pub use module_fetch::{ignore_not_found, ModuleNames, PACKAGE_MARKER};
pub use object_store::{MemoryStore, ObjectStorage, ObjectStore, PrefixListing, S3Store};
pub use ssh_tunnel::{SshTunnelService, TunnelHandle};
pub use warehouse::{DbSession, WarehouseService};
