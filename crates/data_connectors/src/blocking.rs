//! Synchronous wrappers over the async connectors.
//!
//! [`Connectors`] owns a tokio runtime and runs each call to completion.
//! Do not use it from inside another tokio runtime.

use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{
    DbCredentials, StorageConfig, Table, TabularFormat, TabularOptions, TunnelConfig,
};
use crate::services::{ObjectStorage, ObjectStore, WarehouseService};

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entry point for blocking callers.
pub struct Connectors {
    runtime: Arc<tokio::runtime::Runtime>,
}

impl Connectors {
    /// Create the runtime used by every call.
    pub fn new() -> ConnectorResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| ConnectorError::internal(format!("Failed to create tokio runtime: {e}")))?;

        tracing::debug!("Blocking connectors initialized");
        Ok(Self { runtime: Arc::new(runtime) })
    }

    /// Run `query` against the warehouse, optionally through an SSH tunnel.
    pub fn execute(
        &self,
        query: &str,
        credentials: &DbCredentials,
        tunnel: Option<&TunnelConfig>,
    ) -> ConnectorResult<Table> {
        self.runtime.block_on(WarehouseService::execute(query, credentials, tunnel))
    }

    /// Connect an object storage client bound to the configured bucket.
    pub fn storage(&self, config: StorageConfig) -> ConnectorResult<BlockingStorage> {
        let inner = self.runtime.block_on(ObjectStorage::connect(config))?;
        Ok(BlockingStorage { runtime: self.runtime.clone(), inner })
    }

    /// Bind an existing backend to a bucket.
    pub fn storage_with(
        &self,
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> BlockingStorage {
        BlockingStorage {
            runtime: self.runtime.clone(),
            inner: ObjectStorage::with_store(store, bucket),
        }
    }
}

impl std::fmt::Debug for Connectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connectors").finish_non_exhaustive()
    }
}

/// Blocking object storage client.
#[derive(Debug)]
pub struct BlockingStorage {
    runtime: Arc<tokio::runtime::Runtime>,
    inner: ObjectStorage,
}

impl BlockingStorage {
    /// Bucket this client is bound to.
    pub fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    /// See [`ObjectStorage::read_tabular`].
    pub fn read_tabular(
        &self,
        key: &str,
        format: TabularFormat,
        options: &TabularOptions,
    ) -> ConnectorResult<Table> {
        self.runtime.block_on(self.inner.read_tabular(key, format, options))
    }

    /// See [`ObjectStorage::upload`].
    pub fn upload(
        &self,
        local_path: impl AsRef<Path>,
        key: Option<&str>,
    ) -> ConnectorResult<String> {
        self.runtime.block_on(self.inner.upload(local_path, key))
    }

    /// See [`ObjectStorage::download`].
    pub fn download(&self, key: &str, local_path: impl AsRef<Path>) -> ConnectorResult<()> {
        self.runtime.block_on(self.inner.download(key, local_path))
    }

    /// See [`ObjectStorage::fetch_module`].
    pub fn fetch_module(&self, key_prefix: &str, file_name: &str) -> ConnectorResult<PathBuf> {
        self.runtime.block_on(self.inner.fetch_module(key_prefix, file_name))
    }

    /// See [`ObjectStorage::fetch_module_into`].
    pub fn fetch_module_into(
        &self,
        key_prefix: &str,
        file_name: &str,
        dest: impl AsRef<Path>,
    ) -> ConnectorResult<PathBuf> {
        self.runtime.block_on(self.inner.fetch_module_into(key_prefix, file_name, dest))
    }

    /// See [`ObjectStorage::list_prefix`].
    pub fn list_prefix(&self, prefix: &str) -> ConnectorResult<Option<Vec<String>>> {
        self.runtime.block_on(self.inner.list_prefix(prefix))
    }
}
