//! Object storage connector.
//!
//! [`ObjectStorage`] binds a backend to one bucket and provides the tabular
//! read, transfer and listing operations. The backend sits behind the
//! [`ObjectStore`] trait: [`S3Store`] talks to S3 or an S3-compatible server,
//! [`MemoryStore`] keeps objects in process.

use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{StorageConfig, Table, TabularFormat, TabularOptions};
use crate::services::tabular;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Key separator used for prefix listings.
pub const SEPARATOR: char = '/';

const DEFAULT_REGION: &str = "us-east-1";

/// Storage backend operations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object body. Fails with a not-found error for a missing key.
    async fn get_object(&self, bucket: &str, key: &str) -> ConnectorResult<Vec<u8>>;

    /// Store an object body under `key`, replacing any existing object.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> ConnectorResult<()>;

    /// Store the contents of a local file under `key`.
    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> ConnectorResult<()> {
        let body = tokio::fs::read(path).await?;
        self.put_object(bucket, key, body).await
    }

    /// Keys starting with `prefix`, in key order. A single listing page.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> ConnectorResult<Vec<String>>;
}

// ============================================================================
// S3
// ============================================================================

/// S3 backend built on the AWS SDK.
#[derive(Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
}

impl S3Store {
    /// Build a client from the storage configuration.
    ///
    /// Without credentials the client sends unsigned requests, which only
    /// work against public buckets.
    pub async fn connect(config: &StorageConfig) -> Self {
        let region = RegionProviderChain::first_try(config.region.clone().map(Region::new))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));

        let loader = aws_config::defaults(BehaviorVersion::latest()).region(region);
        let loader = match &config.credentials {
            Some(keys) => loader.credentials_provider(Credentials::new(
                &keys.access_key_id,
                &keys.secret_access_key,
                None,
                None,
                "data_connectors",
            )),
            None => loader.no_credentials(),
        };
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::info!(
            bucket = %config.bucket,
            signed = config.is_signed(),
            endpoint = config.endpoint_url.as_deref().unwrap_or("default"),
            "S3 client initialized"
        );

        Self { client: aws_sdk_s3::Client::from_conf(builder.build()) }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_object(&self, bucket: &str, key: &str) -> ConnectorResult<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| sdk_error(e, &format!("s3://{bucket}/{key}")))?;

        let data = response.body.collect().await.map_err(|e| {
            ConnectorError::storage_with_source(
                format!("Failed to read body of s3://{bucket}/{key}"),
                e,
            )
        })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> ConnectorResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| sdk_error(e, &format!("s3://{bucket}/{key}")))?;
        Ok(())
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> ConnectorResult<()> {
        let body = ByteStream::from_path(path).await.map_err(|e| {
            ConnectorError::storage_with_source(
                format!("Failed to open '{}' for upload", path.display()),
                e,
            )
        })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error(e, &format!("s3://{bucket}/{key}")))?;
        Ok(())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> ConnectorResult<Vec<String>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(|e| sdk_error(e, &format!("s3://{bucket}/{prefix}")))?;

        if response.is_truncated().unwrap_or(false) {
            tracing::warn!(bucket = %bucket, prefix = %prefix, "Listing truncated to first page");
        }

        Ok(response.contents().iter().filter_map(|obj| obj.key().map(String::from)).collect())
    }
}

/// Map an SDK failure onto the error taxonomy.
fn sdk_error<E, R>(err: SdkError<E, R>, target: &str) -> ConnectorError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    if matches!(err, SdkError::DispatchFailure(_) | SdkError::TimeoutError(_)) {
        return ConnectorError::connection_with_hint(
            format!("Failed to reach object storage for {target}: {}", DisplayErrorContext(&err)),
            "Check network access and the endpoint URL",
        );
    }

    match err.code() {
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound") => {
            ConnectorError::not_found(format!("{target} does not exist"))
        }
        Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
            ConnectorError::authentication_with_hint(
                format!("Access denied to {target}: {}", DisplayErrorContext(&err)),
                "Check the access keys, or whether the bucket allows anonymous reads",
            )
        }
        _ => ConnectorError::storage(
            format!("Request for {target} failed: {}", DisplayErrorContext(&err)),
            None,
        ),
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-process backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.into());
    }

    /// All keys stored in a bucket.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .read()
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> ConnectorResult<Vec<u8>> {
        self.buckets
            .read()
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| ConnectorError::not_found(format!("s3://{bucket}/{key} does not exist")))
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> ConnectorResult<()> {
        self.insert(bucket, key, body);
        Ok(())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> ConnectorResult<Vec<String>> {
        let buckets = self.buckets.read();
        let Some(objects) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

// ============================================================================
// Listing
// ============================================================================

/// Immediate children of a prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixListing {
    /// Child "directories", each ending with the separator, deduplicated
    pub directories: Vec<String>,
    /// Child objects, relative to the prefix
    pub files: Vec<String>,
}

impl PrefixListing {
    /// Ensure a non-empty prefix ends with the separator.
    pub fn normalize_prefix(prefix: &str) -> String {
        if prefix.is_empty() || prefix.ends_with(SEPARATOR) {
            prefix.to_string()
        } else {
            format!("{prefix}{SEPARATOR}")
        }
    }

    /// Partition listed keys into directories and files.
    ///
    /// `prefix` must already be normalized. Returns None when no keys were
    /// listed at all; a lone directory marker yields an empty listing.
    pub fn from_keys<I, S>(prefix: &str, keys: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut listing = Self::default();
        let mut seen = HashSet::new();
        let mut any = false;

        for key in keys {
            any = true;
            let Some(relative) = key.as_ref().strip_prefix(prefix) else {
                continue;
            };
            if relative.is_empty() {
                continue;
            }
            match relative.split_once(SEPARATOR) {
                Some((dir, _)) => {
                    let dir = format!("{dir}{SEPARATOR}");
                    if seen.insert(dir.clone()) {
                        listing.directories.push(dir);
                    }
                }
                None => listing.files.push(relative.to_string()),
            }
        }

        any.then_some(listing)
    }

    /// Directories followed by files.
    pub fn entries(self) -> Vec<String> {
        let mut entries = self.directories;
        entries.extend(self.files);
        entries
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Object storage client bound to one bucket.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage").field("bucket", &self.bucket).finish_non_exhaustive()
    }
}

impl ObjectStorage {
    /// Connect to S3 (or a compatible server) using the configuration.
    pub async fn connect(config: StorageConfig) -> ConnectorResult<Self> {
        if config.bucket.trim().is_empty() {
            return Err(ConnectorError::invalid_argument("Bucket name is empty", None));
        }
        let store = S3Store::connect(&config).await;
        Ok(Self::with_store(Arc::new(store), config.bucket))
    }

    /// Bind an existing backend to a bucket.
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self { store, bucket: bucket.into() }
    }

    /// Bucket this client is bound to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub(crate) fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    /// Fetch an object and decode it as a table.
    ///
    /// The body is read fully before parsing; a decoding failure never
    /// yields a partial table.
    pub async fn read_tabular(
        &self,
        key: &str,
        format: TabularFormat,
        options: &TabularOptions,
    ) -> ConnectorResult<Table> {
        let start = Instant::now();
        let body = self.store.get_object(&self.bucket, key).await?;
        let bytes = body.len();
        let table = tabular::parse(format, body, options)?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            bytes,
            rows = table.row_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Read tabular object"
        );
        Ok(table)
    }

    /// Fetch a CSV object as a table.
    pub async fn read_csv(&self, key: &str, options: &TabularOptions) -> ConnectorResult<Table> {
        self.read_tabular(key, TabularFormat::Csv, options).await
    }

    /// Fetch a spreadsheet object as a table.
    pub async fn read_spreadsheet(
        &self,
        key: &str,
        options: &TabularOptions,
    ) -> ConnectorResult<Table> {
        self.read_tabular(key, TabularFormat::Spreadsheet, options).await
    }

    /// Upload a local file. Every space in the key becomes a hyphen,
    /// including leading and trailing ones.
    ///
    /// Returns the key the object was stored under.
    pub async fn upload(
        &self,
        local_path: impl AsRef<Path>,
        key: Option<&str>,
    ) -> ConnectorResult<String> {
        let local_path = local_path.as_ref();
        let key = match key {
            Some(k) if !k.trim().is_empty() => normalize_key(k),
            _ => {
                return Err(ConnectorError::invalid_argument(
                    format!("Cannot upload '{}' without a key", local_path.display()),
                    Some("Specify the destination key"),
                ))
            }
        };

        self.store.put_file(&self.bucket, &key, local_path).await?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            path = %local_path.display(),
            "Uploaded file"
        );
        Ok(key)
    }

    /// Download an object to a local file.
    ///
    /// The parent directory of `local_path` must already exist.
    pub async fn download(&self, key: &str, local_path: impl AsRef<Path>) -> ConnectorResult<()> {
        let local_path = local_path.as_ref();
        ensure_parent_dir(local_path)?;

        let body = self.store.get_object(&self.bucket, key).await?;
        tokio::fs::write(local_path, &body).await?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            path = %local_path.display(),
            bytes = body.len(),
            "Downloaded object"
        );
        Ok(())
    }

    /// Immediate children of `prefix`: directories (with a trailing
    /// separator) followed by files.
    ///
    /// Returns None when nothing is stored under the prefix.
    pub async fn list_prefix(&self, prefix: &str) -> ConnectorResult<Option<Vec<String>>> {
        let prefix = PrefixListing::normalize_prefix(prefix);
        let keys = self.store.list_keys(&self.bucket, &prefix).await?;
        let listing = PrefixListing::from_keys(&prefix, &keys);

        match &listing {
            Some(l) => tracing::debug!(
                bucket = %self.bucket,
                prefix = %prefix,
                directories = l.directories.len(),
                files = l.files.len(),
                "Listed prefix"
            ),
            None => tracing::debug!(bucket = %self.bucket, prefix = %prefix, "Prefix not found"),
        }

        Ok(listing.map(PrefixListing::entries))
    }
}

fn normalize_key(key: &str) -> String {
    key.replace(' ', "-")
}

/// Fail unless the directory that will hold `path` exists.
pub(crate) fn ensure_parent_dir(path: &Path) -> ConnectorResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.is_dir() => {
            Err(ConnectorError::invalid_argument(
                format!("Local directory '{}' does not exist", parent.display()),
                Some("Create the directory before downloading"),
            ))
        }
        _ => Ok(()),
    }
}
