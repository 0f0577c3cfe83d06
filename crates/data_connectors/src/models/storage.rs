//! Object storage client configuration and tabular read options.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static access key pair for signed requests.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccessKeys {
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
}

impl AccessKeys {
    /// Create an access key pair.
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self { access_key_id: access_key_id.into(), secret_access_key: secret_access_key.into() }
    }
}

impl fmt::Debug for AccessKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a short key prefix is ever shown
        let shown: String = self.access_key_id.chars().take(4).collect();
        f.debug_struct("AccessKeys")
            .field("access_key_id", &format!("{shown}..."))
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Configuration for an object storage client bound to one bucket.
///
/// Without `credentials` the client runs unsigned, which only works for
/// public buckets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket name
    pub bucket: String,
    /// Signing credentials (None = anonymous)
    #[serde(default)]
    pub credentials: Option<AccessKeys>,
    /// Region override (falls back to the environment, then `us-east-1`)
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible servers
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Use path-style addressing (required by MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

impl StorageConfig {
    /// Anonymous configuration for a public bucket.
    pub fn anonymous(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            credentials: None,
            region: None,
            endpoint_url: None,
            force_path_style: false,
        }
    }

    /// Signed configuration using static keys.
    pub fn signed(bucket: impl Into<String>, credentials: AccessKeys) -> Self {
        Self { credentials: Some(credentials), ..Self::anonymous(bucket) }
    }

    /// Set the region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Point the client at an S3-compatible endpoint with path-style addressing.
    pub fn with_endpoint(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self.force_path_style = true;
        self
    }

    /// Check whether requests will be signed.
    pub fn is_signed(&self) -> bool {
        self.credentials.is_some()
    }
}

/// Supported tabular object formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabularFormat {
    /// Delimited text
    Csv,
    /// Excel or OpenDocument workbook (detected from content)
    Spreadsheet,
}

impl TabularFormat {
    /// Guess the format from a key's extension.
    pub fn from_key(key: &str) -> Option<Self> {
        let ext = key.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "tsv" | "txt" => Some(Self::Csv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Spreadsheet),
            _ => None,
        }
    }
}

/// Worksheet selection for spreadsheet reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SheetSelector {
    /// Zero-based sheet position
    Index(usize),
    /// Sheet name
    Name(String),
}

impl Default for SheetSelector {
    fn default() -> Self {
        Self::Index(0)
    }
}

/// Parser settings forwarded to the CSV or spreadsheet reader.
///
/// Deserializes from a JSON object, so orchestration code can forward a
/// free-form option map; unknown keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TabularOptions {
    /// Field delimiter (CSV only)
    pub delimiter: char,
    /// Quote character (CSV only)
    pub quote: char,
    /// Whether the first row holds column names
    pub has_headers: bool,
    /// Rows to skip before the header
    pub skip_rows: usize,
    /// Maximum number of data rows to keep
    pub max_rows: Option<usize>,
    /// Worksheet to read (spreadsheet only)
    pub sheet: SheetSelector,
    /// Convert numeric and boolean text to typed values (CSV only)
    pub infer_types: bool,
    /// Cell texts treated as null
    pub null_values: Vec<String>,
}

impl Default for TabularOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            has_headers: true,
            skip_rows: 0,
            max_rows: None,
            sheet: SheetSelector::default(),
            infer_types: true,
            null_values: vec![String::new(), "NULL".to_string(), "NaN".to_string()],
        }
    }
}

impl TabularOptions {
    /// Parse options from a JSON object.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Set the delimiter.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set whether the first row is a header.
    pub fn with_headers(mut self, has_headers: bool) -> Self {
        self.has_headers = has_headers;
        self
    }

    /// Select a worksheet by name.
    pub fn with_sheet_name(mut self, name: impl Into<String>) -> Self {
        self.sheet = SheetSelector::Name(name.into());
        self
    }

    /// Select a worksheet by position.
    pub fn with_sheet_index(mut self, index: usize) -> Self {
        self.sheet = SheetSelector::Index(index);
        self
    }

    /// Skip leading rows.
    pub fn with_skip_rows(mut self, rows: usize) -> Self {
        self.skip_rows = rows;
        self
    }

    /// Limit the number of data rows.
    pub fn with_max_rows(mut self, rows: usize) -> Self {
        self.max_rows = Some(rows);
        self
    }

    /// Keep every cell as text.
    pub fn without_type_inference(mut self) -> Self {
        self.infer_types = false;
        self
    }

    /// Check whether a cell text is configured as null.
    pub fn is_null(&self, text: &str) -> bool {
        self.null_values.iter().any(|v| v == text)
    }
}
