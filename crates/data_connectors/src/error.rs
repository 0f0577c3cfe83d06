//! Error types for the warehouse and object storage connectors.
//!
//! Every failure surfaced by the client libraries is mapped onto one
//! [`ConnectorError`] category so callers can branch on it programmatically.

use thiserror::Error;

/// Result alias used across the crate.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Main error type for connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Network, tunnel or database endpoint unreachable.
    #[error("Connection error: {message}")]
    Connection {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Credentials rejected by the SSH server or the database.
    #[error("Authentication error: {message}")]
    Authentication {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// Query rejected by the database engine, surfaced verbatim.
    #[error("{message}")]
    Query {
        /// Engine error message.
        message: String,
        /// Additional detail from the engine.
        detail: Option<String>,
        /// Engine hint.
        hint: Option<String>,
        /// Position in query (1-indexed).
        position: Option<usize>,
        /// SQLSTATE code (e.g., "42P01").
        code: Option<String>,
    },

    /// Missing object key, prefix or local artifact.
    #[error("Not found: {message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
    },

    /// Content could not be decoded in the requested format.
    #[error("Parse error: {message}")]
    Parse {
        /// Human-readable error message.
        message: String,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A precondition on the caller's arguments was not met.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
    },

    /// Object store or local filesystem failure.
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message.
        message: String,
        /// Actionable hint for the user.
        hint: Option<String>,
        /// Optional underlying error source.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Unexpected internal error.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
    },
}

impl ConnectorError {
    // ========== Constructors ==========

    /// Create a new connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), hint: None, source: None }
    }

    /// Create a new connection error with an actionable hint.
    pub fn connection_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), hint: Some(hint.into()), source: None }
    }

    /// Create a new connection error with source.
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), hint: None, source: Some(Box::new(source)) }
    }

    /// Create a new authentication error with custom hint.
    pub fn authentication_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Authentication { message: message.into(), hint: Some(hint.into()) }
    }

    /// Create a new query error with full engine details.
    pub fn query(
        message: impl Into<String>,
        detail: Option<String>,
        hint: Option<String>,
        position: Option<usize>,
        code: Option<String>,
    ) -> Self {
        Self::Query { message: message.into(), detail, hint, position, code }
    }

    /// Create a new not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Create a new parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse { message: message.into(), source: None }
    }

    /// Create a new parse error with source.
    pub fn parse_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Parse { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a new invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::InvalidArgument { message: message.into(), hint: hint.map(String::from) }
    }

    /// Create a new storage error.
    pub fn storage(message: impl Into<String>, hint: Option<&str>) -> Self {
        Self::Storage { message: message.into(), hint: hint.map(String::from), source: None }
    }

    /// Create a new storage error with source.
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage { message: message.into(), hint: None, source: Some(Box::new(source)) }
    }

    /// Create a new internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    // ========== Methods ==========

    /// Check if this error is a missing key, prefix or file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is an unmet argument precondition.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }

    /// Get the error category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "Connection",
            Self::Authentication { .. } => "Authentication",
            Self::Query { .. } => "Query",
            Self::NotFound { .. } => "NotFound",
            Self::Parse { .. } => "Parse",
            Self::InvalidArgument { .. } => "InvalidArgument",
            Self::Storage { .. } => "Storage",
            Self::Internal { .. } => "Internal",
        }
    }

    /// Get actionable hint for the user.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Connection { hint, .. } => {
                hint.as_deref().or(Some("Check that the server is running and reachable"))
            }
            Self::Authentication { hint, .. } => hint.as_deref(),
            Self::Query { hint, .. } => hint.as_deref(),
            Self::NotFound { .. } => Some("Check the bucket, key and prefix spelling"),
            Self::Parse { .. } => Some("Check the format and parser options"),
            Self::InvalidArgument { hint, .. } => hint.as_deref(),
            Self::Storage { hint, .. } => hint.as_deref(),
            Self::Internal { .. } => Some("Please report this issue"),
        }
    }

    /// Get SQLSTATE code (if applicable).
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get position in query (if applicable).
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Query { position, .. } => *position,
            _ => None,
        }
    }

    /// Convert to user-displayable error info.
    pub fn to_error_info(&self) -> ErrorInfo {
        let error_type = format!("{} Error", self.category());
        let message = self.to_string();
        let hint = self.hint().map(String::from);

        let technical_detail = match self {
            Self::Query { detail, code, position, .. } => {
                let mut parts = Vec::new();
                if let Some(code) = code {
                    parts.push(format!("Code: {code}"));
                }
                if let Some(pos) = position {
                    parts.push(format!("Position: {pos}"));
                }
                if let Some(detail) = detail {
                    parts.push(format!("Detail: {detail}"));
                }
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            Self::Connection { source: Some(source), .. }
            | Self::Parse { source: Some(source), .. }
            | Self::Storage { source: Some(source), .. } => Some(source.to_string()),
            _ => None,
        };

        ErrorInfo { error_type, message, hint, technical_detail }
    }
}

/// User-displayable error information.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Category name (e.g., "Connection Error").
    pub error_type: String,
    /// User-friendly message.
    pub message: String,
    /// Actionable suggestion.
    pub hint: Option<String>,
    /// Technical detail from the underlying library.
    pub technical_detail: Option<String>,
}

// ========== Error Conversions ==========

/// Convert from tokio_postgres::Error to ConnectorError.
impl From<tokio_postgres::Error> for ConnectorError {
    fn from(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = db_err.message().to_string();
            let detail = db_err.detail().map(String::from);
            let hint = db_err.hint().map(String::from);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos as usize),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });
            let code = db_err.code().code().to_string();
            let code_str = code.as_str();

            return match code_str {
                "28P01" => ConnectorError::Authentication {
                    message,
                    hint: Some("Invalid password - check your credentials".to_string()),
                },
                // Invalid authorization specification (28000) and friends
                _ if code_str.starts_with("28") => ConnectorError::Authentication {
                    message,
                    hint: Some(
                        "Authentication failed - check username and permissions".to_string(),
                    ),
                },
                // Database does not exist
                "3D000" => ConnectorError::Connection {
                    message,
                    hint: Some("Check the database name".to_string()),
                    source: Some(Box::new(err)),
                },
                _ if code_str.starts_with("08") => {
                    ConnectorError::Connection { message, hint: None, source: Some(Box::new(err)) }
                }
                _ => ConnectorError::Query {
                    message,
                    detail,
                    hint,
                    position,
                    code: Some(code_str.to_string()),
                },
            };
        }

        if err.is_closed() {
            return ConnectorError::Connection {
                message: "Connection closed".to_string(),
                hint: None,
                source: Some(Box::new(err)),
            };
        }

        ConnectorError::Connection {
            message: err.to_string(),
            hint: None,
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from russh::Error to ConnectorError.
impl From<russh::Error> for ConnectorError {
    fn from(err: russh::Error) -> Self {
        ConnectorError::Connection {
            message: format!("SSH error: {err}"),
            hint: Some("Verify the SSH server is running and reachable".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from std::io::Error to ConnectorError.
impl From<std::io::Error> for ConnectorError {
    fn from(err: std::io::Error) -> Self {
        ConnectorError::Storage {
            message: err.to_string(),
            hint: Some("Check file permissions and disk space".to_string()),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from csv::Error to ConnectorError.
impl From<csv::Error> for ConnectorError {
    fn from(err: csv::Error) -> Self {
        let message = match err.position() {
            Some(pos) => format!("Invalid CSV at line {}: {err}", pos.line()),
            None => format!("Invalid CSV: {err}"),
        };
        ConnectorError::Parse { message, source: Some(Box::new(err)) }
    }
}

/// Convert from calamine::Error to ConnectorError.
impl From<calamine::Error> for ConnectorError {
    fn from(err: calamine::Error) -> Self {
        ConnectorError::Parse {
            message: format!("Invalid spreadsheet: {err}"),
            source: Some(Box::new(err)),
        }
    }
}

/// Convert from serde_json::Error to ConnectorError.
impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::InvalidArgument {
            message: format!("Invalid options: {err}"),
            hint: Some("Check option names and value types".to_string()),
        }
    }
}
