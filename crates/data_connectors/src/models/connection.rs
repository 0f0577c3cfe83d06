//! Warehouse connection and SSH tunnel parameters.
//!
//! Passwords live in these structs only for the duration of a call and are
//! redacted from `Debug` output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

const REDACTED: &str = "<redacted>";

/// SSL mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// No SSL
    Disable,
    /// Use SSL without certificate verification (default)
    #[default]
    Prefer,
    /// Require SSL with certificate verification
    Require,
}

impl SslMode {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require => "require",
        }
    }
}

/// A host/port pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create a new endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Database connection fields, passed verbatim to the driver.
#[derive(Clone, Serialize, Deserialize)]
pub struct DbCredentials {
    /// Database name
    pub database: String,
    /// Login username
    pub user: String,
    /// Login password
    pub password: String,
    /// Server hostname or IP (ignored when tunneling)
    pub host: String,
    /// Server port (ignored when tunneling)
    pub port: u16,
    /// SSL configuration
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Application name reported to the server
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_application_name() -> String {
    "data_connectors".to_string()
}

impl DbCredentials {
    /// Create credentials with the default port 5432 and options.
    pub fn new(
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            user: user.into(),
            password: password.into(),
            host: host.into(),
            port: 5432,
            ssl_mode: SslMode::default(),
            connect_timeout_secs: default_connect_timeout(),
            application_name: default_application_name(),
        }
    }

    /// Set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the SSL mode.
    pub fn with_ssl_mode(mut self, ssl_mode: SslMode) -> Self {
        self.ssl_mode = ssl_mode;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// The database endpoint as configured.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }
}

impl fmt::Debug for DbCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentials")
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// SSH authentication method. Exactly one per tunnel.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SshAuth {
    /// Private key file authentication
    KeyFile {
        /// Path to the private key file
        path: PathBuf,
        /// Passphrase for an encrypted key
        #[serde(default)]
        passphrase: Option<String>,
    },
    /// Password authentication
    Password {
        /// SSH password
        password: String,
    },
}

impl SshAuth {
    /// Key file authentication without a passphrase.
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Self::KeyFile { path: path.into(), passphrase: None }
    }

    /// Key file authentication with a passphrase.
    pub fn key_file_with_passphrase(
        path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self::KeyFile { path: path.into(), passphrase: Some(passphrase.into()) }
    }

    /// Password authentication.
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password { password: password.into() }
    }

    /// Short name for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyFile { .. } => "key",
            Self::Password { .. } => "password",
        }
    }
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyFile { path, passphrase } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| REDACTED))
                .finish(),
            Self::Password { .. } => {
                f.debug_struct("Password").field("password", &REDACTED).finish()
            }
        }
    }
}

/// SSH tunnel description for reaching a database behind a bastion host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// SSH server hostname
    pub ssh_host: String,
    /// SSH server port (default 22)
    pub ssh_port: u16,
    /// SSH username
    pub username: String,
    /// Authentication method
    pub auth: SshAuth,
    /// Database endpoint as seen from the SSH server
    pub remote_bind: Endpoint,
    /// Local endpoint the tunnel listens on (port 0 = OS assigned)
    pub local_bind: Endpoint,
}

impl TunnelConfig {
    /// Create a tunnel with default bind addresses (`localhost:5432` both sides).
    pub fn new(ssh_host: impl Into<String>, username: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            ssh_host: ssh_host.into(),
            ssh_port: 22,
            username: username.into(),
            auth,
            remote_bind: Endpoint::new("localhost", 5432),
            local_bind: Endpoint::new("localhost", 5432),
        }
    }

    /// Set the SSH port.
    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = port;
        self
    }

    /// Set the remote endpoint the tunnel forwards to.
    pub fn with_remote_bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.remote_bind = Endpoint::new(host, port);
        self
    }

    /// Set the local endpoint the tunnel listens on.
    pub fn with_local_bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.local_bind = Endpoint::new(host, port);
        self
    }

    /// The SSH server endpoint.
    pub fn ssh_endpoint(&self) -> Endpoint {
        Endpoint::new(self.ssh_host.clone(), self.ssh_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = DbCredentials::new("analytics", "etl", "hunter2", "warehouse.internal");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let auth = SshAuth::key_file_with_passphrase("/home/etl/.ssh/id_ed25519", "s3cret");
        let debug = format!("{auth:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("id_ed25519"));

        let debug = format!("{:?}", SshAuth::password("pa55"));
        assert!(!debug.contains("pa55"));
    }

    #[test]
    fn test_tunnel_defaults() {
        let tunnel = TunnelConfig::new("bastion.example.com", "ec2-user", SshAuth::password("x"));
        assert_eq!(tunnel.ssh_port, 22);
        assert_eq!(tunnel.remote_bind, Endpoint::new("localhost", 5432));
        assert_eq!(tunnel.local_bind, Endpoint::new("localhost", 5432));
        assert_eq!(tunnel.ssh_endpoint().to_string(), "bastion.example.com:22");
    }

    #[test]
    fn test_credentials_deserialize_with_defaults() {
        let creds: DbCredentials = serde_json::from_value(serde_json::json!({
            "database": "dev",
            "user": "admin",
            "password": "pw",
            "host": "cluster.redshift.amazonaws.com",
            "port": 5439
        }))
        .unwrap();
        assert_eq!(creds.port, 5439);
        assert_eq!(creds.ssl_mode, SslMode::Prefer);
        assert_eq!(creds.connect_timeout_secs, 10);
        assert_eq!(creds.endpoint().to_string(), "cluster.redshift.amazonaws.com:5439");
    }

    #[test]
    fn test_ssh_auth_tagged_serde() {
        let auth: SshAuth = serde_json::from_value(serde_json::json!({
            "type": "keyFile",
            "path": "/keys/id_rsa"
        }))
        .unwrap();
        assert_eq!(auth.as_str(), "key");
        match auth {
            SshAuth::KeyFile { passphrase, .. } => assert!(passphrase.is_none()),
            SshAuth::Password { .. } => panic!("expected key file auth"),
        }
    }

    #[test]
    fn test_ssl_mode_serde_names() {
        let mode: SslMode = serde_json::from_value(serde_json::json!("require")).unwrap();
        assert_eq!(mode, SslMode::Require);
        assert_eq!(mode.as_str(), "require");
    }
}
