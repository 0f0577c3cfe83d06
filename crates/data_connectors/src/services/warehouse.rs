//! Warehouse query execution, optionally through an SSH tunnel.
//!
//! Every call opens its own tunnel and connection and releases both before
//! returning, on success and on failure: the database connection first, then
//! the tunnel.

use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{DbCredentials, Endpoint, Row, SslMode, Table, TunnelConfig};
use crate::services::ssh_tunnel::SshTunnelService;

use chrono::Utc;
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Connection, NoTls, SimpleQueryMessage};
use uuid::Uuid;

/// Service for running one query against the warehouse.
pub struct WarehouseService;

impl WarehouseService {
    /// Run `query` and materialize the full result set.
    ///
    /// With a tunnel, the database is reached through the tunnel's local
    /// endpoint and `credentials.host`/`credentials.port` are ignored.
    pub async fn execute(
        query: &str,
        credentials: &DbCredentials,
        tunnel: Option<&TunnelConfig>,
    ) -> ConnectorResult<Table> {
        match tunnel {
            Some(tunnel_config) => {
                let tunnel = SshTunnelService::open(tunnel_config).await?;
                let result =
                    Self::query_once(query, credentials, Some(tunnel.local_endpoint())).await;
                tunnel.close().await;
                result
            }
            None => Self::query_once(query, credentials, None).await,
        }
    }

    async fn query_once(
        query: &str,
        credentials: &DbCredentials,
        endpoint: Option<&Endpoint>,
    ) -> ConnectorResult<Table> {
        let session = DbSession::connect(credentials, endpoint).await?;
        let result = session.query(query).await;
        session.close().await;
        result
    }

    /// Build the driver configuration for an endpoint.
    pub fn pg_config(credentials: &DbCredentials, endpoint: &Endpoint) -> tokio_postgres::Config {
        let mut pg_config = tokio_postgres::Config::new();
        pg_config
            .host(&endpoint.host)
            .port(endpoint.port)
            .dbname(&credentials.database)
            .user(&credentials.user)
            .password(&credentials.password)
            .application_name(&credentials.application_name)
            .connect_timeout(Duration::from_secs(credentials.connect_timeout_secs))
            .ssl_mode(match credentials.ssl_mode {
                SslMode::Disable => tokio_postgres::config::SslMode::Disable,
                SslMode::Prefer => tokio_postgres::config::SslMode::Prefer,
                SslMode::Require => tokio_postgres::config::SslMode::Require,
            });
        pg_config
    }
}

/// A single database connection.
///
/// Dropping the session without [`DbSession::close`] aborts the connection
/// task.
pub struct DbSession {
    id: Uuid,
    endpoint: Endpoint,
    client: Option<Client>,
    connection_task: Option<JoinHandle<()>>,
}

impl DbSession {
    /// Open a connection, to `endpoint` when given, else to the configured host.
    pub async fn connect(
        credentials: &DbCredentials,
        endpoint: Option<&Endpoint>,
    ) -> ConnectorResult<Self> {
        let id = Uuid::new_v4();
        let endpoint = endpoint.cloned().unwrap_or_else(|| credentials.endpoint());
        let pg_config = WarehouseService::pg_config(credentials, &endpoint);

        let (client, connection_task) = match credentials.ssl_mode {
            SslMode::Disable => {
                let (client, connection) = pg_config.connect(NoTls).await?;
                (client, spawn_connection(id, connection))
            }
            SslMode::Prefer => {
                // Encrypt when the server offers TLS, without certificate verification
                let connector = TlsConnector::builder()
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true)
                    .build()
                    .map_err(tls_error)?;
                let (client, connection) =
                    pg_config.connect(MakeTlsConnector::new(connector)).await?;
                (client, spawn_connection(id, connection))
            }
            SslMode::Require => {
                let connector = TlsConnector::builder().build().map_err(tls_error)?;
                let (client, connection) =
                    pg_config.connect(MakeTlsConnector::new(connector)).await?;
                (client, spawn_connection(id, connection))
            }
        };

        tracing::info!(
            session_id = %id,
            endpoint = %endpoint,
            database = %credentials.database,
            ssl_mode = credentials.ssl_mode.as_str(),
            "Connected to database"
        );

        Ok(Self { id, endpoint, client: Some(client), connection_task: Some(connection_task) })
    }

    /// Endpoint this session is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Run a query and collect every row.
    pub async fn query(&self, sql: &str) -> ConnectorResult<Table> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ConnectorError::connection("Database session already closed"))?;
        let start = Instant::now();

        tracing::info!(session_id = %self.id, "Executing query");

        let result = async {
            let statement = client.prepare(sql).await?;
            let columns: Vec<String> =
                statement.columns().iter().map(|c| c.name().to_string()).collect();

            let rows = if statement.columns().iter().all(|c| has_binary_decoder(c.type_())) {
                let rows = client.query(&statement, &[]).await?;
                rows.iter().map(row_to_json).collect::<ConnectorResult<Vec<Row>>>()?
            } else {
                // The simple protocol returns every column in text format
                tracing::debug!(session_id = %self.id, "Reading result in text format");
                let types: Vec<Type> =
                    statement.columns().iter().map(|c| c.type_().clone()).collect();
                let mut rows = Vec::new();
                for message in client.simple_query(sql).await? {
                    if let SimpleQueryMessage::Row(row) = message {
                        rows.push(text_row(&types, &row)?);
                    }
                }
                rows
            };
            Ok::<_, ConnectorError>(Table::new(columns, rows))
        }
        .await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(table) => tracing::info!(
                session_id = %self.id,
                rows = table.row_count(),
                columns = table.column_count(),
                elapsed_ms,
                "Query completed"
            ),
            Err(e) => tracing::warn!(session_id = %self.id, elapsed_ms, error = %e, "Query failed"),
        }
        result
    }

    /// Close the connection and wait for the connection task to finish.
    pub async fn close(mut self) {
        // Dropping the client sends Terminate and lets the connection future resolve
        drop(self.client.take());
        if let Some(task) = self.connection_task.take() {
            let _ = task.await;
        }
        tracing::info!(session_id = %self.id, "Closed database connection");
    }
}

impl Drop for DbSession {
    fn drop(&mut self) {
        if let Some(task) = self.connection_task.take() {
            task.abort();
        }
    }
}

fn tls_error(e: native_tls::Error) -> ConnectorError {
    ConnectorError::connection_with_hint(
        format!("Failed to create TLS connector: {e}"),
        "Check your system's TLS configuration",
    )
}

fn spawn_connection<S, T>(session_id: Uuid, connection: Connection<S, T>) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::warn!(session_id = %session_id, error = %e, "Database connection error");
        }
    })
}

/// NUMERIC value decoded from the binary wire format into its decimal text.
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Decode a binary NUMERIC: header of ndigits, weight, sign and dscale
/// followed by base-10000 digit groups.
fn decode_numeric(raw: &[u8]) -> Result<String, Box<dyn std::error::Error + Sync + Send>> {
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }
    let read = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
    let ndigits = read(0) as usize;
    let weight = read(2) as i16 as i32;
    let sign = read(4);
    let dscale = read(6) as usize;

    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("numeric value truncated".into());
    }

    let digit = |group: i32| -> u16 {
        if group < 0 || group as usize >= ndigits {
            0
        } else {
            read(8 + 2 * group as usize)
        }
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for group in 1..=weight {
            out.push_str(&format!("{:04}", digit(group)));
        }
    }

    if dscale > 0 {
        let mut frac = String::with_capacity(dscale + 4);
        let mut group = weight + 1;
        while frac.len() < dscale {
            frac.push_str(&format!("{:04}", digit(group)));
            group += 1;
        }
        frac.truncate(dscale);
        out.push('.');
        out.push_str(&frac);
    }

    Ok(out)
}

fn cell<'a, T, F>(
    row: &'a tokio_postgres::Row,
    idx: usize,
    convert: F,
) -> ConnectorResult<JsonValue>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> JsonValue,
{
    let value = row.try_get::<_, Option<T>>(idx).map_err(|e| {
        ConnectorError::parse_with_source(
            format!("Failed to decode column '{}'", row.columns()[idx].name()),
            e,
        )
    })?;
    Ok(value.map(convert).unwrap_or(JsonValue::Null))
}

/// Whether [`row_to_json`] can decode the type from the binary format.
fn has_binary_decoder(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::BOOL
            | Type::INT2
            | Type::INT4
            | Type::INT8
            | Type::OID
            | Type::FLOAT4
            | Type::FLOAT8
            | Type::NUMERIC
            | Type::UUID
            | Type::JSON
            | Type::JSONB
            | Type::TIMESTAMPTZ
            | Type::TIMESTAMP
            | Type::DATE
            | Type::TIME
            | Type::INT4_ARRAY
            | Type::INT8_ARRAY
            | Type::TEXT_ARRAY
            | Type::VARCHAR_ARRAY
    ) || <String as FromSql>::accepts(ty)
}

/// Convert a text-format row, typing the scalars the text can represent.
fn text_row(types: &[Type], row: &tokio_postgres::SimpleQueryRow) -> ConnectorResult<Row> {
    types
        .iter()
        .enumerate()
        .map(|(i, ty)| {
            let text = row.try_get(i)?;
            Ok::<_, ConnectorError>(text.map_or(JsonValue::Null, |text| text_cell(ty, text)))
        })
        .collect()
}

fn text_cell(ty: &Type, text: &str) -> JsonValue {
    let string = || JsonValue::String(text.to_string());
    match *ty {
        Type::BOOL => match text {
            "t" => JsonValue::Bool(true),
            "f" => JsonValue::Bool(false),
            _ => string(),
        },
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            text.parse::<i64>().map(|v| JsonValue::Number(v.into())).unwrap_or_else(|_| string())
        }
        Type::FLOAT4 | Type::FLOAT8 => {
            text.parse::<f64>().map(float_cell).unwrap_or_else(|_| string())
        }
        Type::JSON | Type::JSONB => serde_json::from_str(text).unwrap_or_else(|_| string()),
        _ => string(),
    }
}

fn float_cell(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v).map(JsonValue::Number).unwrap_or(JsonValue::Null)
}

/// Convert a database row to cell values.
fn row_to_json(row: &tokio_postgres::Row) -> ConnectorResult<Row> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| match *col.type_() {
            Type::BOOL => cell(row, i, JsonValue::Bool),

            Type::INT2 => cell(row, i, |v: i16| JsonValue::Number(v.into())),
            Type::INT4 => cell(row, i, |v: i32| JsonValue::Number(v.into())),
            Type::INT8 => cell(row, i, |v: i64| JsonValue::Number(v.into())),
            Type::OID => cell(row, i, |v: u32| JsonValue::Number(v.into())),

            Type::FLOAT4 => cell(row, i, |v: f32| float_cell(v as f64)),
            Type::FLOAT8 => cell(row, i, float_cell),

            // Kept as text to preserve precision
            Type::NUMERIC => cell(row, i, |v: PgNumeric| JsonValue::String(v.0)),

            Type::UUID => cell(row, i, |v: Uuid| JsonValue::String(v.to_string())),

            Type::JSON | Type::JSONB => cell(row, i, |v: JsonValue| v),

            Type::TIMESTAMPTZ => {
                cell(row, i, |v: chrono::DateTime<Utc>| JsonValue::String(v.to_rfc3339()))
            }
            Type::TIMESTAMP => {
                cell(row, i, |v: chrono::NaiveDateTime| JsonValue::String(v.to_string()))
            }
            Type::DATE => cell(row, i, |v: chrono::NaiveDate| JsonValue::String(v.to_string())),
            Type::TIME => cell(row, i, |v: chrono::NaiveTime| JsonValue::String(v.to_string())),

            Type::INT4_ARRAY => cell(row, i, |v: Vec<i32>| {
                JsonValue::Array(v.into_iter().map(|x| JsonValue::Number(x.into())).collect())
            }),
            Type::INT8_ARRAY => cell(row, i, |v: Vec<i64>| {
                JsonValue::Array(v.into_iter().map(|x| JsonValue::Number(x.into())).collect())
            }),
            Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => cell(row, i, |v: Vec<String>| {
                JsonValue::Array(v.into_iter().map(JsonValue::String).collect())
            }),

            // Text-like types
            _ => cell(row, i, JsonValue::String),
        })
        .collect()
}
