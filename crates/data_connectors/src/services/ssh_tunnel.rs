//! SSH tunnel for reaching a database behind a bastion host.
//!
//! The tunnel listens on a local endpoint and forwards every accepted
//! connection through a `direct-tcpip` channel to the remote bind endpoint.

use crate::error::{ConnectorError, ConnectorResult};
use crate::models::{Endpoint, SshAuth, TunnelConfig};

use async_trait::async_trait;
use russh::client;
use russh_keys::key::KeyPair;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handle to an active SSH tunnel.
///
/// Dropping the handle cancels forwarding; [`TunnelHandle::close`] also
/// waits for the SSH session to be disconnected.
pub struct TunnelHandle {
    id: Uuid,
    local: Endpoint,
    remote: Endpoint,
    cancel_token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TunnelHandle {
    /// Identifier used in log events for this tunnel.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Local endpoint the tunnel is listening on.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }

    /// Remote endpoint being tunneled to.
    pub fn remote_endpoint(&self) -> &Endpoint {
        &self.remote
    }

    /// Check if the tunnel has been asked to stop.
    pub fn is_closed(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Stop forwarding and disconnect the SSH session.
    pub async fn close(mut self) {
        self.cancel_token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(
                    tunnel_id = %self.id,
                    error = %e,
                    "SSH tunnel task ended abnormally"
                );
            }
        }
        tracing::info!(tunnel_id = %self.id, local = %self.local, "Closed SSH tunnel");
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

impl std::fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("id", &self.id)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("is_closed", &self.is_closed())
            .finish()
    }
}

/// SSH client handler for russh.
struct SshClientHandler;

#[async_trait]
impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // TODO: verify against known_hosts once a host key setting exists on TunnelConfig
        Ok(true)
    }
}

type SshHandle = client::Handle<SshClientHandler>;

/// Service for establishing SSH tunnels.
pub struct SshTunnelService;

impl SshTunnelService {
    /// Establish an SSH tunnel.
    ///
    /// Fails with a connection error when the SSH server or the local bind
    /// endpoint is unavailable, and with an authentication error when the
    /// server rejects the credentials.
    pub async fn open(config: &TunnelConfig) -> ConnectorResult<TunnelHandle> {
        let id = Uuid::new_v4();

        tracing::info!(
            tunnel_id = %id,
            ssh = %config.ssh_endpoint(),
            remote = %config.remote_bind,
            auth = config.auth.as_str(),
            "Establishing SSH tunnel"
        );

        let ssh_client = Self::connect_ssh(config).await?;
        let ssh_client = Arc::new(Mutex::new(ssh_client));

        let bind = &config.local_bind;
        let listener = TcpListener::bind((bind.host.as_str(), bind.port)).await.map_err(|e| {
            ConnectorError::connection_with_hint(
                format!("Failed to bind local endpoint {bind} for SSH tunnel: {e}"),
                "Try a different local port, or port 0 to let the system choose one",
            )
        })?;

        let local = Endpoint::new(bind.host.clone(), listener.local_addr()?.port());
        tracing::info!(
            tunnel_id = %id,
            local = %local,
            "Connected to SSH server, tunnel listening"
        );

        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(Self::run_tunnel(
            listener,
            ssh_client,
            config.remote_bind.clone(),
            id,
            cancel_token.clone(),
        ));

        Ok(TunnelHandle {
            id,
            local,
            remote: config.remote_bind.clone(),
            cancel_token,
            task: Some(task),
        })
    }

    /// Connect and authenticate to the SSH server.
    async fn connect_ssh(config: &TunnelConfig) -> ConnectorResult<SshHandle> {
        let ssh_config = Arc::new(client::Config::default());

        let mut handle = client::connect(
            ssh_config,
            (config.ssh_host.as_str(), config.ssh_port),
            SshClientHandler,
        )
        .await
        .map_err(|e| {
            ConnectorError::connection_with_hint(
                format!("Failed to connect to SSH server {}: {e}", config.ssh_endpoint()),
                "Verify the SSH server is running and reachable",
            )
        })?;

        let authenticated = match &config.auth {
            SshAuth::Password { password } => handle
                .authenticate_password(&config.username, password)
                .await
                .map_err(|e| {
                    ConnectorError::connection_with_source("SSH password authentication failed", e)
                })?,
            SshAuth::KeyFile { path, passphrase } => {
                let key = Self::load_private_key(path, passphrase.as_deref()).await?;
                handle.authenticate_publickey(&config.username, key).await.map_err(|e| {
                    ConnectorError::connection_with_source("SSH key authentication failed", e)
                })?
            }
        };

        if !authenticated {
            return Err(ConnectorError::authentication_with_hint(
                format!("SSH server rejected credentials for {}", config.username),
                "Check the SSH username and key or password",
            ));
        }

        tracing::debug!(
            username = %config.username,
            ssh = %config.ssh_endpoint(),
            "SSH authentication successful"
        );

        Ok(handle)
    }

    /// Load a private key from a file.
    async fn load_private_key(
        path: &Path,
        passphrase: Option<&str>,
    ) -> ConnectorResult<Arc<KeyPair>> {
        let key_data = tokio::fs::read(path).await.map_err(|e| {
            ConnectorError::invalid_argument(
                format!("Failed to read SSH key file '{}': {e}", path.display()),
                Some("Check that the key file exists and is readable"),
            )
        })?;

        let key = russh_keys::decode_secret_key(&String::from_utf8_lossy(&key_data), passphrase)
            .map_err(|e| match passphrase {
                Some(_) => ConnectorError::authentication_with_hint(
                    format!("Failed to decrypt SSH key: {e}"),
                    "Check your key passphrase is correct",
                ),
                None => ConnectorError::authentication_with_hint(
                    format!("Failed to parse SSH key: {e}"),
                    "The key may be encrypted - provide the passphrase",
                ),
            })?;

        Ok(Arc::new(key))
    }

    /// Run the accept loop until cancelled, then disconnect the session.
    async fn run_tunnel(
        listener: TcpListener,
        ssh_client: Arc<Mutex<SshHandle>>,
        remote: Endpoint,
        tunnel_id: Uuid,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((local_stream, peer_addr)) => {
                            tracing::debug!(
                                tunnel_id = %tunnel_id,
                                peer = %peer_addr,
                                "New tunnel connection"
                            );

                            let ssh_client = ssh_client.clone();
                            let remote = remote.clone();
                            let cancel = cancel_token.clone();

                            tokio::spawn(async move {
                                let forwarded = Self::forward_connection(
                                    local_stream,
                                    ssh_client,
                                    &remote,
                                    cancel,
                                )
                                .await;
                                if let Err(e) = forwarded {
                                    tracing::warn!(
                                        tunnel_id = %tunnel_id,
                                        error = %e,
                                        "Tunnel forwarding error"
                                    );
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(
                                tunnel_id = %tunnel_id,
                                error = %e,
                                "Failed to accept tunnel connection"
                            );
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }

        let handle = ssh_client.lock().await;
        if let Err(e) = handle.disconnect(russh::Disconnect::ByApplication, "", "en").await {
            tracing::debug!(tunnel_id = %tunnel_id, error = %e, "SSH disconnect failed");
        }
    }

    /// Forward a single connection through the SSH tunnel.
    async fn forward_connection(
        mut local_stream: TcpStream,
        ssh_client: Arc<Mutex<SshHandle>>,
        remote: &Endpoint,
        cancel_token: CancellationToken,
    ) -> ConnectorResult<()> {
        let channel = {
            let handle = ssh_client.lock().await;
            handle
                .channel_open_direct_tcpip(remote.host.as_str(), remote.port as u32, "127.0.0.1", 0)
                .await
                .map_err(|e| {
                    ConnectorError::connection_with_hint(
                        format!("Failed to open SSH channel to {remote}: {e}"),
                        "The SSH server may not allow TCP forwarding",
                    )
                })?
        };

        let mut channel = channel.into_stream();
        let mut buf_local = [0u8; 8192];
        let mut buf_remote = [0u8; 8192];

        loop {
            tokio::select! {
                n = local_stream.read(&mut buf_local) => {
                    match n {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if channel.write_all(&buf_local[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                n = channel.read(&mut buf_remote) => {
                    match n {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if local_stream.write_all(&buf_remote[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }

        Ok(())
    }
}
