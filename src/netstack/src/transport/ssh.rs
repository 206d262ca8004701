//! russh-backed session transport.
use super::trust::{self, HostTrust};
use super::{Credentials, Endpoint, FileKind, Session, SessionMode, SessionTransport};
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Terminal size requested for interactive shells; wide enough that router
/// output is not wrapped.
const PTY_COLUMNS: u32 = 200;
const PTY_ROWS: u32 = 48;

pub struct SshTransport {
    connect_timeout: Duration,
    trust: HostTrust,
}

impl SshTransport {
    pub fn new(connect_timeout: Duration, trust: HostTrust) -> Self {
        Self {
            connect_timeout,
            trust,
        }
    }

    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Handle<TrustHandler>> {
        let config = Arc::new(client::Config::default());
        let rejected = Arc::new(AtomicBool::new(false));
        let handler = TrustHandler {
            host: endpoint.to_string(),
            trust: self.trust.clone(),
            rejected: rejected.clone(),
        };

        let attempt = async {
            let mut handle =
                client::connect(config, (endpoint.host.as_str(), endpoint.port), handler)
                    .await
                    .map_err(|e| {
                        if rejected.load(Ordering::SeqCst) {
                            trust::rejected(&endpoint.to_string())
                        } else {
                            ProvisionError::Connect(format!("{}: {}", endpoint, e))
                        }
                    })?;

            let auth = handle
                .authenticate_password(credentials.username.clone(), credentials.password.clone())
                .await
                .map_err(|e| ProvisionError::Connect(format!("{}: {}", endpoint, e)))?;
            if !auth.success() {
                return Err(ProvisionError::Connect(format!(
                    "{}: authentication failed for user '{}'",
                    endpoint, credentials.username
                )));
            }
            Ok(handle)
        };

        tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| {
                ProvisionError::Connect(format!(
                    "{}: timed out after {}s",
                    endpoint,
                    self.connect_timeout.as_secs()
                ))
            })?
    }
}

#[async_trait]
impl SessionTransport for SshTransport {
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        mode: SessionMode,
    ) -> Result<Box<dyn Session>> {
        tracing::debug!("[SshTransport] Opening {:?} session to {}", mode, endpoint);
        let handle = self.connect(endpoint, credentials).await?;

        let shell = match mode {
            SessionMode::SingleCommand => None,
            SessionMode::Interactive => {
                let channel = handle
                    .channel_open_session()
                    .await
                    .map_err(|e| session_error(endpoint, "open shell channel", e))?;
                channel
                    .request_pty(false, "vt100", PTY_COLUMNS, PTY_ROWS, 0, 0, &[])
                    .await
                    .map_err(|e| session_error(endpoint, "request pty", e))?;
                channel
                    .request_shell(false)
                    .await
                    .map_err(|e| session_error(endpoint, "request shell", e))?;
                tracing::info!("[SshTransport] Interactive session established to {}", endpoint);
                Some(channel)
            }
        };

        Ok(Box::new(SshSession {
            endpoint: endpoint.clone(),
            mode,
            handle: Some(handle),
            shell,
            pending: Vec::new(),
        }))
    }
}

pub struct TrustHandler {
    host: String,
    trust: HostTrust,
    rejected: Arc<AtomicBool>,
}

impl client::Handler for TrustHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let fingerprint = server_public_key
            .fingerprint(russh::keys::HashAlg::Sha256)
            .to_string();
        let accepted = self.trust.verify(&self.host, &fingerprint);
        if !accepted {
            self.rejected.store(true, Ordering::SeqCst);
        }
        Ok(accepted)
    }
}

pub struct SshSession {
    endpoint: Endpoint,
    mode: SessionMode,
    handle: Option<Handle<TrustHandler>>,
    shell: Option<Channel<Msg>>,
    /// Bytes received beyond the last read's ceiling.
    pending: Vec<u8>,
}

impl SshSession {
    fn handle(&self) -> Result<&Handle<TrustHandler>> {
        self.handle
            .as_ref()
            .ok_or_else(|| ProvisionError::Session(format!("session to {} is closed", self.endpoint)))
    }

    fn shell(&mut self) -> Result<&mut Channel<Msg>> {
        let endpoint = self.endpoint.clone();
        self.shell.as_mut().ok_or_else(|| {
            ProvisionError::Session(format!("session to {} has no interactive shell", endpoint))
        })
    }

    async fn sftp(&self) -> Result<SftpSession> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| transfer_error(&self.endpoint, "open sftp channel", e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| transfer_error(&self.endpoint, "request sftp subsystem", e))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| transfer_error(&self.endpoint, "start sftp", e))
    }
}

#[async_trait]
impl Session for SshSession {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn mode(&self) -> SessionMode {
        self.mode
    }

    async fn exec(&mut self, command: &str) -> Result<String> {
        tracing::debug!("[SshSession] {} $ {}", self.endpoint, command);
        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| session_error(&self.endpoint, "open exec channel", e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| session_error(&self.endpoint, "exec", e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == 1 => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                _ => {}
            }
        }

        let stdout = String::from_utf8_lossy(&stdout).to_string();
        match exit_status {
            Some(0) => Ok(stdout),
            status => Err(ProvisionError::Execution {
                command: command.to_string(),
                // No exit status means the remote side died or was signalled.
                status: status.unwrap_or(255),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            }),
        }
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        let endpoint = self.endpoint.clone();
        self.shell()?
            .data(text.as_bytes())
            .await
            .map_err(|e| session_error(&endpoint, "send", e))
    }

    async fn recv(&mut self, max_bytes: usize, idle: Duration) -> Result<String> {
        let mut buffer = std::mem::take(&mut self.pending);
        let shell = self.shell()?;

        while buffer.len() < max_bytes {
            match tokio::time::timeout(idle, shell.wait()).await {
                Ok(Some(ChannelMsg::Data { ref data })) => buffer.extend_from_slice(data),
                Ok(Some(ChannelMsg::ExtendedData { ref data, .. })) => {
                    buffer.extend_from_slice(data)
                }
                Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) | Ok(None) => break,
                Ok(Some(_)) => {}
                // Quiet for `idle`: this read is done.
                Err(_) => break,
            }
        }

        if buffer.len() > max_bytes {
            self.pending = buffer.split_off(max_bytes);
        }
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    async fn stat(&mut self, path: &str) -> Result<Option<FileKind>> {
        let sftp = self.sftp().await?;
        let kind = match sftp.metadata(path).await {
            Ok(attrs) => Ok(Some(
                attrs.permissions.map(FileKind::from_mode).unwrap_or(FileKind::Other),
            )),
            Err(e) if is_missing(&e) => {
                tracing::debug!("[SshSession] {} absent on {}", path, self.endpoint);
                Ok(None)
            }
            Err(e) => Err(transfer_error(&self.endpoint, &format!("stat {}", path), e)),
        };
        let _ = sftp.close().await;
        kind
    }

    async fn put_file(&mut self, local: &Path, remote: &str) -> Result<()> {
        let data = tokio::fs::read(local).await.map_err(|e| {
            ProvisionError::Transfer(format!("read {}: {}", local.display(), e))
        })?;
        let sftp = self.sftp().await?;
        let mut file = sftp
            .create(remote)
            .await
            .map_err(|e| transfer_error(&self.endpoint, remote, e))?;
        file.write_all(&data)
            .await
            .map_err(|e| transfer_error(&self.endpoint, remote, e))?;
        file.shutdown()
            .await
            .map_err(|e| transfer_error(&self.endpoint, remote, e))?;
        let _ = sftp.close().await;
        tracing::info!(
            "[SshSession] Copied {} -> {}:{} ({} bytes)",
            local.display(),
            self.endpoint,
            remote,
            data.len()
        );
        Ok(())
    }

    async fn get_file(&mut self, remote: &str, local: &Path) -> Result<()> {
        let sftp = self.sftp().await?;
        let mut file = sftp
            .open(remote)
            .await
            .map_err(|e| transfer_error(&self.endpoint, remote, e))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .await
            .map_err(|e| transfer_error(&self.endpoint, remote, e))?;
        let _ = sftp.close().await;
        tokio::fs::write(local, &data).await.map_err(|e| {
            ProvisionError::Transfer(format!("write {}: {}", local.display(), e))
        })?;
        tracing::info!(
            "[SshSession] Copied {}:{} -> {}",
            self.endpoint,
            remote,
            local.display()
        );
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(shell) = self.shell.take() {
            let _ = shell.close().await;
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                tracing::debug!("[SshSession] Disconnect from {}: {}", self.endpoint, e);
            }
        }
    }
}

/// Only "no such file" means absent; permission and channel errors are real failures.
fn is_missing(error: &SftpError) -> bool {
    matches!(
        error,
        SftpError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile)
    )
}

fn session_error(endpoint: &Endpoint, what: &str, e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::Session(format!("{}: {} failed: {}", endpoint, what, e))
}

fn transfer_error(endpoint: &Endpoint, what: &str, e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::Transfer(format!("{}: {}: {}", endpoint, what, e))
}
