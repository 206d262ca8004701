//! Remote session boundary.
//!
//! Every remote interaction opens its own authenticated session and releases it
//! before returning. A session is either interactive (a PTY shell that the
//! console driver paces by hand) or single-command (one `exec` per call, output
//! captured atomically). Both kinds carry SFTP `stat` / put / get.
pub mod ssh;
pub mod trust;

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

pub use ssh::SshTransport;
pub use trust::{FingerprintStore, HostTrust, TrustVerdict};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Interactive,
    SingleCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    CharDevice,
    Regular,
    Other,
}

impl FileKind {
    /// Kind from the `st_mode` type bits.
    pub fn from_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o040000 => FileKind::Directory,
            0o020000 => FileKind::CharDevice,
            0o100000 => FileKind::Regular,
            _ => FileKind::Other,
        }
    }
}

#[async_trait]
pub trait Session: Send {
    fn endpoint(&self) -> &Endpoint;

    fn mode(&self) -> SessionMode;

    /// Run one command; non-zero exit is `ProvisionError::Execution`.
    async fn exec(&mut self, command: &str) -> Result<String>;

    /// Write raw text to the interactive shell.
    async fn send(&mut self, text: &str) -> Result<()>;

    /// One bounded read: collect at most `max_bytes`, stopping once the shell
    /// has been quiet for `idle`.
    async fn recv(&mut self, max_bytes: usize, idle: Duration) -> Result<String>;

    /// `None` when the path does not exist. Any other failure is an error.
    async fn stat(&mut self, path: &str) -> Result<Option<FileKind>>;

    async fn put_file(&mut self, local: &Path, remote: &str) -> Result<()>;

    async fn get_file(&mut self, remote: &str, local: &Path) -> Result<()>;

    /// Release the channel. Safe to call more than once and after a failure.
    async fn close(&mut self);
}

#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn open(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        mode: SessionMode,
    ) -> Result<Box<dyn Session>>;
}

/// Run one command on a fresh single-command session.
pub async fn exec_once(
    transport: &dyn SessionTransport,
    endpoint: &Endpoint,
    credentials: &Credentials,
    command: &str,
) -> Result<String> {
    with_session(
        transport,
        endpoint,
        credentials,
        SessionMode::SingleCommand,
        |mut session| async move {
            let result = session.exec(command).await;
            (session, result)
        },
    )
    .await
}

/// Open a session, hand it to `action`, and close it whatever the outcome.
///
/// The session is passed by value and returned by the action so the borrow
/// never outlives the call.
pub async fn with_session<T, F, Fut>(
    transport: &dyn SessionTransport,
    endpoint: &Endpoint,
    credentials: &Credentials,
    mode: SessionMode,
    action: F,
) -> Result<T>
where
    F: FnOnce(SessionGuard) -> Fut,
    Fut: Future<Output = (SessionGuard, Result<T>)>,
{
    let session = transport.open(endpoint, credentials, mode).await?;
    let (mut guard, result) = action(SessionGuard(session)).await;
    guard.0.close().await;
    result
}

/// Owned session handed through [`with_session`].
pub struct SessionGuard(pub Box<dyn Session>);

impl std::ops::Deref for SessionGuard {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl std::ops::DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.0
    }
}
