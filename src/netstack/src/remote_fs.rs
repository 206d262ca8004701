//! Check-then-act helpers for remote filesystem objects.
use crate::error::Result;
use crate::transport::{FileKind, Session};

/// What a path is expected to be once [`RemoteFs::ensure_exists`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    Directory,
    CharDevice { major: u32, minor: u32 },
}

impl RemoteKind {
    fn file_kind(&self) -> FileKind {
        match self {
            RemoteKind::Directory => FileKind::Directory,
            RemoteKind::CharDevice { .. } => FileKind::CharDevice,
        }
    }

    fn create_command(&self, path: &str) -> String {
        match self {
            RemoteKind::Directory => format!("mkdir -p {}", path),
            RemoteKind::CharDevice { major, minor } => {
                format!("mknod {} c {} {}", path, major, minor)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    AlreadyPresent,
    Created,
}

pub struct RemoteFs<'a> {
    session: &'a mut dyn Session,
}

impl<'a> RemoteFs<'a> {
    pub fn new(session: &'a mut dyn Session) -> Self {
        Self { session }
    }

    pub async fn exists(&mut self, path: &str) -> Result<bool> {
        Ok(self.session.stat(path).await?.is_some())
    }

    /// Create `path` as `kind` unless something is already there.
    pub async fn ensure_exists(&mut self, path: &str, kind: RemoteKind) -> Result<EnsureOutcome> {
        if let Some(found) = self.session.stat(path).await? {
            if found != kind.file_kind() {
                tracing::warn!(
                    "[RemoteFs] {} on {} exists as {:?}, expected {:?}; leaving it",
                    path,
                    self.session.endpoint(),
                    found,
                    kind
                );
            }
            return Ok(EnsureOutcome::AlreadyPresent);
        }

        self.session.exec(&kind.create_command(path)).await?;
        tracing::info!(
            "[RemoteFs] Created {:?} {} on {}",
            kind,
            path,
            self.session.endpoint()
        );
        Ok(EnsureOutcome::Created)
    }

    /// Best-effort recursive removal; failures are logged, never raised.
    pub async fn remove_if_present(&mut self, path: &str) -> bool {
        match self.session.stat(path).await {
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!("[RemoteFs] Could not stat {} before removal: {}", path, e);
            }
        }
        match self.session.exec(&format!("rm -r {}", path)).await {
            Ok(_) => {
                tracing::info!("[RemoteFs] Removed {} on {}", path, self.session.endpoint());
                true
            }
            Err(e) => {
                tracing::warn!("[RemoteFs] Removal of {} failed: {}", path, e);
                false
            }
        }
    }
}
