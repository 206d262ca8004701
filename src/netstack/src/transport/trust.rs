//! Host identity policy for unattended connections.
//!
//! `AcceptAll` keeps the historical behaviour of trusting any key. Trust on
//! first use pins the SHA-256 fingerprint seen at first contact in a plain
//! text store (`host:port fingerprint` per line) and rejects later mismatches.
use crate::error::{ProvisionError, Result};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustVerdict {
    /// Fingerprint matches the pinned one.
    Known,
    /// First contact; fingerprint has been pinned.
    Recorded,
    Mismatch { pinned: String },
}

#[derive(Debug, Clone)]
pub struct FingerprintStore {
    path: PathBuf,
}

impl FingerprintStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn pinned(&self, host: &str) -> Result<Option<String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(content.lines().find_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(h), Some(fp)) if h == host => Some(fp.to_string()),
                _ => None,
            }
        }))
    }

    pub fn check(&self, host: &str, fingerprint: &str) -> Result<TrustVerdict> {
        match self.pinned(host)? {
            Some(pinned) if pinned == fingerprint => Ok(TrustVerdict::Known),
            Some(pinned) => Ok(TrustVerdict::Mismatch { pinned }),
            None => {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?;
                writeln!(file, "{} {}", host, fingerprint)?;
                Ok(TrustVerdict::Recorded)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum HostTrust {
    AcceptAll,
    TrustOnFirstUse(FingerprintStore),
}

impl HostTrust {
    /// Whether the connection to `host` presenting `fingerprint` may proceed.
    pub fn verify(&self, host: &str, fingerprint: &str) -> bool {
        match self {
            HostTrust::AcceptAll => {
                tracing::debug!("[HostTrust] Accepting {} key {}", host, fingerprint);
                true
            }
            HostTrust::TrustOnFirstUse(store) => match store.check(host, fingerprint) {
                Ok(TrustVerdict::Known) => true,
                Ok(TrustVerdict::Recorded) => {
                    tracing::info!("[HostTrust] Pinned {} key {}", host, fingerprint);
                    true
                }
                Ok(TrustVerdict::Mismatch { pinned }) => {
                    tracing::error!(
                        "[HostTrust] Host key for {} changed: pinned {}, presented {}",
                        host,
                        pinned,
                        fingerprint
                    );
                    false
                }
                Err(e) => {
                    tracing::error!("[HostTrust] Fingerprint store unusable: {}", e);
                    false
                }
            },
        }
    }

    pub fn from_config(config: &crate::config::ConnectionConfig) -> Self {
        match config.trust {
            crate::config::TrustMode::AcceptAll => HostTrust::AcceptAll,
            crate::config::TrustMode::TrustOnFirstUse => {
                HostTrust::TrustOnFirstUse(FingerprintStore::new(config.trust_store_path()))
            }
        }
    }
}

/// Error raised when the handshake is refused by [`HostTrust`].
pub fn rejected(host: &str) -> ProvisionError {
    ProvisionError::Connect(format!("host key for {} rejected by trust policy", host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_first_use_records_then_matches() {
        let dir = TempDir::new().unwrap();
        let store = FingerprintStore::new(dir.path().join("nested/fingerprints"));
        assert_eq!(
            store.check("10.0.0.5:22", "SHA256:abc").unwrap(),
            TrustVerdict::Recorded
        );
        assert_eq!(
            store.check("10.0.0.5:22", "SHA256:abc").unwrap(),
            TrustVerdict::Known
        );
        assert_eq!(
            store.check("10.0.0.5:22", "SHA256:other").unwrap(),
            TrustVerdict::Mismatch {
                pinned: "SHA256:abc".to_string()
            }
        );
    }

    #[test]
    fn test_hosts_are_pinned_independently() {
        let dir = TempDir::new().unwrap();
        let trust = HostTrust::TrustOnFirstUse(FingerprintStore::new(dir.path().join("fp")));
        assert!(trust.verify("127.0.0.1:1234", "SHA256:guest"));
        assert!(trust.verify("10.0.0.5:22", "SHA256:host"));
        assert!(trust.verify("127.0.0.1:1234", "SHA256:guest"));
        assert!(!trust.verify("10.0.0.5:22", "SHA256:guest"));
    }

    #[test]
    fn test_accept_all_accepts_anything() {
        assert!(HostTrust::AcceptAll.verify("h:22", "SHA256:x"));
    }
}
