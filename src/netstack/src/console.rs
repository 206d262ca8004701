//! Paced send/receive over an interactive session.
//!
//! The console has no acknowledgement protocol. In the default blind mode the
//! driver assumes the remote side has processed a line once a fixed delay has
//! passed; it never inspects output to decide what to send next. If the remote
//! side is slower than the delay, the next line lands against a stale prompt
//! and the transcript is silently wrong rather than an error. Prompt mode
//! replaces the delay with a predicate over received text for consoles that
//! print a reliable prompt.
use crate::config::ConsoleConfig;
use crate::error::{ProvisionError, Result};
use crate::transport::{Session, SessionMode};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

/// How the driver decides the remote side is ready for the next line.
#[derive(Clone)]
pub enum Readiness {
    Blind(Duration),
    Prompt {
        ready: Arc<dyn Fn(&str) -> bool + Send + Sync>,
        timeout: Duration,
    },
}

impl std::fmt::Debug for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::Blind(delay) => f.debug_tuple("Blind").field(delay).finish(),
            Readiness::Prompt { timeout, .. } => {
                f.debug_struct("Prompt").field("timeout", timeout).finish()
            }
        }
    }
}

impl Readiness {
    pub fn from_config(config: &ConsoleConfig) -> Result<Self> {
        match &config.prompt_pattern {
            None => Ok(Readiness::Blind(config.command_pacing())),
            Some(pattern) => {
                let prompt = Regex::new(pattern).map_err(|e| {
                    ProvisionError::Config(format!("Invalid console prompt pattern: {}", e))
                })?;
                Ok(Readiness::Prompt {
                    ready: Arc::new(move |text: &str| prompt.is_match(text)),
                    timeout: Duration::from_millis(config.prompt_timeout_ms),
                })
            }
        }
    }
}

/// Line endings the remote console expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiscipline {
    pub terminator: String,
    /// Sent right after each command's terminator.
    pub trailer: String,
    /// Sent once after the batch, before the final read.
    pub flush: String,
}

impl LineDiscipline {
    /// Linux shell on the host.
    pub fn host_shell() -> Self {
        Self {
            terminator: "\n".to_string(),
            trailer: String::new(),
            flush: "\n\n".to_string(),
        }
    }

    /// Linux shell inside the router, reached through the forward.
    pub fn guest_shell() -> Self {
        Self {
            terminator: "\r".to_string(),
            trailer: "\r\r".to_string(),
            flush: String::new(),
        }
    }

    /// Router CLI after the `exec` login dialogue.
    pub fn router_cli() -> Self {
        Self {
            terminator: "\n\n".to_string(),
            trailer: String::new(),
            flush: "\n\n".to_string(),
        }
    }
}

/// Fixed login sub-dialogue: `exec`, username, password, each followed by a
/// blind wait.
#[derive(Debug, Clone)]
pub struct LoginDialogue {
    pub enter: String,
    pub username: String,
    pub password: String,
    pub settle: Duration,
}

impl LoginDialogue {
    pub fn router(username: &str, password: &str, settle: Duration) -> Self {
        Self {
            enter: "exec".to_string(),
            username: username.to_string(),
            password: password.to_string(),
            settle,
        }
    }
}

pub struct ConsoleDriver {
    session: Box<dyn Session>,
    discipline: LineDiscipline,
    readiness: Readiness,
    paging_command: String,
    paging_settle: Duration,
    paging_drain_bytes: usize,
    read_ceiling: usize,
    read_idle: Duration,
    /// Output collected while waiting for prompts during a batch.
    captured: String,
}

impl ConsoleDriver {
    /// Blind pacing from `config`; see [`ConsoleDriver::with_readiness`].
    pub fn new(session: Box<dyn Session>, config: &ConsoleConfig, discipline: LineDiscipline) -> Self {
        if session.mode() != SessionMode::Interactive {
            tracing::warn!(
                "[ConsoleDriver] Session to {} is not interactive; sends will fail",
                session.endpoint()
            );
        }
        Self {
            session,
            discipline,
            readiness: Readiness::Blind(config.command_pacing()),
            paging_command: config.paging_command.clone(),
            paging_settle: config.paging_settle(),
            paging_drain_bytes: config.paging_drain_bytes,
            read_ceiling: config.read_ceiling_bytes,
            read_idle: config.read_idle(),
            captured: String::new(),
        }
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    /// Turn pagination off and throw away whatever the console printed so far.
    pub async fn disable_paging(&mut self) -> Result<()> {
        let line = format!("{}\n", self.paging_command);
        self.session.send(&line).await?;
        tokio::time::sleep(self.paging_settle).await;
        let discarded = self
            .session
            .recv(self.paging_drain_bytes, self.read_idle)
            .await?;
        tracing::debug!(
            "[ConsoleDriver] Paging disabled on {} ({} bytes discarded)",
            self.session.endpoint(),
            discarded.len()
        );
        Ok(())
    }

    pub async fn login(&mut self, dialogue: &LoginDialogue) -> Result<()> {
        tracing::debug!(
            "[ConsoleDriver] Logging in to {} as {}",
            self.session.endpoint(),
            dialogue.username
        );
        self.session.send(&format!("{}\n", dialogue.enter)).await?;
        tokio::time::sleep(dialogue.settle).await;
        self.session.send(&format!("{}\n", dialogue.username)).await?;
        self.session
            .send(&format!("{}\n\n\n", dialogue.password))
            .await?;
        self.session.send("\n\n\n").await?;
        tokio::time::sleep(dialogue.settle).await;
        Ok(())
    }

    /// Send each command, wait for readiness after each, then do one bounded read.
    ///
    /// Output beyond the read ceiling is truncated.
    pub async fn run_batch<S: AsRef<str>>(&mut self, commands: &[S]) -> Result<String> {
        self.captured.clear();

        for command in commands {
            let command = command.as_ref();
            tracing::debug!("[ConsoleDriver] {} > {}", self.session.endpoint(), command);
            let line = format!(
                "{}{}{}",
                command, self.discipline.terminator, self.discipline.trailer
            );
            self.session.send(&line).await?;
            self.wait_ready().await?;
        }

        if !self.discipline.flush.is_empty() {
            let flush = self.discipline.flush.clone();
            self.session.send(&flush).await?;
        }

        let remaining = self.read_ceiling.saturating_sub(self.captured.len());
        let tail = self.session.recv(remaining, self.read_idle).await?;
        let mut transcript = std::mem::take(&mut self.captured);
        transcript.push_str(&tail);

        tracing::debug!(
            "[ConsoleDriver] {} transcript ({} bytes):\n{}",
            self.session.endpoint(),
            transcript.len(),
            transcript
        );
        Ok(transcript)
    }

    async fn wait_ready(&mut self) -> Result<()> {
        match self.readiness.clone() {
            Readiness::Blind(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Readiness::Prompt { ready, timeout } => {
                let deadline = tokio::time::Instant::now() + timeout;
                // Output seen since this command was sent. Once the transcript
                // is full, reads continue and only this window keeps them.
                let mut seen = String::new();
                loop {
                    let budget = self.read_ceiling.saturating_sub(self.captured.len());
                    let chunk = self
                        .session
                        .recv(self.read_ceiling.max(1), self.read_idle)
                        .await?;
                    let kept = floor_char_boundary(&chunk, budget);
                    self.captured.push_str(&chunk[..kept]);
                    seen.push_str(&chunk);
                    trim_front(&mut seen, self.read_ceiling);
                    if ready(&seen) {
                        return Ok(());
                    }
                    if tokio::time::Instant::now() >= deadline {
                        tracing::warn!(
                            "[ConsoleDriver] No prompt from {} within {}ms, continuing",
                            self.session.endpoint(),
                            timeout.as_millis()
                        );
                        return Ok(());
                    }
                }
            }
        }
    }

    pub async fn close(mut self) {
        self.session.close().await;
    }
}

/// Largest index `<= max` that falls on a char boundary of `text`.
fn floor_char_boundary(text: &str, max: usize) -> usize {
    if max >= text.len() {
        return text.len();
    }
    (0..=max).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0)
}

/// Drop leading bytes so `text` keeps at most the last `limit` bytes.
fn trim_front(text: &mut String, limit: usize) {
    if text.len() > limit {
        let mut cut = text.len() - limit;
        while !text.is_char_boundary(cut) {
            cut += 1;
        }
        text.drain(..cut);
    }
}
