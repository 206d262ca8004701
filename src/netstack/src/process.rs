//! Local process execution boundary.
use crate::error::{ProvisionError, Result};
use async_trait::async_trait;
use std::process::Stdio;

/// Captured result of a finished local process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run to completion and capture output, whatever the exit status.
    async fn output(&self, program: &str, args: &[String]) -> Result<ProcessOutput>;

    /// Run and return stdout; a non-zero exit is `ProcessFailed`.
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        let output = self.output(program, args).await?;
        if !output.success() {
            return Err(ProvisionError::ProcessFailed {
                program: display_command(program, args),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// Run a command that daemonizes itself. Only the exit status is
    /// checked; nothing is captured, so a background child holding the
    /// inherited streams cannot keep the call waiting.
    async fn run_detached(&self, program: &str, args: &[String]) -> Result<()> {
        self.run(program, args).await.map(|_| ())
    }
}

pub fn display_command(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs programs on the local machine via `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemProcessRunner;

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn output(&self, program: &str, args: &[String]) -> Result<ProcessOutput> {
        tracing::debug!("[ProcessRunner] {}", display_command(program, args));

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ProvisionError::ProcessFailed {
                program: display_command(program, args),
                status: -1,
                stderr: format!("failed to spawn: {}", e),
            })?;

        Ok(ProcessOutput {
            // Killed by a signal: no exit code.
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run_detached(&self, program: &str, args: &[String]) -> Result<()> {
        let command = display_command(program, args);
        tracing::debug!("[ProcessRunner] {} (detached)", command);

        let status = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| ProvisionError::ProcessFailed {
                program: command.clone(),
                status: -1,
                stderr: format!("failed to spawn: {}", e),
            })?;

        if !status.success() {
            return Err(ProvisionError::ProcessFailed {
                program: command,
                status: status.code().unwrap_or(-1),
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

/// `vec!["a", "b"]` of owned strings.
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
