//! Provisioning workflow executor.
//!
//! Runs the stages in fixed order against one `WorkflowContext`, fail-fast:
//! the first fatal error aborts the run with no cleanup. Retry loops live
//! inside the stages that need them.
use super::context::{WorkflowContext, WorkflowInputs};
use super::stage::Stage;
use crate::config::NetstackConfig;
use crate::console::{ConsoleDriver, LineDiscipline, LoginDialogue, Readiness};
use crate::error::{ProvisionError, Result};
use crate::facts::FactRules;
use crate::poller::RetryPolicy;
use crate::process::ProcessRunner;
use crate::progress::{ProgressReporter, TracingProgressReporter};
use crate::remote_fs::{EnsureOutcome, RemoteFs, RemoteKind};
use crate::transport::{self, Credentials, Endpoint, SessionMode, SessionTransport};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct ProvisioningWorkflow {
    pub(super) transport: Arc<dyn SessionTransport>,
    pub(super) processes: Arc<dyn ProcessRunner>,
    pub(super) config: NetstackConfig,
    pub(super) rules: FactRules,
    readiness: Readiness,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl ProvisioningWorkflow {
    pub fn new(
        config: NetstackConfig,
        transport: Arc<dyn SessionTransport>,
        processes: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        let rules = FactRules::compile(&config.facts)?;
        let readiness = Readiness::from_config(&config.console)?;
        Ok(Self {
            transport,
            processes,
            config,
            rules,
            readiness,
            progress: Arc::new(TracingProgressReporter),
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &NetstackConfig {
        &self.config
    }

    /// Run every stage in order. Returns the final context on success.
    pub async fn run(&self, inputs: WorkflowInputs) -> Result<WorkflowContext> {
        let mut ctx = WorkflowContext::new(inputs);
        let total = Stage::ALL.len() as u32;

        tracing::info!(
            "[ProvisioningWorkflow] Starting run for net '{}' (forward port {})",
            ctx.inputs.net_name,
            ctx.inputs.forward_port
        );

        for (index, stage) in Stage::ALL.iter().copied().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled(stage.name().to_string()));
            }

            let progress = 100 * index as u32 / total;
            self.progress
                .emit_stage(progress, format!("Executing {}", stage), stage.name());

            let stage_start = Instant::now();
            if let Err(e) = self.run_stage(stage, &mut ctx).await {
                tracing::error!(
                    "[ProvisioningWorkflow] Stage {} failed after {}ms: {}",
                    stage,
                    stage_start.elapsed().as_millis(),
                    e
                );
                return Err(e);
            }
            tracing::info!(
                "[TIMING] Stage {} completed in {}ms",
                stage,
                stage_start.elapsed().as_millis()
            );
        }

        self.progress
            .emit_stage(100, "Provisioning complete".to_string(), "complete");
        Ok(ctx)
    }

    /// Run one stage against `ctx` and record it as completed.
    pub async fn run_stage(&self, stage: Stage, ctx: &mut WorkflowContext) -> Result<()> {
        match stage {
            Stage::ResolveEndpoint => self.resolve_endpoint(ctx).await?,
            Stage::EstablishHostTrust => self.establish_host_trust(ctx).await?,
            Stage::WaitInstanceUp => self.wait_instance_up(ctx).await?,
            Stage::ConfigureConsoleAccess => self.configure_console_access(ctx).await?,
            Stage::EstablishGuestTrust => self.establish_guest_trust(ctx).await?,
            Stage::ConfigureDataPlane => self.configure_data_plane(ctx).await?,
            Stage::EnsureTapDevice => {
                let outcome = self.ensure_tap_device(ctx).await?;
                ctx.tap = Some(outcome);
            }
            Stage::ExtractInterfaceFacts => self.extract_interface_facts(ctx).await?,
            Stage::BridgeNetworking => self.bridge_networking(ctx).await?,
            Stage::ExchangeGuestHostKeys => self.exchange_guest_host_keys(ctx).await?,
            Stage::FinalizeHostIdentity => self.finalize_host_identity(ctx).await?,
            Stage::BootstrapAgent => self.bootstrap_agent(ctx).await?,
        }
        ctx.completed.push(stage);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared plumbing for the stages
    // ------------------------------------------------------------------

    pub(super) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::unbounded(self.config.polling.interval())
            .with_max_attempts(self.config.polling.max_attempts)
            .with_cancel(self.cancel.clone())
    }

    pub(super) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(super) fn host_credentials(&self) -> Credentials {
        Credentials::new(&self.config.host.username, &self.config.host.password)
    }

    pub(super) fn guest_credentials(&self) -> Credentials {
        Credentials::new(&self.config.guest.username, &self.config.guest.password)
    }

    pub(super) async fn host_exec(&self, ctx: &WorkflowContext, command: &str) -> Result<String> {
        let host = ctx.host()?;
        tracing::info!("[ProvisioningWorkflow] host$ {}", command);
        transport::exec_once(&*self.transport, host, &self.host_credentials(), command).await
    }

    pub(super) async fn guest_exec(&self, ctx: &WorkflowContext, command: &str) -> Result<String> {
        let guest = ctx.guest()?;
        tracing::info!("[ProvisioningWorkflow] guest$ {}", command);
        transport::exec_once(&*self.transport, guest, &self.guest_credentials(), command).await
    }

    /// Run a batch on the router CLI: paging off, blind login, commands.
    pub(super) async fn router_console<S: AsRef<str>>(
        &self,
        guest: &Endpoint,
        commands: &[S],
    ) -> Result<String> {
        let login = LoginDialogue::router(
            &self.config.guest.console_username,
            &self.config.guest.console_password,
            self.config.console.login_settle(),
        );
        self.console_batch(
            guest,
            &self.guest_credentials(),
            LineDiscipline::router_cli(),
            Some(&login),
            commands,
        )
        .await
    }

    pub(super) async fn host_shell<S: AsRef<str>>(
        &self,
        ctx: &WorkflowContext,
        commands: &[S],
    ) -> Result<String> {
        self.console_batch(
            ctx.host()?,
            &self.host_credentials(),
            LineDiscipline::host_shell(),
            None,
            commands,
        )
        .await
    }

    pub(super) async fn guest_shell<S: AsRef<str>>(
        &self,
        ctx: &WorkflowContext,
        commands: &[S],
    ) -> Result<String> {
        self.console_batch(
            ctx.guest()?,
            &self.guest_credentials(),
            LineDiscipline::guest_shell(),
            None,
            commands,
        )
        .await
    }

    async fn console_batch<S: AsRef<str>>(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        discipline: LineDiscipline,
        login: Option<&LoginDialogue>,
        commands: &[S],
    ) -> Result<String> {
        let session = self
            .transport
            .open(endpoint, credentials, SessionMode::Interactive)
            .await?;
        let mut console = ConsoleDriver::new(session, &self.config.console, discipline)
            .with_readiness(self.readiness.clone());

        let result = async {
            console.disable_paging().await?;
            if let Some(login) = login {
                console.login(login).await?;
            }
            console.run_batch(commands).await
        }
        .await;

        console.close().await;
        result
    }

    pub(super) async fn ensure_remote(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        path: &str,
        kind: RemoteKind,
    ) -> Result<EnsureOutcome> {
        transport::with_session(
            &*self.transport,
            endpoint,
            credentials,
            SessionMode::SingleCommand,
            |mut session| async move {
                let result = RemoteFs::new(&mut *session).ensure_exists(path, kind).await;
                (session, result)
            },
        )
        .await
    }

    pub(super) async fn remote_exists(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        path: &str,
    ) -> Result<bool> {
        transport::with_session(
            &*self.transport,
            endpoint,
            credentials,
            SessionMode::SingleCommand,
            |mut session| async move {
                let result = RemoteFs::new(&mut *session).exists(path).await;
                (session, result)
            },
        )
        .await
    }

    /// Best effort: also swallows a failure to connect.
    pub(super) async fn remove_remote(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        path: &str,
    ) -> bool {
        let outcome = transport::with_session(
            &*self.transport,
            endpoint,
            credentials,
            SessionMode::SingleCommand,
            |mut session| async move {
                let removed = RemoteFs::new(&mut *session).remove_if_present(path).await;
                (session, Ok(removed))
            },
        )
        .await;
        match outcome {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!("[ProvisioningWorkflow] Could not reset {}: {}", path, e);
                false
            }
        }
    }

    pub(super) async fn upload(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        files: &[(&Path, &str)],
    ) -> Result<()> {
        transport::with_session(
            &*self.transport,
            endpoint,
            credentials,
            SessionMode::SingleCommand,
            |mut session| async move {
                let result = async {
                    for (local, remote) in files {
                        session.put_file(local, remote).await?;
                    }
                    Ok::<(), ProvisionError>(())
                }
                .await;
                (session, result)
            },
        )
        .await
    }

    pub(super) async fn download(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        remote: &str,
        local: &Path,
    ) -> Result<()> {
        transport::with_session(
            &*self.transport,
            endpoint,
            credentials,
            SessionMode::SingleCommand,
            |mut session| async move {
                let result = session.get_file(remote, local).await;
                (session, result)
            },
        )
        .await
    }

    pub(super) async fn settle(&self, duration: std::time::Duration) {
        if !duration.is_zero() {
            tracing::debug!(
                "[ProvisioningWorkflow] Settling for {}ms",
                duration.as_millis()
            );
            tokio::time::sleep(duration).await;
        }
    }
}
