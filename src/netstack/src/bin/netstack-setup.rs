//! netstack-setup: provisions a lab router instance end to end.

use anyhow::Context;
use clap::{Parser, Subcommand};
use netstack::bootstrap::{ProvisioningWorkflow, Stage, WorkflowInputs};
use netstack::config::{NetstackConfig, TrustMode};
use netstack::process::SystemProcessRunner;
use netstack::transport::{HostTrust, SshTransport};
use netstack::ProvisionError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "netstack-setup", version, about = "Provision a lab router instance")]
struct Cli {
    /// Config file (default: ./netstack.toml if present)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long = "log-level", global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full provisioning workflow
    Setup {
        /// Console port used to discover the host address
        #[arg(short = 'p', long = "host-port")]
        host_port: u16,

        /// Router console port
        #[arg(short = 'x', long = "router-console-port")]
        router_console_port: u16,

        /// Network name; the host bridge is <net_name>Br1
        #[arg(short = 'n', long = "net-name")]
        net_name: String,

        /// Local port forwarded to the guest shell
        #[arg(short = 'f', long = "forward-port")]
        forward_port: u16,

        /// Added to the bridge address's last octet for the router address
        #[arg(long = "router-offset")]
        router_offset: Option<u8>,

        /// Bound every readiness poll (default: retry forever)
        #[arg(long = "max-attempts")]
        max_attempts: Option<u32>,

        /// Host key policy: accept-all or tofu
        #[arg(long = "trust")]
        trust: Option<TrustMode>,
    },

    /// Restart a router process through an existing forward
    RestartProcess {
        #[arg(short = 'f', long = "forward-port")]
        forward_port: u16,

        #[arg(long = "name", default_value = "flume")]
        name: String,
    },

    /// Print the provisioning stages in order
    Stages,
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let code = match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            let code = e
                .downcast_ref::<ProvisionError>()
                .map(ProvisionError::exit_code)
                .unwrap_or(1);
            tracing::error!("netstack-setup failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            code
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Stages = cli.command {
        for stage in Stage::ALL {
            println!("{:>2}. {}", stage.ordinal(), stage.name());
        }
        return Ok(());
    }

    let mut config = NetstackConfig::load(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Received Ctrl+C, cancelling");
                on_interrupt.cancel();
            }
        });

        match cli.command {
            Command::Setup {
                host_port,
                router_console_port,
                net_name,
                forward_port,
                router_offset,
                max_attempts,
                trust,
            } => {
                if let Some(offset) = router_offset {
                    config.network.router_address_offset = offset;
                }
                if max_attempts.is_some() {
                    config.polling.max_attempts = max_attempts;
                    config.polling.tap_max_attempts = max_attempts;
                }
                if let Some(trust) = trust {
                    config.connection.trust = trust;
                }

                let workflow = build_workflow(config)?.with_cancel(cancel.clone());
                let ctx = tokio::select! {
                    result = workflow.run(WorkflowInputs {
                        host_console_port: host_port,
                        router_console_port,
                        net_name,
                        forward_port,
                    }) => result?,
                    _ = cancel.cancelled() => {
                        return Err(ProvisionError::Cancelled("provisioning run".to_string()).into());
                    }
                };

                info!(
                    "Provisioning complete: {} stages, hostname {}",
                    ctx.completed.len(),
                    ctx.hostname.as_deref().unwrap_or("-")
                );
            }
            Command::RestartProcess { forward_port, name } => {
                let workflow = build_workflow(config)?.with_cancel(cancel.clone());
                let transcript = tokio::select! {
                    result = workflow.restart_process(forward_port, &name) => result?,
                    _ = cancel.cancelled() => {
                        return Err(ProvisionError::Cancelled(format!("restart of {}", name)).into());
                    }
                };
                println!("{}", transcript);
            }
            Command::Stages => {}
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn build_workflow(config: NetstackConfig) -> anyhow::Result<ProvisioningWorkflow> {
    let transport = SshTransport::new(
        config.connection.connect_timeout(),
        HostTrust::from_config(&config.connection),
    );
    Ok(ProvisioningWorkflow::new(
        config,
        Arc::new(transport),
        Arc::new(SystemProcessRunner),
    )?)
}
