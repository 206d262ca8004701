//! Configuration-management agent bootstrap inside the guest.
use crate::bootstrap::context::WorkflowContext;
use crate::bootstrap::workflow::ProvisioningWorkflow;
use crate::error::{ProvisionError, Result};
use std::path::Path;

impl ProvisioningWorkflow {
    /// Stage 12.
    pub(crate) async fn bootstrap_agent(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let agent = &self.config.agent;
        let package_dir = self.config.identity.package_dir.as_str();
        let guest = ctx.guest()?;
        let credentials = self.guest_credentials();

        let package_remote = remote_path_in(package_dir, &agent.package)?;
        let archive_remote = remote_path_in(package_dir, &agent.starter_archive)?;
        self.upload(
            guest,
            &credentials,
            &[
                (agent.package.as_path(), package_remote.as_str()),
                (agent.starter_archive.as_path(), archive_remote.as_str()),
                (agent.client_config.as_path(), agent.client_config_remote.as_str()),
            ],
        )
        .await?;

        let package_name = package_stem(&agent.package)?;
        match self.guest_exec(ctx, &format!("rpm -q {}", package_name)).await {
            Ok(_) => {
                tracing::info!("[ProvisioningWorkflow] {} already installed", package_name);
            }
            Err(e) if e.is_execution() => {
                self.guest_exec(ctx, &format!("rpm -ivh --nodeps {}", package_remote))
                    .await?;
            }
            Err(e) => return Err(e),
        }

        if self
            .remote_exists(guest, &credentials, &agent.working_dir)
            .await?
        {
            // Fatal on failure; the registration batch unpacks into this directory.
            self.guest_exec(ctx, &format!("rm -r {}", agent.working_dir))
                .await?;
            self.settle(self.config.polling.step_settle()).await;
        }

        self.guest_shell(ctx, &agent.registration_commands).await?;
        self.guest_exec(ctx, &detached(&agent.launch_command))
            .await?;
        tracing::info!("[ProvisioningWorkflow] Agent launched in the guest");
        Ok(())
    }
}

fn file_name(local: &Path) -> Result<String> {
    local
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ProvisionError::Config(format!("{:?} has no file name", local)))
}

fn remote_path_in(dir: &str, local: &Path) -> Result<String> {
    Ok(format!("{}/{}", dir.trim_end_matches('/'), file_name(local)?))
}

/// Package name as `rpm -q` expects it: the file name without `.rpm`.
fn package_stem(package: &Path) -> Result<String> {
    let name = file_name(package)?;
    Ok(name.strip_suffix(".rpm").unwrap_or(&name).to_string())
}

/// Run `command` in the background with its streams detached so the
/// exec channel can close.
fn detached(command: &str) -> String {
    format!("({}) > /dev/null 2>&1 < /dev/null &", command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_paths() {
        let package = Path::new("/tftpboot/chef-12.0.3-1.x86_64.rpm");
        assert_eq!(package_stem(package).unwrap(), "chef-12.0.3-1.x86_64");
        assert_eq!(
            remote_path_in("/root/rpms/", package).unwrap(),
            "/root/rpms/chef-12.0.3-1.x86_64.rpm"
        );
        assert!(package_stem(Path::new("/")).is_err());
    }

    #[test]
    fn test_launch_is_detached() {
        assert_eq!(detached("chef-client -d"), "(chef-client -d) > /dev/null 2>&1 < /dev/null &");
    }
}
