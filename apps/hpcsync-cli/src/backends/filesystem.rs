//! Clustered filesystem primitives over the filesystem's command-line tools.

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info, instrument};

use hpcsync_connector::error::{ConnectorError, ConnectorResult};
use hpcsync_connector::traits::{Ensured, FilesystemOps, QuotaRequest};

use crate::config::FilesystemCommands;
use crate::process::{CommandOutput, CommandRunner};

/// Arguments for the quota command.
pub fn quota_args(quota: &QuotaRequest) -> Vec<String> {
    let device = match &quota.fileset {
        Some(fileset) => format!("{}:{}", quota.filesystem, fileset),
        None => quota.filesystem.clone(),
    };
    vec![
        device,
        if quota.group { "--group" } else { "--user" }.to_string(),
        quota.owner.clone(),
        "--block".to_string(),
        format!("{}:{}", quota.soft_bytes, quota.hard_bytes),
    ]
}

/// [`FilesystemOps`] backed by external commands.
pub struct CommandFilesystem {
    runner: CommandRunner,
    commands: FilesystemCommands,
}

impl CommandFilesystem {
    pub fn new(runner: CommandRunner, commands: FilesystemCommands) -> Self {
        Self { runner, commands }
    }

    async fn run_checked(&self, program: &str, args: Vec<String>) -> ConnectorResult<CommandOutput> {
        let output = self.runner.run(program, &args).await?;
        if !output.success() {
            return Err(ConnectorError::operation_failed(format!(
                "{} {} exited with status {}: {}",
                program,
                args.join(" "),
                output.status,
                output.stderr.trim()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl FilesystemOps for CommandFilesystem {
    #[instrument(skip(self))]
    async fn ensure_fileset(
        &self,
        filesystem: &str,
        fileset: &str,
        path: &Path,
    ) -> ConnectorResult<Ensured> {
        let listed = self
            .runner
            .run(
                &self.commands.list_fileset,
                &[filesystem.to_string(), fileset.to_string()],
            )
            .await?;
        if listed.success() {
            debug!(filesystem, fileset, "Fileset exists");
            return Ok(Ensured::Existing);
        }

        self.run_checked(
            &self.commands.create_fileset,
            vec![
                filesystem.to_string(),
                fileset.to_string(),
                "--inode-space".to_string(),
                "new".to_string(),
            ],
        )
        .await?;
        self.run_checked(
            &self.commands.link_fileset,
            vec![
                filesystem.to_string(),
                fileset.to_string(),
                "-J".to_string(),
                path.display().to_string(),
            ],
        )
        .await?;
        info!(filesystem, fileset, path = %path.display(), "Created fileset");
        Ok(Ensured::Created)
    }

    async fn ensure_quota(&self, quota: &QuotaRequest) -> ConnectorResult<Ensured> {
        self.run_checked(&self.commands.set_quota, quota_args(quota))
            .await?;
        debug!(
            filesystem = %quota.filesystem,
            owner = %quota.owner,
            hard = quota.hard_bytes,
            "Quota set"
        );
        Ok(Ensured::Existing)
    }

    async fn ensure_directory(
        &self,
        path: &Path,
        owner: &str,
        mode: u32,
    ) -> ConnectorResult<Ensured> {
        let existed = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        let path_arg = path.display().to_string();
        let mode_arg = format!("{mode:o}");

        if !existed {
            self.run_checked(
                &self.commands.mkdir,
                vec![
                    "-p".to_string(),
                    "-m".to_string(),
                    mode_arg.clone(),
                    path_arg.clone(),
                ],
            )
            .await?;
        }
        self.run_checked(&self.commands.chown, vec![owner.to_string(), path_arg.clone()])
            .await?;
        self.run_checked(&self.commands.chmod, vec![mode_arg, path_arg])
            .await?;

        if existed {
            Ok(Ensured::Existing)
        } else {
            info!(path = %path.display(), owner, "Created directory");
            Ok(Ensured::Created)
        }
    }
}
