use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, Connector, Endpoint, OutputStream, RemoteSession};
use crate::error::{BackupError, Result};

/// Plays the remote host on this machine: every command runs through
/// `sh -c` with `root` as the working directory.
///
/// Used for simulation runs and by the test suite.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn RemoteSession>> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BackupError::Connection {
                address: endpoint.address(),
                message: format!("failed to prepare {}: {}", self.root.display(), e),
            })?;

        debug!(root = %self.root.display(), server = %endpoint.address(), "(Simulation) Opened local session");
        Ok(Box::new(LocalSession {
            root: self.root.clone(),
        }))
    }
}

struct LocalSession {
    root: PathBuf,
}

impl LocalSession {
    fn shell(&self, command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null());
        cmd
    }
}

fn spawn_error(e: std::io::Error) -> BackupError {
    BackupError::Channel(format!("failed to spawn sh: {e}"))
}

#[async_trait]
impl RemoteSession for LocalSession {
    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        let output = self.shell(command).output().await.map_err(spawn_error)?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            output: String::from_utf8_lossy(&combined).into_owned(),
        })
    }

    async fn open_output_stream(&self, command: &str) -> Result<OutputStream> {
        let mut child = self
            .shell(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // an abandoned download must not leave `cat` running
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BackupError::Channel("failed to capture stdout".to_string()))?;

        let exit = async move {
            let status = child
                .wait()
                .await
                .map_err(|e| BackupError::Channel(format!("failed to wait for sh: {e}")))?;
            Ok(status.code().unwrap_or(-1))
        };

        Ok(OutputStream::new(stdout, exit))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
