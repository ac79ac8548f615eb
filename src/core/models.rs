use std::fmt;
use std::path::PathBuf;

use super::naming::file_safe;
use crate::config::{AppConfig, Database, DumpFormat, Server};
use crate::error::{BackupError, Result};

/// One (server, database) pair scheduled for backup. Immutable for a run.
#[derive(Debug, Clone)]
pub struct Target {
    pub server_id: String,
    pub database_id: String,
    pub server: Server,
    pub database: Database,
    pub template: String,
    pub format: DumpFormat,
}

impl Target {
    /// Look up a database key and the server it references.
    pub fn resolve(config: &AppConfig, database_id: &str) -> Result<Self> {
        let database = config.databases.get(database_id).ok_or_else(|| {
            BackupError::ConfigResolution(format!("database '{database_id}' not found"))
        })?;

        let server = config.servers.get(&database.server).ok_or_else(|| {
            BackupError::ConfigResolution(format!(
                "server '{}' referenced by database '{}' not found",
                database.server, database_id
            ))
        })?;

        Ok(Self {
            server_id: database.server.clone(),
            database_id: database_id.to_string(),
            server: server.clone(),
            database: database.clone(),
            template: config.settings.template.clone(),
            format: config.settings.format,
        })
    }

    pub fn server_name(&self) -> &str {
        self.server.display_name()
    }

    pub fn database_name(&self) -> &str {
        self.database.display_name()
    }

    /// File-name prefix shared by every dump of this target, spelled the
    /// way the naming template writes it to disk.
    pub fn archive_prefix(&self) -> String {
        file_safe(&format!("{}_{}", self.server_name(), self.database_name()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server_id, self.database_id)
    }
}

/// Lifecycle of one backup job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    CheckingRemote,
    /// The dump already exists remotely and will be preserved.
    Skipping,
    Creating,
    Downloading,
    CleaningRemote,
    Preserving,
    Archiving,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::CheckingRemote => "CheckingRemote",
            Self::Skipping => "Skipping",
            Self::Creating => "Creating",
            Self::Downloading => "Downloading",
            Self::CleaningRemote => "CleaningRemote",
            Self::Preserving => "Preserving",
            Self::Archiving => "Archiving",
            Self::Done => "Done",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A superseded dump relocated into the archive directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMove {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// What a finished job produced.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub target: String,
    pub local_path: PathBuf,
    pub bytes: u64,
    /// The job created the remote dump (and therefore removed it).
    pub created_remote: bool,
    pub archived: Vec<ArchiveMove>,
}

/// Result of a scheduler run where every worker succeeded.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub valid_targets: usize,
    pub outcomes: Vec<JobOutcome>,
}
