use std::path::PathBuf;
use thiserror::Error;

/// Every failure the backup engine can surface.
///
/// A failure inside one job is fatal to that job, a failure inside one
/// worker aborts that worker's remaining queue. Nothing is retried.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("configuration does not resolve: {0}")]
    ConfigResolution(String),

    #[error("no valid targets: database and server keys do not match, check the configuration file")]
    NoValidTargets,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    #[error("not connected to {0}")]
    NotConnected(String),

    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("dump location '{0}' is not yet supported")]
    UnsupportedLocation(String),

    #[error("driver '{0}' does not produce a remote dump path")]
    MissingRemotePath(String),

    #[error("remote command `{command}` exited with status {status}: {output}")]
    RemoteCommand {
        command: String,
        status: i32,
        output: String,
    },

    #[error("session channel error: {0}")]
    Channel(String),

    #[error("failed to query size of {path}: {reason}")]
    SizeQuery { path: String, reason: String },

    #[error("transfer of {path} failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote process for {path} exited with status {status}")]
    RemoteProcess { path: String, status: i32 },

    #[error("couldn't move {} -> {}: {source}", from.display(), to.display())]
    ArchiveMove {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup cancelled: {0}")]
    Cancelled(String),

    #[error("worker task failed: {0}")]
    WorkerPanic(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
