//! Per-target backup state machine.
//!
//! `CheckingRemote → {Skipping | Creating} → Downloading →
//! {CleaningRemote | Preserving} → Archiving → Done`, or `Failed` /
//! `Cancelled` from any state. A dump that already existed remotely is
//! never deleted; one the job created is always removed before success.

use chrono::Local;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::archiver;
use super::download::Downloader;
use super::models::{ArchiveMove, JobOutcome, JobState, Target};
use super::naming::dump_file_name;
use crate::command::{DumpCommand, DumpParams, GeneratorRegistry};
use crate::config::{AppConfig, DumpLocation};
use crate::context::AppContext;
use crate::error::{BackupError, Result};
use crate::remote::{Connection, shell_quote};

/// Transient record of one target's progress through the state machine.
#[derive(Debug)]
pub struct BackupJob {
    id: String,
    target: String,
    state: JobState,
    history: Vec<JobState>,
}

impl BackupJob {
    pub fn new(target: &Target) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            target: target.to_string(),
            state: JobState::Pending,
            history: vec![JobState::Pending],
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Every state the job has passed through, in order.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    fn transition(&mut self, next: JobState) {
        debug_assert!(
            !self.state.is_terminal(),
            "job {} left terminal state {}",
            self.id,
            self.state
        );
        info!(job_id = %self.id, target = %self.target, from = %self.state, to = %next, "Job state changed");
        self.state = next;
        self.history.push(next);
    }
}

/// Runs backup jobs against a connection owned by the caller.
#[derive(Clone)]
pub struct Executor {
    config: Arc<AppConfig>,
    registry: Arc<GeneratorRegistry>,
    downloader: Downloader,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            config: ctx.config.clone(),
            registry: ctx.registry.clone(),
            downloader: Downloader::new(ctx.progress.clone()),
            cancel: ctx.cancel.clone(),
        }
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Build the dump command for `target` from the registry.
    pub fn prepare(&self, target: &Target) -> Result<DumpCommand> {
        let settings = &self.config.settings;
        let dump_name = dump_file_name(
            &target.template,
            target.server_name(),
            target.database_name(),
            &Local::now(),
        );
        info!(target = %target, name = %dump_name, "Generated dump name");

        let params = DumpParams {
            user: target.database.user.clone(),
            password: target.database.password.clone(),
            name: target.database_name().to_string(),
            port: target
                .database
                .port_or(settings.db_port.as_deref())
                .map(str::to_string),
            host: target.server.host.clone(),
            dump_name,
            format: target.format,
        };

        self.registry.synthesize(&settings.driver, &params, settings)
    }

    pub async fn execute(&self, conn: &Connection, target: &Target) -> Result<JobOutcome> {
        let mut job = BackupJob::new(target);
        let result = self.drive(&mut job, conn, target).await;

        if let Err(e) = &result {
            if e.is_cancelled() {
                job.transition(JobState::Cancelled);
                warn!(job_id = %job.id, target = %target, "Backup cancelled");
            } else {
                job.transition(JobState::Failed);
                error!(job_id = %job.id, target = %target, error = %e, "Backup failed");
            }
        }

        self.downloader.tracker().remove(&job.id).await;
        result
    }

    async fn drive(&self, job: &mut BackupJob, conn: &Connection, target: &Target) -> Result<JobOutcome> {
        let settings = &self.config.settings;
        self.check_cancelled(target)?;

        let command = self.prepare(target)?;

        if settings.location != DumpLocation::Server {
            return Err(BackupError::UnsupportedLocation(settings.location.to_string()));
        }

        let remote_path = command
            .remote_path
            .clone()
            .ok_or_else(|| BackupError::MissingRemotePath(settings.driver.clone()))?;
        let quoted = shell_quote(&remote_path);

        job.transition(JobState::CheckingRemote);
        let existing = self
            .guarded(target, conn.run_command(&format!("test -f {quoted}")))
            .await?;

        let created = if existing.success() {
            job.transition(JobState::Skipping);
            warn!(job_id = %job.id, path = %remote_path, "Dump already exists on server, reusing it");
            false
        } else {
            job.transition(JobState::Creating);
            info!(job_id = %job.id, path = %remote_path, "Creating dump");

            let started = Instant::now();
            self.guarded(target, conn.run_checked(&command.command)).await?;
            info!(
                job_id = %job.id,
                time = format!("{:.2} sec", started.elapsed().as_secs_f64()),
                "The dump was successfully created"
            );
            true
        };

        self.check_cancelled(target)?;
        job.transition(JobState::Downloading);
        let report = self
            .downloader
            .download(conn, &job.id, &remote_path, &settings.dir_dump, &self.cancel)
            .await?;

        self.check_cancelled(target)?;
        if created {
            job.transition(JobState::CleaningRemote);
            self.guarded(target, conn.run_checked(&format!("rm -f {quoted}")))
                .await?;
            info!(job_id = %job.id, path = %remote_path, "The dump was deleted on server");
        } else {
            job.transition(JobState::Preserving);
        }

        let archived = match settings.archive_dir() {
            Some(archive_dir) => {
                self.check_cancelled(target)?;
                job.transition(JobState::Archiving);
                self.archive(target, &report.local_path, archive_dir).await?
            }
            None => Vec::new(),
        };

        job.transition(JobState::Done);

        Ok(JobOutcome {
            job_id: job.id.clone(),
            target: target.to_string(),
            local_path: report.local_path,
            bytes: report.progress.bytes_transferred,
            created_remote: created,
            archived,
        })
    }

    async fn archive(
        &self,
        target: &Target,
        current: &std::path::Path,
        archive_dir: &std::path::Path,
    ) -> Result<Vec<ArchiveMove>> {
        let prefix = target.archive_prefix();
        let current = current.to_path_buf();
        let work_dir = self.config.settings.dir_dump.clone();
        let archive_dir = archive_dir.to_path_buf();

        info!(prefix = %prefix, "Searching for old backups");
        tokio::task::spawn_blocking(move || {
            archiver::archive_superseded(&prefix, &current, &work_dir, &archive_dir)
        })
        .await
        .map_err(|e| BackupError::WorkerPanic(format!("archiver task failed: {e}")))?
    }

    fn check_cancelled(&self, target: &Target) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(BackupError::Cancelled(format!(
                "backup cancelled for database {}",
                target.database_id
            )));
        }
        Ok(())
    }

    /// Await a remote step, giving up on it if the run is cancelled.
    ///
    /// The remote command itself keeps running; only its result is dropped.
    async fn guarded<T>(&self, target: &Target, step: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled(format!(
                "backup cancelled for database {}",
                target.database_id
            ))),
            result = step => result,
        }
    }
}
