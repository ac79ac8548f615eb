//! Fans targets out across one worker per server.

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};

use super::executor::Executor;
use super::models::{JobOutcome, RunReport, Target};
use crate::config::DumpLocation;
use crate::context::AppContext;
use crate::error::{BackupError, Result};
use crate::remote::{Connection, Endpoint};

/// Which databases a run should back up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Named(Vec<String>),
    All,
}

impl Selection {
    /// Parse a comma separated list of database ids.
    pub fn parse(list: &str) -> Self {
        Self::Named(
            list.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

pub struct Scheduler {
    ctx: AppContext,
}

impl Scheduler {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Resolve the selection against the config. Unknown ids are dropped
    /// with a warning.
    pub fn resolve_targets(&self, selection: &Selection) -> Result<Vec<Target>> {
        let config = &self.ctx.config;
        let ids: Vec<String> = match selection {
            Selection::Named(ids) => ids.clone(),
            Selection::All => config.databases.keys().cloned().collect(),
        };

        let mut targets = Vec::with_capacity(ids.len());
        for id in &ids {
            match Target::resolve(config, id) {
                Ok(target) => targets.push(target),
                Err(BackupError::ConfigResolution(reason)) => {
                    warn!(database = %id, reason = %reason, "Skipping backup target");
                }
                Err(e) => return Err(e),
            }
        }

        if targets.is_empty() {
            return Err(BackupError::NoValidTargets);
        }

        info!(
            requested = ids.len(),
            valid = targets.len(),
            "Resolved backup targets"
        );
        Ok(targets)
    }

    /// Back up every selected target.
    ///
    /// Servers are processed concurrently, each by its own worker that runs
    /// its targets in order and stops at its first failure. Only the earliest
    /// error across all workers is returned; the rest are logged. A failed
    /// run may therefore still have completed backups on other servers.
    pub async fn run(&self, selection: &Selection) -> Result<RunReport> {
        let targets = self.resolve_targets(selection)?;
        self.preflight()?;

        let valid_targets = targets.len();
        let groups = group_by_server(targets);
        info!(
            targets = valid_targets,
            workers = groups.len(),
            "Starting backup run"
        );

        let (err_tx, mut err_rx) = mpsc::channel::<BackupError>(valid_targets.max(1));
        let mut workers = JoinSet::new();

        for (server_id, targets) in groups {
            let ctx = self.ctx.clone();
            let err_tx = err_tx.clone();
            let span = info_span!("worker", server = %server_id);

            workers.spawn(
                async move {
                    let (outcomes, failure) = run_worker(&ctx, targets).await;
                    if let Some(e) = failure {
                        error!(error = %e, "Worker stopped");
                        if err_tx.try_send(e).is_err() {
                            warn!("Error channel full, dropping worker error");
                        }
                    }
                    outcomes
                }
                .instrument(span),
            );
        }
        drop(err_tx);

        let mut outcomes = Vec::new();
        let mut panicked = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(done) => outcomes.extend(done),
                Err(e) => {
                    error!(error = %e, "Worker task panicked");
                    panicked.get_or_insert(BackupError::WorkerPanic(e.to_string()));
                }
            }
        }

        let mut first = None;
        while let Ok(e) = err_rx.try_recv() {
            match first {
                None => first = Some(e),
                Some(_) => error!(error = %e, "Additional backup failure"),
            }
        }

        match first.or(panicked) {
            Some(e) => Err(e),
            None => {
                info!(completed = outcomes.len(), "Backup run complete");
                Ok(RunReport {
                    valid_targets,
                    outcomes,
                })
            }
        }
    }

    /// Reject settings no worker could satisfy before touching the network.
    fn preflight(&self) -> Result<()> {
        let settings = &self.ctx.config.settings;

        if settings.location != DumpLocation::Server {
            return Err(BackupError::UnsupportedLocation(settings.location.to_string()));
        }

        if !self.ctx.registry.contains(&settings.driver) {
            error!(
                driver = %settings.driver,
                available = %self.ctx.registry.drivers().join(", "),
                "No dump generator registered for driver"
            );
            return Err(BackupError::UnsupportedDriver(settings.driver.clone()));
        }

        Ok(())
    }
}

/// Group targets by server id, keeping first-seen server order and the
/// target order within each server.
fn group_by_server(targets: Vec<Target>) -> Vec<(String, Vec<Target>)> {
    let mut groups: Vec<(String, Vec<Target>)> = Vec::new();
    for target in targets {
        match groups.iter_mut().find(|(id, _)| *id == target.server_id) {
            Some((_, group)) => group.push(target),
            None => groups.push((target.server_id.clone(), vec![target])),
        }
    }
    groups
}

/// Process one server's targets in order over a single connection.
///
/// Returns the outcomes completed before the first failure, and that
/// failure if there was one.
async fn run_worker(ctx: &AppContext, targets: Vec<Target>) -> (Vec<JobOutcome>, Option<BackupError>) {
    let mut outcomes = Vec::new();
    let Some(first) = targets.first() else {
        return (outcomes, None);
    };

    let endpoint = Endpoint::from_config(&first.server, &ctx.config.settings);
    let mut conn = Connection::new(endpoint, ctx.connector.clone());
    let executor = Executor::new(ctx);

    let address = conn.endpoint().address();

    let result: Result<()> = async {
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(BackupError::Cancelled(format!(
                    "connection to {address} abandoned"
                )));
            }
            connected = conn.connect() => connected?,
        }

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(BackupError::Cancelled(format!(
                    "liveness check of {address} abandoned"
                )));
            }
            alive = conn.test_connection() => alive?,
        }

        for target in &targets {
            if ctx.cancel.is_cancelled() {
                return Err(BackupError::Cancelled(format!(
                    "backup cancelled before database {}",
                    target.database_id
                )));
            }
            outcomes.push(executor.execute(&conn, target).await?);
        }
        Ok(())
    }
    .await;

    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close connection");
    }

    (outcomes, result.err())
}
