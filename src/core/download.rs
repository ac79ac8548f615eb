//! Streams a remote file to local storage.
//!
//! The file is read through `cat` over a dedicated session, one chunk at a
//! time, so a dump never has to fit in memory.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::progress::{ProgressTracker, TransferProgress};
use crate::error::{BackupError, Result};
use crate::logging::LogThrottle;
use crate::remote::{Connection, shell_quote};

pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub local_path: PathBuf,
    pub progress: TransferProgress,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct Downloader {
    chunk_size: usize,
    tracker: ProgressTracker,
}

impl Downloader {
    pub fn new(tracker: ProgressTracker) -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            tracker,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Copy `remote_path` into `local_dir`, keeping its base name.
    ///
    /// A failed transfer leaves the partial local file in place.
    pub async fn download(
        &self,
        conn: &Connection,
        job_id: &str,
        remote_path: &str,
        local_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadReport> {
        let started = Instant::now();
        let quoted = shell_quote(remote_path);

        let total_bytes = self.remote_size(conn, remote_path, &quoted).await?;
        let local_path = local_path_for(remote_path, local_dir);

        let mut file = tokio::fs::File::create(&local_path)
            .await
            .map_err(|e| BackupError::io(&local_path, e))?;

        let mut stream = conn.open_output_stream(&format!("cat {quoted}")).await?;

        let mut progress = TransferProgress::new(total_bytes);
        self.tracker.update(job_id, progress).await;

        let throttle = LogThrottle::new(PROGRESS_LOG_INTERVAL);
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(BackupError::Cancelled(format!(
                        "download of {remote_path} interrupted"
                    )));
                }
                read = stream.read(&mut buf) => read.map_err(|source| BackupError::Transfer {
                    path: remote_path.to_string(),
                    source,
                })?,
            };

            if n == 0 {
                break;
            }

            file.write_all(&buf[..n])
                .await
                .map_err(|e| BackupError::io(&local_path, e))?;

            progress.bytes_transferred += n as u64;
            self.tracker.update(job_id, progress).await;

            if throttle.should_log() {
                info!(job_id = %job_id, progress = %progress, "Downloading dump");
            }
        }

        file.flush()
            .await
            .map_err(|e| BackupError::io(&local_path, e))?;
        drop(file);

        let status = stream.wait().await?;
        if status != 0 {
            return Err(BackupError::RemoteProcess {
                path: remote_path.to_string(),
                status,
            });
        }

        let elapsed = started.elapsed();
        info!(
            job_id = %job_id,
            path = %local_path.display(),
            bytes = progress.bytes_transferred,
            time = format!("{:.2} sec", elapsed.as_secs_f64()),
            "Download complete"
        );

        Ok(DownloadReport {
            local_path,
            progress,
            elapsed,
        })
    }

    async fn remote_size(&self, conn: &Connection, remote_path: &str, quoted: &str) -> Result<u64> {
        let output = conn.run_command(&format!("stat -c %s {quoted}")).await?;
        let size_error = |reason: String| BackupError::SizeQuery {
            path: remote_path.to_string(),
            reason,
        };

        if !output.success() {
            return Err(size_error(format!(
                "stat exited with status {}: {}",
                output.status,
                output.output.trim()
            )));
        }

        let size = parse_size(&output.output)
            .ok_or_else(|| size_error(format!("unexpected output '{}'", output.output.trim())))?;

        debug!(path = %remote_path, size, "Remote size resolved");
        Ok(size)
    }
}

pub fn parse_size(output: &str) -> Option<u64> {
    output.trim().parse().ok()
}

/// Local destination for a remote dump: same base name, under `local_dir`.
pub fn local_path_for(remote_path: &str, local_dir: &Path) -> PathBuf {
    match Path::new(remote_path).file_name() {
        Some(name) => local_dir.join(name),
        None => local_dir.join(remote_path),
    }
}
