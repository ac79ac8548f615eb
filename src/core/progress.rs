//! In-memory progress tracking for active downloads.
//!
//! The downloader is the only writer of a job's [`TransferProgress`];
//! everything else reads snapshots from the [`ProgressTracker`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Bytes received so far against the size reported by the remote host.
///
/// A `total_bytes` of 0 means the size is unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
        }
    }

    pub fn percentage(&self) -> Option<f64> {
        if self.total_bytes == 0 {
            return None;
        }
        Some(self.bytes_transferred as f64 / self.total_bytes as f64 * 100.0)
    }
}

impl fmt::Display for TransferProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.percentage() {
            Some(pct) => write!(
                f,
                "{:.1}% ({}/{} bytes)",
                pct, self.bytes_transferred, self.total_bytes
            ),
            None => write!(f, "{} bytes", self.bytes_transferred),
        }
    }
}

/// Thread-safe store of live progress, keyed by job id.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<HashMap<String, TransferProgress>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, job_id: &str, progress: TransferProgress) {
        let mut map = self.inner.write().await;
        map.insert(job_id.to_string(), progress);
    }

    pub async fn get(&self, job_id: &str) -> Option<TransferProgress> {
        let map = self.inner.read().await;
        map.get(job_id).copied()
    }

    /// Called once the job finishes, successfully or not.
    pub async fn remove(&self, job_id: &str) {
        let mut map = self.inner.write().await;
        map.remove(job_id);
    }
}
