pub mod archiver;
pub mod download;
pub mod executor;
pub mod models;
pub mod naming;
pub mod progress;
pub mod scheduler;

pub use archiver::archive_superseded;
pub use download::{DownloadReport, Downloader};
pub use executor::{BackupJob, Executor};
pub use models::{ArchiveMove, JobOutcome, JobState, RunReport, Target};
pub use naming::dump_file_name;
pub use progress::{ProgressTracker, TransferProgress};
pub use scheduler::{Scheduler, Selection};
