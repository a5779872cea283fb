//! A single backup run of a [Plan].
//!
//! A run dumps the plan's database into a temp area, moves the archive and
//! its log into `<storage root>/<plan name>/` and finally prunes old backups
//! according to the plan's retention count.
//!
//! <div class="warning">
//! Runs of different plans may happen concurrently. Two concurrent runs of
//! the <em>same</em> plan race on the storage directory and must be prevented
//! by the caller.
//! </div>

pub mod dump;
pub mod placement;

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use derive_more::{Display, Error, From};

pub use dump::{Artifacts, DumpError, Dumper, VersionError};

use crate::plan::{self, Plan};
use crate::util::retention::{self, RetentionError};

/// Coarse outcome of a run.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[display("success")]
    Success,
    #[display("failure")]
    Failure,
}

impl Status {
    /// HTTP like status code, `200` on success and `500` on failure.
    pub fn code(self) -> u16 {
        match self {
            Status::Success => 200,
            Status::Failure => 500,
        }
    }
}

/// Report of a backup run.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct BackupResult {
    /// Name of the plan.
    pub plan: String,
    /// File name of the archive. Empty if the dump never got that far.
    pub file: String,
    /// Start of the run.
    pub timestamp: DateTime<Utc>,
    /// Wall clock time of the whole run, zero unless it succeeded.
    #[serde(serialize_with = "as_secs")]
    pub duration: Duration,
    /// Size of the archive in bytes.
    pub size: u64,
    pub status: Status,
}

fn as_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl BackupResult {
    fn started(plan: &Plan, timestamp: DateTime<Utc>) -> Self {
        Self {
            plan: plan.name.clone(),
            file: String::new(),
            timestamp,
            duration: Duration::ZERO,
            size: 0,
            status: Status::Failure,
        }
    }
}

/// Errors on performing a backup run.
#[derive(Debug, Display, Error, From)]
pub enum BackupError {
    /// The plan name isn't a plain directory name.
    #[display("Plan name {name:?} is not a valid directory name")]
    InvalidName { name: String },
    /// Dumping the database failed.
    #[from]
    #[display("{_0}")]
    Dump(DumpError),
    /// The storage directory of the plan couldn't be created.
    #[display("Creating storage directory {} failed: {source}", dir.display())]
    CreateDir { dir: PathBuf, source: io::Error },
    /// The dumped archive couldn't be inspected.
    #[display("Stat of archive {} failed: {source}", path.display())]
    Stat { path: PathBuf, source: io::Error },
    /// Moving the archive into storage failed. Nothing was placed.
    #[display("Moving archive from {} to {} failed: {source}", from.display(), to.display())]
    MoveArchive {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    /// Moving the log into storage failed after the archive was placed.
    #[display(
        "Moving log from {} to {} failed, archive already placed at {}: {source}",
        from.display(),
        to.display(),
        placed_archive.display()
    )]
    MoveLog {
        from: PathBuf,
        to: PathBuf,
        placed_archive: PathBuf,
        source: io::Error,
    },
    /// The backup is stored but old backups couldn't be pruned.
    #[from]
    #[display("Retention job failed: {_0}")]
    Retention(RetentionError),
}

/// A failed run together with everything the run determined before failing.
#[derive(Debug, Display, Error)]
#[display("Backup of plan {} failed: {source}", result.plan)]
pub struct BackupFailure {
    /// Partial report, its status is always [Status::Failure].
    pub result: BackupResult,
    pub source: BackupError,
}

/// Backs up `plan` once.
///
/// The plan name must pass [plan::is_valid_name], otherwise nothing is
/// dumped. The dump is written to `temp_dir` and then moved to
/// `storage_root/<plan name>/`. Both directories are expected to exist,
/// the plan's storage directory is created on demand.
///
/// The run only succeeds if the storage directory conforms to the plan's
/// retention afterwards. Nothing is retried.
pub fn run(
    dumper: &Dumper,
    plan: &Plan,
    temp_dir: &Path,
    storage_root: &Path,
) -> Result<BackupResult, BackupFailure> {
    let started = Instant::now();
    let mut result = BackupResult::started(plan, Utc::now());
    log::info!(target: "backup", "Starting backup of plan {}", plan.name);

    match execute(dumper, plan, temp_dir, storage_root, &mut result) {
        Ok(()) => {
            result.status = Status::Success;
            result.duration = started.elapsed();
            log::info!(
                target: "backup",
                "Backup of plan {} finished in {:.1}s: {} ({} bytes)",
                plan.name,
                result.duration.as_secs_f64(),
                result.file,
                result.size
            );
            Ok(result)
        }
        Err(source) => {
            log::error!(target: "backup", "Backup of plan {} failed: {source}", plan.name);
            Err(BackupFailure { result, source })
        }
    }
}

fn execute(
    dumper: &Dumper,
    plan: &Plan,
    temp_dir: &Path,
    storage_root: &Path,
    result: &mut BackupResult,
) -> Result<(), BackupError> {
    if !plan::is_valid_name(&plan.name) {
        return Err(BackupError::InvalidName {
            name: plan.name.clone(),
        });
    }
    let plan_dir = storage_root.join(&plan.name);

    let artifacts = dumper
        .dump(plan, temp_dir, result.timestamp)
        .inspect_err(|e| result.file = file_name(e.archive()))?;
    result.file = file_name(&artifacts.archive);

    let metadata = fs::metadata(&artifacts.archive).map_err(|source| BackupError::Stat {
        path: artifacts.archive.clone(),
        source,
    })?;
    result.size = metadata.len();

    placement::ensure_dir(&plan_dir).map_err(|source| BackupError::CreateDir {
        dir: plan_dir.clone(),
        source,
    })?;

    let placed_archive =
        placement::move_into(&artifacts.archive, &plan_dir).map_err(|source| BackupError::MoveArchive {
            from: artifacts.archive.clone(),
            to: plan_dir.clone(),
            source,
        })?;

    if let Some(log) = &artifacts.log {
        placement::move_into(log, &plan_dir).map_err(|source| BackupError::MoveLog {
            from: log.clone(),
            to: plan_dir.clone(),
            placed_archive: placed_archive.clone(),
            source,
        })?;
    }
    log::debug!(target: "backup", "Placed {} in {}", result.file, plan_dir.display());

    if let Some(keep) = NonZeroUsize::new(plan.scheduler.retention) {
        let pruned = retention::enforce(&plan_dir, keep)?;
        if !pruned.is_empty() {
            log::info!(target: "backup", "Retention of plan {} removed {} file(s)", plan.name, pruned.len());
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
