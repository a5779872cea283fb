//! Export of a plan's database using an external dump tool.
//!
//! The tool is invoked with the `mongodump` flag grammar:
//!
//! ```text
//! <tool> --archive=<path> --gzip --host <h> --port <p> --db <d> [-u <user> -p <pass>]
//! ```

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;

use chrono::{DateTime, Utc};
use derive_more::{Display, Error};

use crate::plan::Plan;
use crate::util::process::{self, collapse, ProcessError};

/// Dump tool used if none is configured.
pub const DEFAULT_TOOL: &str = "mongodump";

const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

/// Files produced by a successful dump, located in the temp area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
    /// Compressed export.
    pub archive: PathBuf,
    /// Captured tool output. [None] if the tool didn't print anything.
    pub log: Option<PathBuf>,
}

/// Errors on dumping a database.
#[derive(Debug, Display, Error)]
pub enum DumpError {
    /// The dump tool couldn't be run.
    #[display("Running dump for {} failed: {source}", archive.display())]
    Exec {
        archive: PathBuf,
        source: ProcessError,
    },
    /// The dump tool exited unsuccessfully.
    #[display("Dump for {} failed with {status}, log: {output}", archive.display())]
    Failed {
        archive: PathBuf,
        status: ExitStatus,
        output: String,
    },
    /// The dump tool exceeded the plan's timeout and was killed.
    #[display("Dump for {} timed out after {}s, log: {output}", archive.display(), timeout.as_secs())]
    TimedOut {
        archive: PathBuf,
        timeout: Duration,
        output: String,
    },
    /// The captured output couldn't be saved.
    #[display("Writing log {} failed: {source}", log.display())]
    WriteLog {
        archive: PathBuf,
        log: PathBuf,
        source: std::io::Error,
    },
}

impl DumpError {
    /// Archive the failed dump was writing to.
    ///
    /// The file may be missing or incomplete.
    pub fn archive(&self) -> &Path {
        match self {
            DumpError::Exec { archive, .. }
            | DumpError::Failed { archive, .. }
            | DumpError::TimedOut { archive, .. }
            | DumpError::WriteLog { archive, .. } => archive,
        }
    }

    /// Returns `true` if the dump was killed because of its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DumpError::TimedOut { .. })
    }
}

/// Errors on querying the version of the dump tool.
#[derive(Debug, Display, Error)]
pub enum VersionError {
    /// The dump tool couldn't be run.
    #[display("Checking dump tool version failed: {_0}")]
    Exec(ProcessError),
    /// The dump tool exited unsuccessfully.
    #[display("Checking dump tool version failed with {status}: {output}")]
    Failed { status: ExitStatus, output: String },
}

/// Invokes the external dump tool.
#[derive(Debug, Clone)]
pub struct Dumper {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl Default for Dumper {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL)
    }
}

impl Dumper {
    /// Create a [Dumper] running `program`, looked up in `PATH` if relative.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Arguments passed before the dump flags, e.g. when the tool is run
    /// through a wrapper like `docker exec <container> mongodump`.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn base_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.leading_args);
        command
    }

    /// Builds the dump command of `plan` writing to `archive`.
    pub fn command(&self, plan: &Plan, archive: &Path) -> Command {
        let target = &plan.target;

        let mut archive_arg = OsString::from("--archive=");
        archive_arg.push(archive);

        let mut command = self.base_command();
        command
            .arg(archive_arg)
            .arg("--gzip")
            .arg("--host")
            .arg(&target.host)
            .arg("--port")
            .arg(target.port.to_string())
            .arg("--db")
            .arg(&target.database);

        if let Some((username, password)) = target.credentials() {
            command.arg("-u").arg(username).arg("-p").arg(password);
        }

        command
    }

    /// Dumps the database of `plan` into `temp_dir`.
    ///
    /// Artifacts are named `<plan>-<unix seconds of timestamp>` with the
    /// extensions `.gz` and `.log`, so the plan name is expected to pass
    /// [crate::plan::is_valid_name]. The dump is killed if it exceeds the
    /// plan's timeout.
    pub fn dump(
        &self,
        plan: &Plan,
        temp_dir: &Path,
        timestamp: DateTime<Utc>,
    ) -> Result<Artifacts, DumpError> {
        self.dump_bounded(plan, temp_dir, timestamp, plan.scheduler.timeout())
    }

    pub(crate) fn dump_bounded(
        &self,
        plan: &Plan,
        temp_dir: &Path,
        timestamp: DateTime<Utc>,
        timeout: Option<Duration>,
    ) -> Result<Artifacts, DumpError> {
        let stem = artifact_stem(&plan.name, timestamp);
        let archive = temp_dir.join(format!("{stem}.gz"));
        let log = temp_dir.join(format!("{stem}.log"));

        let command = self.command(plan, &archive);
        log::info!(target: "backup::dump", "Dumping database {} of plan {}", plan.target.database, plan.name);
        log::trace!(target: "backup::dump", "Running: {}", masked(&command));

        let output = match process::run_bounded(command, timeout) {
            Ok(output) => output,
            Err(ProcessError::TimedOut {
                timeout, output, ..
            }) => {
                discard_partial(&archive);
                return Err(DumpError::TimedOut {
                    archive,
                    timeout,
                    output: collapse(&output),
                });
            }
            Err(source) => return Err(DumpError::Exec { archive, source }),
        };

        if !output.status.success() {
            discard_partial(&archive);
            return Err(DumpError::Failed {
                archive,
                status: output.status,
                output: collapse(&output.combined),
            });
        }

        let log = if output.combined.is_empty() {
            log::debug!(target: "backup::dump", "Dump of plan {} printed nothing, no log written", plan.name);
            None
        } else {
            if let Err(source) = fs::write(&log, &output.combined) {
                discard_partial(&archive);
                return Err(DumpError::WriteLog {
                    archive,
                    log,
                    source,
                });
            }
            Some(log)
        };
        log::info!(target: "backup::dump", "Finished dump of plan {} to {}", plan.name, archive.display());

        Ok(Artifacts { archive, log })
    }

    /// Returns the version banner of the dump tool on a single line.
    pub fn version(&self) -> Result<String, VersionError> {
        let mut command = self.base_command();
        command.arg("--version");

        let output = process::run_bounded(command, Some(VERSION_TIMEOUT)).map_err(VersionError::Exec)?;
        let banner = collapse(&output.combined);
        if !output.status.success() {
            return Err(VersionError::Failed {
                status: output.status,
                output: banner,
            });
        }

        Ok(banner)
    }
}

/// Common file name of the archive and log of a run, without extension.
pub fn artifact_stem(plan_name: &str, timestamp: DateTime<Utc>) -> String {
    format!("{plan_name}-{}", timestamp.timestamp())
}

fn discard_partial(archive: &Path) {
    match fs::remove_file(archive) {
        Ok(()) => log::debug!(target: "backup::dump", "Removed partial archive {}", archive.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!(target: "backup::dump", "Removing partial archive {} failed: {e}", archive.display()),
    }
}

/// Renders `command` for logging with the password replaced.
fn masked(command: &Command) -> String {
    let mut rendered = vec![command.get_program().to_string_lossy().into_owned()];
    let mut hide_next = false;
    for arg in command.get_args() {
        if hide_next {
            rendered.push("***".into());
        } else {
            rendered.push(arg.to_string_lossy().into_owned());
        }
        hide_next = arg == OsStr::new("-p");
    }
    rendered.join(" ")
}
