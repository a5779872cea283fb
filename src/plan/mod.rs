//! Backup plans: which database to dump, how long a dump may take and how
//! many backups to keep.
//!
//! Plans are stored as TOML files, one plan per file:
//!
//! ```toml
//! name = "orders"
//!
//! [target]
//! host = "db.internal"
//! port = 27017
//! database = "orders"
//!
//! [scheduler]
//! retention = 3
//! timeout = 10
//! ```

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use derive_more::{Display, Error};

/// A named backup configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Plan {
    /// Name of the plan, used for the storage directory and artifact names.
    ///
    /// When omitted in a plan file, the file stem is used instead.
    #[serde(default)]
    pub name: String,

    /// Database to back up.
    pub target: Target,

    /// Timeout and retention policy.
    #[serde(default)]
    pub scheduler: Scheduler,
}

/// Connection parameters of the database to back up.
#[derive(Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Target {
    /// Name of the database to export.
    pub database: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,
}

impl Target {
    /// Returns the credentials if *both* username and password are set.
    ///
    /// A half configured login is treated like no login at all.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((&self.username, &self.password))
        }
    }
}

// keep the password out of logs
impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let password = if self.password.is_empty() { "" } else { "***" };
        f.debug_struct("Target")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &password)
            .finish()
    }
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    27017
}

/// Runtime bounds of a plan.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Deserialize)]
pub struct Scheduler {
    /// Number of most recent backups to keep. `0` keeps everything.
    #[serde(default)]
    pub retention: usize,

    /// Maximum runtime of the dump in minutes. `0` disables the deadline.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self {
            retention: 0,
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    60
}

impl Scheduler {
    /// Deadline of the dump process, [None] if unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout.saturating_mul(60)))
    }
}

/// Errors on loading a [Plan] from disk.
#[derive(Debug, Display, Error)]
pub enum PlanError {
    /// The plan file or directory couldn't be read.
    #[display("Reading plan {} failed: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    /// The plan file isn't a valid plan.
    #[display("Parsing plan {} failed: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// The plan name can't be used as a directory name.
    #[display("Plan {} has an invalid name: {name:?}", path.display())]
    InvalidName { path: PathBuf, name: String },
}

/// Returns `true` if `name` is a single plain path component.
///
/// Plan names become directory and file names below the storage root and
/// the temp area, so separators, `.` and `..` are not allowed.
pub fn is_valid_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

impl Plan {
    /// Loads a single plan from a TOML file.
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let mut plan: Plan = toml::from_str(&content).map_err(|source| PlanError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        if plan.name.is_empty() {
            if let Some(stem) = path.file_stem() {
                plan.name = stem.to_string_lossy().into_owned();
            }
        }
        if !is_valid_name(&plan.name) {
            return Err(PlanError::InvalidName {
                path: path.to_path_buf(),
                name: plan.name,
            });
        }
        log::debug!(target: "plan", "Loaded plan {} from {}", plan.name, path.display());

        Ok(plan)
    }

    /// Loads every `*.toml` plan in `dir`, ordered by file name.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, PlanError> {
        let read_err = |source: io::Error| PlanError::Read {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                files.push(path);
            }
        }
        files.sort();

        files.iter().map(|path| Plan::load(path)).collect()
    }
}
