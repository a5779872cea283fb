//! Pruning of old backups in a plan's storage directory.
//!
//! Archives and logs are pruned as two independent classes. Each class is
//! ordered by modification time, so a restored or touched file counts as
//! recent regardless of the timestamp in its name.

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use derive_more::{Display, Error};

/// Kind of file produced by a backup run.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum ArtifactClass {
    /// Compressed database export.
    #[display("gz")]
    Archive,
    /// Captured output of the dump tool.
    #[display("log")]
    Log,
}

impl ArtifactClass {
    /// All classes, in the order they are pruned.
    pub const ALL: [ArtifactClass; 2] = [ArtifactClass::Archive, ArtifactClass::Log];

    /// File extension of the class, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactClass::Archive => "gz",
            ArtifactClass::Log => "log",
        }
    }

    fn matches(self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == self.extension())
    }
}

/// Errors on enforcing the retention policy.
#[derive(Debug, Display, Error)]
pub enum RetentionError {
    /// The storage directory couldn't be listed.
    #[display("Listing old {class} files in {} failed: {source}", dir.display())]
    ReadDir {
        class: ArtifactClass,
        dir: PathBuf,
        source: io::Error,
    },
    /// The modification time of a file couldn't be determined.
    #[display("Reading modification time of {} failed: {source}", path.display())]
    Metadata { path: PathBuf, source: io::Error },
    /// An old file couldn't be deleted.
    #[display("Removing old {class} files from {} failed at {}: {source}", dir.display(), path.display())]
    Remove {
        class: ArtifactClass,
        dir: PathBuf,
        path: PathBuf,
        source: io::Error,
    },
}

/// Files deleted by [enforce].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pruned {
    pub archives: Vec<PathBuf>,
    pub logs: Vec<PathBuf>,
}

impl Pruned {
    /// Total number of deleted files.
    pub fn len(&self) -> usize {
        self.archives.len() + self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps the `keep` most recent files of every [ArtifactClass] in `dir` and
/// deletes the rest.
///
/// Classes are pruned one after another. The first failure aborts the run,
/// leaving the remaining classes untouched.
pub fn enforce(dir: &Path, keep: NonZeroUsize) -> Result<Pruned, RetentionError> {
    let mut pruned = Pruned::default();

    for class in ArtifactClass::ALL {
        let removed = enforce_class(dir, class, keep)?;
        match class {
            ArtifactClass::Archive => pruned.archives = removed,
            ArtifactClass::Log => pruned.logs = removed,
        }
    }

    Ok(pruned)
}

fn enforce_class(
    dir: &Path,
    class: ArtifactClass,
    keep: NonZeroUsize,
) -> Result<Vec<PathBuf>, RetentionError> {
    let mut files = class_files(dir, class)?;
    if files.len() <= keep.get() {
        log::trace!(target: "backup::retention", "{} {class} file(s) in {}, nothing to prune", files.len(), dir.display());
        return Ok(Vec::new());
    }

    // newest first, ties broken by name for a stable order
    files.sort_by(|(a_time, a_path), (b_time, b_path)| {
        b_time.cmp(a_time).then_with(|| b_path.cmp(a_path))
    });

    let mut removed = Vec::new();
    for (_, path) in files.into_iter().skip(keep.get()) {
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!(target: "backup::retention", "Removed {}", path.display());
                removed.push(path);
            }
            // already gone
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(RetentionError::Remove {
                    class,
                    dir: dir.to_path_buf(),
                    path,
                    source,
                })
            }
        }
    }
    log::info!(target: "backup::retention", "Pruned {} old {class} file(s) from {}", removed.len(), dir.display());

    Ok(removed)
}

fn class_files(dir: &Path, class: ArtifactClass) -> Result<Vec<(SystemTime, PathBuf)>, RetentionError> {
    let read_err = |source: io::Error| RetentionError::ReadDir {
        class,
        dir: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        if !class.matches(&path) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => return Err(RetentionError::Metadata { path, source }),
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata
            .modified()
            .map_err(|source| RetentionError::Metadata {
                path: path.clone(),
                source,
            })?;

        files.push((modified, path));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::time::Duration;

    use super::*;

    fn keep(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    /// Creates `name` in `dir` with a modification time `age_secs` in the past.
    fn touch(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    }

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn keeps_the_newest_by_modification_time() {
        let dir = tempfile::tempdir().unwrap();
        // names deliberately disagree with the modification times
        touch(dir.path(), "orders-1.gz", 10);
        touch(dir.path(), "orders-2.gz", 500);
        touch(dir.path(), "orders-3.gz", 20);
        touch(dir.path(), "orders-4.gz", 300);
        touch(dir.path(), "orders-5.gz", 400);

        let pruned = enforce(dir.path(), keep(2)).unwrap();

        assert_eq!(pruned.archives.len(), 3);
        assert!(pruned.logs.is_empty());
        assert_eq!(names(dir.path()), ["orders-1.gz", "orders-3.gz"]);
    }

    #[test]
    fn compliant_directory_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "orders-1.gz", 30);
        touch(dir.path(), "orders-1.log", 30);

        let pruned = enforce(dir.path(), keep(3)).unwrap();

        assert!(pruned.is_empty());
        assert_eq!(names(dir.path()), ["orders-1.gz", "orders-1.log"]);
    }

    #[test]
    fn enforcing_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            touch(dir.path(), &format!("orders-{i}.gz"), 100 - i * 10);
            touch(dir.path(), &format!("orders-{i}.log"), 100 - i * 10);
        }

        let first = enforce(dir.path(), keep(3)).unwrap();
        let after_first = names(dir.path());
        let second = enforce(dir.path(), keep(3)).unwrap();

        assert_eq!(first.len(), 6);
        assert!(second.is_empty());
        assert_eq!(names(dir.path()), after_first);
        assert_eq!(
            after_first,
            [
                "orders-3.gz",
                "orders-3.log",
                "orders-4.gz",
                "orders-4.log",
                "orders-5.gz",
                "orders-5.log"
            ]
        );
    }

    #[test]
    fn classes_are_ordered_independently() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "orders-1.gz", 10);
        touch(dir.path(), "orders-2.gz", 20);
        // the log of the older run was touched later
        touch(dir.path(), "orders-1.log", 20);
        touch(dir.path(), "orders-2.log", 10);

        enforce(dir.path(), keep(1)).unwrap();

        assert_eq!(names(dir.path()), ["orders-1.gz", "orders-2.log"]);
    }

    #[test]
    fn unrelated_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "orders-1.gz", 10);
        touch(dir.path(), "orders-2.gz", 20);
        touch(dir.path(), "README", 30);
        touch(dir.path(), "orders.toml", 40);
        fs::create_dir(dir.path().join("nested.gz")).unwrap();

        enforce(dir.path(), keep(1)).unwrap();

        assert_eq!(names(dir.path()), ["README", "nested.gz", "orders-1.gz", "orders.toml"]);
    }

    #[test]
    fn missing_directory_reports_class() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");

        let err = enforce(&missing, keep(1)).unwrap_err();

        assert!(matches!(
            err,
            RetentionError::ReadDir {
                class: ArtifactClass::Archive,
                ..
            }
        ));
        assert!(err.to_string().contains("gz"));
    }
}
