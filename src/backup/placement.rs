//! Moving dump artifacts from the temp area into permanent storage.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Creates `dir` and its parents. An existing directory is fine.
pub fn ensure_dir(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

/// Moves `file` into `dir`, keeping its file name, and returns the new path.
///
/// Falls back to copy and remove if `file` and `dir` live on different
/// filesystems.
pub fn move_into(file: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no file name", file.display()),
        )
    })?;
    let dest = dir.join(name);

    match fs::rename(file, &dest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            log::debug!(target: "backup::placement", "{} crosses filesystems, copying", file.display());
            fs::copy(file, &dest)?;
            fs::remove_file(file)?;
        }
        Err(e) => return Err(e),
    }
    log::trace!(target: "backup::placement", "Moved {} to {}", file.display(), dest.display());

    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_dir_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("orders");

        ensure_dir(&dir).unwrap();
        ensure_dir(&dir).unwrap();

        assert!(dir.is_dir());
    }

    #[test]
    fn move_into_keeps_the_file_name() {
        let root = tempfile::tempdir().unwrap();
        let src = root.path().join("orders-1000.gz");
        let dir = root.path().join("orders");
        fs::write(&src, b"archive").unwrap();
        ensure_dir(&dir).unwrap();

        let dest = move_into(&src, &dir).unwrap();

        assert_eq!(dest, dir.join("orders-1000.gz"));
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"archive");
    }

    #[test]
    fn move_into_missing_source_fails() {
        let root = tempfile::tempdir().unwrap();

        let err = move_into(&root.path().join("missing.gz"), root.path()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
