//! Deletes output paths before a step regenerates them. See [`clean`].

use glob::{glob, GlobError, Pattern, PatternError};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Deletes every file or directory tree matching the glob `pattern` and
/// returns the number of matches removed. If nothing matches, the call
/// succeeds when `allow_empty` is set and fails with [`Error::NoMatch`]
/// otherwise.
pub fn clean(pattern: &str, allow_empty: bool) -> Result<usize> {
    let paths = glob(pattern).map_err(|err| Error::Pattern {
        pattern: pattern.to_owned(),
        err,
    })?;

    let mut removed = 0;
    for result in paths {
        let path = result?;
        remove(&path)?;
        debug!(path = %path.display(), "removed");
        removed += 1;
    }

    if removed == 0 && !allow_empty {
        return Err(Error::NoMatch(pattern.to_owned()));
    }
    Ok(removed)
}

/// Like [`clean`], but treats `path` literally even if it contains glob
/// metacharacters.
pub fn clean_path(path: &Path, allow_empty: bool) -> Result<usize> {
    clean(&Pattern::escape(&path.to_string_lossy()), allow_empty)
}

fn remove(path: &Path) -> Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(()),
            _ => Err(Error::Remove {
                path: path.to_owned(),
                err: e,
            }),
        },
    }
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for cleaning operations.
#[derive(Debug)]
pub enum Error {
    /// Returned when the glob pattern is malformed.
    Pattern { pattern: String, err: PatternError },

    /// Returned when a matched path can't be inspected during globbing.
    Glob(GlobError),

    /// Returned when nothing matched and empty matches weren't allowed.
    NoMatch(String),

    /// Returned for I/O problems while deleting a matched path.
    Remove { path: PathBuf, err: io::Error },
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Pattern { pattern, err } => {
                write!(f, "Invalid clean pattern '{}': {}", pattern, err)
            }
            Error::Glob(err) => err.fmt(f),
            Error::NoMatch(pattern) => write!(f, "Nothing matched '{}'", pattern),
            Error::Remove { path, err } => {
                write!(f, "Cleaning '{}': {}", path.display(), err)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pattern { pattern: _, err } => Some(err),
            Error::Glob(err) => Some(err),
            Error::NoMatch(_) => None,
            Error::Remove { path: _, err } => Some(err),
        }
    }
}

impl From<GlobError> for Error {
    /// Converts [`GlobError`]s into [`Error`]. This allows us to use the `?`
    /// operator while iterating glob matches.
    fn from(err: GlobError) -> Error {
        Error::Glob(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::write;
    use tempfile::TempDir;

    #[test]
    fn test_clean_missing_allowed() -> Result<()> {
        let dir = TempDir::new().unwrap();
        assert_eq!(0, clean_path(&dir.path().join("public"), true)?);
        Ok(())
    }

    #[test]
    fn test_clean_missing_not_allowed() {
        let dir = TempDir::new().unwrap();
        match clean_path(&dir.path().join("public"), false) {
            Err(Error::NoMatch(_)) => {}
            other => panic!("wanted NoMatch; found {:?}", other),
        }
    }

    #[test]
    fn test_clean_directory_tree() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let public = dir.path().join("public");
        write(&public.join("js/app.js"), "x").unwrap();
        write(&public.join("index.html"), "x").unwrap();
        assert_eq!(1, clean_path(&public, false)?);
        assert!(!public.exists());
        Ok(())
    }

    #[test]
    fn test_clean_glob_only_matches() -> Result<()> {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("a.css"), "x").unwrap();
        write(&dir.path().join("b.css"), "x").unwrap();
        write(&dir.path().join("c.js"), "x").unwrap();
        let pattern = format!("{}/*.css", Pattern::escape(&dir.path().to_string_lossy()));
        assert_eq!(2, clean(&pattern, false)?);
        assert!(dir.path().join("c.js").exists());
        assert!(!dir.path().join("a.css").exists());
        Ok(())
    }

    #[test]
    fn test_clean_bad_pattern() {
        match clean("[", true) {
            Err(Error::Pattern { .. }) => {}
            other => panic!("wanted Pattern; found {:?}", other),
        }
    }
}
