//! Copy-only steps: mirroring a source directory into an output directory.

use crate::clean;
use crate::util::{self, slash_path};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Clears `dst` and then copies every file under `src` into it, preserving
/// relative paths. Returns the copied paths relative to `dst`.
pub fn mirror(src: &Path, dst: &Path) -> Result<Vec<String>> {
    clean::clean_path(dst, true)?;
    copy_tree(src, dst, |_| true)
}

/// Copies every file under `src` for which `filter` (given the path relative
/// to `src`) returns true into `dst`. Existing files are overwritten; nothing
/// is deleted.
pub fn copy_tree<F>(src: &Path, dst: &Path, filter: F) -> Result<Vec<String>>
where
    F: Fn(&Path) -> bool,
{
    let mut copied = Vec::new();
    for file in util::files(src)? {
        if !filter(&file.relative) {
            continue;
        }
        let target = dst.join(&file.relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|err| Error::Io {
                path: parent.to_owned(),
                err,
            })?;
        }
        std::fs::copy(&file.absolute, &target).map_err(|err| Error::Io {
            path: file.absolute.clone(),
            err,
        })?;
        copied.push(slash_path(&file.relative));
    }
    Ok(copied)
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for copy steps.
#[derive(Debug)]
pub enum Error {
    /// Returned when clearing the destination fails.
    Clean(clean::Error),

    /// Returned when walking the source directory fails.
    Walk(walkdir::Error),

    /// Returned for I/O problems copying a file.
    Io { path: PathBuf, err: io::Error },
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Clean(err) => err.fmt(f),
            Error::Walk(err) => err.fmt(f),
            Error::Io { path, err } => write!(f, "Copying '{}': {}", path.display(), err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Clean(err) => Some(err),
            Error::Walk(err) => Some(err),
            Error::Io { path: _, err } => Some(err),
        }
    }
}

impl From<clean::Error> for Error {
    /// Converts [`clean::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: clean::Error) -> Error {
        Error::Clean(err)
    }
}

impl From<walkdir::Error> for Error {
    /// Converts [`walkdir::Error`]s into [`Error`]. This allows us to use the
    /// `?` operator.
    fn from(err: walkdir::Error) -> Error {
        Error::Walk(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::write;
    use tempfile::TempDir;

    #[test]
    fn test_mirror_removes_stale_files() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let (src, dst) = (dir.path().join("src/js"), dir.path().join("public/js"));
        write(&src.join("app.js"), "app").unwrap();
        write(&src.join("vendor/lib.js"), "lib").unwrap();
        write(&dst.join("stale.js"), "old").unwrap();

        let copied = mirror(&src, &dst)?;
        assert_eq!(vec!["app.js".to_owned(), "vendor/lib.js".to_owned()], copied);
        assert!(!dst.join("stale.js").exists());
        assert_eq!("lib", std::fs::read_to_string(dst.join("vendor/lib.js")).unwrap());
        Ok(())
    }

    #[test]
    fn test_mirror_missing_source_empties_destination() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("public/fonts");
        write(&dst.join("old.woff2"), "x").unwrap();
        assert!(mirror(&dir.path().join("src/fonts"), &dst)?.is_empty());
        assert!(!dst.exists());
        Ok(())
    }

    #[test]
    fn test_copy_tree_filter() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let (src, dst) = (dir.path().join("a"), dir.path().join("b"));
        write(&src.join("keep.png"), "x").unwrap();
        write(&src.join("skip.txt"), "x").unwrap();
        let copied = copy_tree(&src, &dst, |p| util::has_extension(p, "png"))?;
        assert_eq!(vec!["keep.png".to_owned()], copied);
        assert!(!dst.join("skip.txt").exists());
        Ok(())
    }
}
