//! Compiles Sass sources into plain stylesheets with [`grass`].

use crate::util::{self, slash_path};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Compiles every `.scss` file under `source_directory` into
/// `output_directory`, keeping relative paths and swapping the extension for
/// `.css`. Partials (names starting with `_`) are importable but never
/// emitted. Returns the written paths relative to `output_directory`.
pub fn compile(source_directory: &Path, output_directory: &Path) -> Result<Vec<String>> {
    let options = grass::Options::default().load_path(source_directory);
    let mut written = Vec::new();
    for file in util::files(source_directory)? {
        if !util::has_extension(&file.relative, "scss") || is_partial(&file.relative) {
            continue;
        }
        let css = grass::from_path(&file.absolute, &options).map_err(|e| Error::Compile {
            path: file.absolute.clone(),
            message: e.to_string(),
        })?;
        let relative = file.relative.with_extension("css");
        let output_path = output_directory.join(&relative);
        util::write(&output_path, css).map_err(|err| Error::Io {
            path: output_path.clone(),
            err,
        })?;
        debug!(stylesheet = %relative.display(), "compiled");
        written.push(slash_path(&relative));
    }
    Ok(written)
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('_'))
        .unwrap_or(false)
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for style compilation.
#[derive(Debug)]
pub enum Error {
    /// Returned when walking the style directory fails.
    Walk(walkdir::Error),

    /// Returned when a stylesheet fails to compile.
    Compile { path: PathBuf, message: String },

    /// Returned for I/O problems writing compiled output.
    Io { path: PathBuf, err: io::Error },
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Walk(err) => err.fmt(f),
            Error::Compile { path, message } => {
                write!(f, "Compiling '{}': {}", path.display(), message)
            }
            Error::Io { path, err } => write!(f, "Writing '{}': {}", path.display(), err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Walk(err) => Some(err),
            Error::Compile { .. } => None,
            Error::Io { path: _, err } => Some(err),
        }
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
    fn test_compile_with_partial_import() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let (src, out) = (dir.path().join("scss"), dir.path().join("css"));
        write(&src.join("_vars.scss"), "$accent: #336699;").unwrap();
        write(&src.join("site.scss"), "@import 'vars';\n.nav { a { color: $accent; } }").unwrap();
        write(&src.join("pages/about.scss"), "body { margin: 0; }").unwrap();

        let written = compile(&src, &out)?;
        assert_eq!(vec!["pages/about.css".to_owned(), "site.css".to_owned()], written);
        let css = std::fs::read_to_string(out.join("site.css")).unwrap();
        assert!(css.contains(".nav a"));
        assert!(css.contains("#336699"));
        assert!(!out.join("_vars.css").exists());
        Ok(())
    }

    #[test]
    fn test_compile_error() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("scss");
        write(&src.join("bad.scss"), ".a { color: $undefined; }").unwrap();
        match compile(&src, &dir.path().join("css")) {
            Err(Error::Compile { .. }) => {}
            other => panic!("wanted Compile; found {:?}", other),
        }
    }

    #[test]
    fn test_compile_missing_source() -> Result<()> {
        let dir = TempDir::new().unwrap();
        assert!(compile(&dir.path().join("scss"), &dir.path().join("css"))?.is_empty());
        Ok(())
    }
}
