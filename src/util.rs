use anyhow::{anyhow, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub fn open(path: &Path, kind: &str) -> Result<File> {
    match File::open(path) {
        Err(e) => Err(anyhow!("Opening {} file `{}`: {}", kind, path.display(), e)),
        Ok(file) => Ok(file),
    }
}

/// A regular file found under some source directory. `relative` is the path
/// from that directory to the file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub absolute: PathBuf,
    pub relative: PathBuf,
}

/// Walks `dir` recursively and returns every regular file in file-name order.
/// A missing `dir` yields no files rather than an error, the same way an empty
/// glob matches nothing.
pub fn files(dir: &Path) -> walkdir::Result<Vec<SourceFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for result in WalkDir::new(dir).sort_by_file_name() {
        let entry = result?;
        if entry.file_type().is_file() {
            files.push(SourceFile {
                absolute: entry.path().to_owned(),
                // `dir` is always an ancestor of the entry
                relative: entry.path().strip_prefix(dir).unwrap_or(entry.path()).to_owned(),
            });
        }
    }
    Ok(files)
}

/// Lists the regular files directly inside `dir` (no recursion) whose
/// extension is `extension`.
pub fn top_level_files(dir: &Path, extension: &str) -> walkdir::Result<Vec<SourceFile>> {
    Ok(files(dir)?
        .into_iter()
        .filter(|f| f.relative.components().count() == 1 && has_extension(&f.relative, extension))
        .collect())
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

/// Writes `contents` to `path`, creating parent directories as needed.
pub fn write(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}

/// Renders a relative path with forward slashes regardless of platform, for
/// template names and URLs.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
