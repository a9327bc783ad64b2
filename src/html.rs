//! Renders page templates into the staging tree. Every top-level
//! `{source}/*.html` is a page; every `.html` file in a subdirectory is a
//! partial, registered under its relative path so pages can pull it in with
//! `{{template "partials/header.html" .}}`. Rendered pages have blank lines
//! removed and their local script/stylesheet references cache-busted (see
//! [`crate::cachebust`]).

use crate::cachebust;
use crate::util::{self, slash_path, SourceFile};
use chrono::Datelike;
use gtmpl::Value;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Values exposed to every template.
pub struct Globals {
    pub current_year: i32,
}

impl Globals {
    pub fn now() -> Globals {
        Globals {
            current_year: chrono::Local::now().year(),
        }
    }
}

/// The outcome of a render run. `pages` lists the rendered output paths
/// relative to the output directory.
#[derive(Debug, Default)]
pub struct Report {
    pub pages: Vec<String>,
    pub failed: usize,
}

/// Renders every page in `source_directory` into `output_directory`. A page
/// that fails to load or render is logged and skipped; the remaining pages
/// are still rendered. Only problems that affect every page (walking the
/// source directory, reading partials) are returned as errors.
pub fn render_pages(source_directory: &Path, output_directory: &Path) -> Result<Report> {
    let all = util::files(source_directory)?;
    let partials = load_partials(&all)?;
    let globals = Globals::now();
    let token = cachebust::timestamp_token();

    let mut report = Report::default();
    for page in all.iter().filter(|f| is_page(f)) {
        let output_path = output_directory.join(&page.relative);
        match render_page(&partials, page, &globals, &token)
            .and_then(|html| write_page(&output_path, &html))
        {
            Ok(()) => {
                debug!(page = %page.relative.display(), "rendered");
                report.pages.push(slash_path(&page.relative));
            }
            Err(err) => {
                error!(page = %page.relative.display(), error = %err, "rendering page");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

fn is_page(file: &SourceFile) -> bool {
    file.relative.components().count() == 1 && util::has_extension(&file.relative, "html")
}

fn is_partial(file: &SourceFile) -> bool {
    file.relative.components().count() > 1 && util::has_extension(&file.relative, "html")
}

// Loads every partial and wraps each in a `define` block named after its
// relative path. The result is prepended to each page before parsing.
fn load_partials(files: &[SourceFile]) -> Result<String> {
    let mut contents = String::new();
    for partial in files.iter().filter(|f| is_partial(f)) {
        contents.push_str(&format!("{{{{define \"{}\"}}}}", slash_path(&partial.relative)));
        read_into(&partial.absolute, &mut contents)?;
        contents.push_str("{{end}}");
    }
    Ok(contents)
}

fn render_page(partials: &str, page: &SourceFile, globals: &Globals, token: &str) -> Result<String> {
    let mut contents = partials.to_owned();
    read_into(&page.absolute, &mut contents)?;
    let rendered = gtmpl::template(&contents, Value::from(globals)).map_err(|e| Error::Template {
        path: page.absolute.clone(),
        message: e.to_string(),
    })?;
    Ok(cachebust::bust(&remove_empty_lines(&rendered), token))
}

fn write_page(path: &Path, html: &str) -> Result<()> {
    util::write(path, html).map_err(|err| Error::Io {
        path: path.to_owned(),
        err,
    })
}

fn read_into(path: &Path, contents: &mut String) -> Result<()> {
    use std::io::Read;
    File::open(path)
        .and_then(|mut f| f.read_to_string(contents))
        .map(|_| ())
        .map_err(|err| Error::Io {
            path: path.to_owned(),
            err,
        })
}

/// Drops every line that is empty or contains only whitespace.
pub fn remove_empty_lines(text: &str) -> String {
    let mut out: String = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if text.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    out
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for template rendering.
#[derive(Debug)]
pub enum Error {
    /// Returned when walking the template directory fails.
    Walk(walkdir::Error),

    /// Returned for I/O problems reading a template or writing a page.
    Io { path: PathBuf, err: io::Error },

    /// Returned when a template fails to parse or execute.
    Template { path: PathBuf, message: String },
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Walk(err) => err.fmt(f),
            Error::Io { path, err } => write!(f, "'{}': {}", path.display(), err),
            Error::Template { path, message } => {
                write!(f, "Rendering template '{}': {}", path.display(), message)
            }
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Walk(err) => Some(err),
            Error::Io { path: _, err } => Some(err),
            Error::Template { .. } => None,
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
