//! Resolves bundling directives in staged HTML pages. A directive block looks
//! like:
//!
//! ```html
//! <!-- build:js js/main.min.js -->
//! <script src="js/vendor/lib.js?t=1617000000000"></script>
//! <script src="js/app.js?t=1617000000000"></script>
//! <!-- endbuild -->
//! ```
//!
//! Every local file the block references is concatenated (in order),
//! minified, and written to the block's target; the block itself is replaced
//! by a single tag pointing at the target. `build:css` blocks work the same
//! way with `<link href>`s and `build:remove` blocks are simply dropped. An
//! alternate search path can be given in parentheses, e.g.
//! `build:js(vendor) js/vendor.min.js`, in which case references resolve
//! against that directory (relative to the staging root) instead of the
//! page's own directory.
//!
//! Targets must stay inside the output directory: a target with `..` or a
//! drive or root prefix is rejected. A leading `/` is read as relative to the
//! site root.

use crate::minify;
use crate::url::{self, Reference};
use crate::util::{self, slash_path};
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Js,
    Css,
    Remove,
}

impl BlockKind {
    fn parse(s: &str) -> Option<BlockKind> {
        match s.to_ascii_lowercase().as_str() {
            "js" => Some(BlockKind::Js),
            "css" => Some(BlockKind::Css),
            "remove" => Some(BlockKind::Remove),
            _ => None,
        }
    }

    /// The tag that stands in for the block in the rewritten page.
    fn replacement(&self, target: &str) -> String {
        match self {
            BlockKind::Js => format!(r#"<script src="{}"></script>"#, target),
            BlockKind::Css => format!(r#"<link rel="stylesheet" href="{}">"#, target),
            BlockKind::Remove => String::new(),
        }
    }
}

/// A single directive block found in a page.
#[derive(Debug, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,

    /// The bundle path as written in the directive, relative to the output
    /// root. Empty for `remove` blocks.
    pub target: String,

    /// The alternate search path, if one was given.
    pub search_path: Option<String>,

    /// The referenced local paths in document order, with cache-busting
    /// queries removed.
    pub references: Vec<String>,

    /// The byte range of the whole block (both comments included).
    start: usize,
    end: usize,
}

/// Finds every directive block in `html`.
pub fn parse_blocks(html: &str) -> Result<Vec<Block>> {
    let mut blocks = Vec::new();
    for caps in block_regex().captures_iter(html) {
        let whole = match caps.get(0) {
            Some(whole) => whole,
            None => continue,
        };
        let kind = BlockKind::parse(&caps[1]).ok_or_else(|| Error::UnknownBlockType(caps[1].to_owned()))?;
        let target = caps.get(3).map(|m| m.as_str().to_owned()).unwrap_or_default();
        if target.is_empty() && kind != BlockKind::Remove {
            return Err(Error::MissingTarget(caps[1].to_owned()));
        }
        if kind != BlockKind::Remove && output_path(&target).is_none() {
            return Err(Error::UnsafeTarget(target));
        }
        let references = match kind {
            BlockKind::Js => references(script_regex(), &caps[4])?,
            BlockKind::Css => references(link_regex(), &caps[4])?,
            BlockKind::Remove => Vec::new(),
        };
        blocks.push(Block {
            kind,
            target,
            search_path: caps.get(2).map(|m| m.as_str().trim().to_owned()),
            references,
            start: whole.start(),
            end: whole.end(),
        });
    }
    Ok(blocks)
}

/// Maps a directive target to a path under the output directory, or `None`
/// if it would land outside it.
pub fn output_path(target: &str) -> Option<PathBuf> {
    let relative = Path::new(target.trim_start_matches('/'));
    let mut path = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

fn references(regex: &Regex, body: &str) -> Result<Vec<String>> {
    let mut refs = Vec::new();
    for caps in regex.captures_iter(body) {
        let value = match (caps.get(1), caps.get(2)) {
            (Some(v), _) | (None, Some(v)) => v.as_str(),
            (None, None) => continue,
        };
        match Reference::parse(value) {
            Reference::Local(path) => refs.push(path.to_owned()),
            Reference::External => return Err(Error::ExternalReference(value.to_owned())),
        }
    }
    Ok(refs)
}

/// A bundle to be written: the concatenation of `sources` goes to `target`.
#[derive(Debug, PartialEq, Eq)]
pub struct Bundle {
    pub kind: BlockKind,
    pub target: String,
    pub sources: Vec<PathBuf>,
}

/// The result of processing a page.
#[derive(Debug)]
pub struct Processed {
    pub html: String,
    pub bundles: Vec<Bundle>,
}

/// Rewrites `html` (which lives in `page_directory`, inside the staging tree
/// at `root`) and resolves each block's references to files.
pub fn process(html: &str, root: &Path, page_directory: &Path) -> Result<Processed> {
    let blocks = parse_blocks(html)?;
    let mut out = String::with_capacity(html.len());
    let mut bundles = Vec::new();
    let mut cursor = 0;

    for block in blocks {
        out.push_str(&html[cursor..block.start]);
        out.push_str(&block.kind.replacement(&block.target));
        cursor = block.end;

        if block.kind == BlockKind::Remove {
            continue;
        }
        let base = match &block.search_path {
            Some(search_path) => root.join(search_path),
            None => page_directory.to_owned(),
        };
        bundles.push(Bundle {
            kind: block.kind,
            sources: block
                .references
                .iter()
                .map(|r| url::resolve(root, &base, r))
                .collect(),
            target: block.target,
        });
    }
    out.push_str(&html[cursor..]);

    Ok(Processed { html: out, bundles })
}

/// The outcome of [`bundle_pages`]. Paths are relative to the output
/// directory.
#[derive(Debug, Default)]
pub struct Report {
    pub pages: Vec<String>,
    pub bundles: Vec<String>,
}

/// Processes every top-level page in `staging_directory`, writing rewritten
/// pages and minified bundles into `output_directory`. A bundle target shared
/// by several pages is written once, from the first page (in name order)
/// that names it.
pub fn bundle_pages(staging_directory: &Path, output_directory: &Path) -> Result<Report> {
    let mut report = Report::default();
    let mut written: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();

    for page in util::top_level_files(staging_directory, "html")? {
        let html = read(&page.absolute)?;
        let processed = process(&html, staging_directory, staging_directory)
            .map_err(|e| Error::Page {
                path: page.absolute.clone(),
                err: Box::new(e),
            })?;

        for bundle in processed.bundles {
            let target = output_path(&bundle.target).ok_or_else(|| Error::UnsafeTarget(bundle.target.clone()))?;
            if let Some(sources) = written.get(&target) {
                if *sources != bundle.sources {
                    warn!(
                        bundle = %bundle.target,
                        page = %page.relative.display(),
                        "bundle already written from different sources; keeping the first"
                    );
                }
                continue;
            }
            // An empty statement between scripts keeps a file without a
            // trailing semicolon from running into the next one.
            let minified = match bundle.kind {
                BlockKind::Js => minify::js(&concatenate(&bundle.sources, "\n;\n")?),
                BlockKind::Css => minify::css(&concatenate(&bundle.sources, "\n")?),
                BlockKind::Remove => continue,
            }
            .map_err(|err| Error::Minify {
                target: bundle.target.clone(),
                err,
            })?;
            write(&output_directory.join(&target), &minified)?;
            debug!(bundle = %bundle.target, sources = bundle.sources.len(), "bundled");
            report.bundles.push(slash_path(&target));
            written.insert(target, bundle.sources);
        }

        write(&output_directory.join(&page.relative), &processed.html)?;
        report.pages.push(slash_path(&page.relative));
    }
    Ok(report)
}

fn concatenate(sources: &[PathBuf], separator: &str) -> Result<String> {
    let mut parts = Vec::with_capacity(sources.len());
    for source in sources {
        parts.push(read(source)?);
    }
    Ok(parts.join(separator))
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|err| Error::Io {
        path: path.to_owned(),
        err,
    })
}

fn write(path: &Path, contents: &str) -> Result<()> {
    util::write(path, contents).map_err(|err| Error::Io {
        path: path.to_owned(),
        err,
    })
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)<!--\s*build:(\w+)(?:\(([^)]*)\))?(?:\s+(\S+))?\s*-->(.*?)<!--\s*endbuild\s*-->",
        )
        .unwrap()
    })
}

fn script_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<script\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}

fn link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<link\b[^>]*?\shref\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for bundling.
#[derive(Debug)]
pub enum Error {
    /// Returned for a `build:<type>` other than `js`, `css`, or `remove`.
    UnknownBlockType(String),

    /// Returned when a `js` or `css` block names no target.
    MissingTarget(String),

    /// Returned when a block's target would be written outside the output
    /// directory.
    UnsafeTarget(String),

    /// Returned when a block references a remote URL, which can't be
    /// concatenated.
    ExternalReference(String),

    /// Wraps an error with the page it occurred in.
    Page { path: PathBuf, err: Box<Error> },

    /// Returned when a bundle fails to parse or minify.
    Minify { target: String, err: minify::Error },

    /// Returned when walking the staging directory fails.
    Walk(walkdir::Error),

    /// Returned for I/O problems reading sources or writing output.
    Io { path: PathBuf, err: io::Error },
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownBlockType(kind) => write!(f, "Unknown bundling block type '{}'", kind),
            Error::MissingTarget(kind) => write!(f, "'build:{}' block has no target", kind),
            Error::UnsafeTarget(t) => write!(f, "Bundle target '{}' is outside the output directory", t),
            Error::ExternalReference(r) => write!(f, "Can't bundle remote reference '{}'", r),
            Error::Page { path, err } => write!(f, "Bundling '{}': {}", path.display(), err),
            Error::Minify { target, err } => write!(f, "Bundle '{}': {}", target, err),
            Error::Walk(err) => err.fmt(f),
            Error::Io { path, err } => write!(f, "'{}': {}", path.display(), err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Page { path: _, err } => Some(err.as_ref()),
            Error::Minify { target: _, err } => Some(err),
            Error::Walk(err) => Some(err),
            Error::Io { path: _, err } => Some(err),
            _ => None,
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
