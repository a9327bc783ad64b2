//! Classifies asset references found in HTML (`src`/`href` values) and
//! resolves local ones to files on disk.

use std::path::{Path, PathBuf};
use url::{ParseError, Url};

/// An asset reference as written in a page.
#[derive(Debug, PartialEq, Eq)]
pub enum Reference<'a> {
    /// A path on this site, with any query string or fragment removed.
    Local(&'a str),

    /// Anything with a scheme (`https:`, `data:`, `mailto:`), a
    /// protocol-relative URL, or something that doesn't parse. These are never
    /// rewritten or read from disk.
    External,
}

impl<'a> Reference<'a> {
    pub fn parse(reference: &'a str) -> Reference<'a> {
        let trimmed = reference.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            return Reference::External;
        }
        match Url::parse(trimmed) {
            Err(ParseError::RelativeUrlWithoutBase) => Reference::Local(strip_query(trimmed)),
            _ => Reference::External,
        }
    }
}

/// Drops a `?query` and/or `#fragment` suffix.
pub fn strip_query(reference: &str) -> &str {
    match reference.find(|c| c == '?' || c == '#') {
        Some(i) => &reference[..i],
        None => reference,
    }
}

/// Resolves a local reference to a file path. Root-relative references
/// (`/css/site.css`) resolve against `root`; everything else resolves against
/// `base`, normally the directory containing the referencing page.
pub fn resolve(root: &Path, base: &Path, local: &str) -> PathBuf {
    match local.strip_prefix('/') {
        Some(rooted) => normalize(&root.join(rooted)),
        None => normalize(&base.join(local)),
    }
}

/// Collapses `.` and `..` components lexically so resolved paths compare and
/// display sensibly.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_relative() {
        fixture(Reference::Local("css/site.css"), "css/site.css");
    }

    #[test]
    fn test_parse_strips_cache_buster() {
        fixture(Reference::Local("js/app.js"), "js/app.js?t=1617000000000");
    }

    #[test]
    fn test_parse_strips_fragment() {
        fixture(Reference::Local("images/icons.svg"), "images/icons.svg#menu");
    }

    #[test]
    fn test_parse_root_relative() {
        fixture(Reference::Local("/css/site.css"), "/css/site.css");
    }

    #[test]
    fn test_parse_absolute() {
        fixture(Reference::External, "https://cdn.example.org/lib.js");
    }

    #[test]
    fn test_parse_protocol_relative() {
        fixture(Reference::External, "//cdn.example.org/lib.js");
    }

    #[test]
    fn test_parse_data() {
        fixture(Reference::External, "data:text/css,body{}");
    }

    #[test]
    fn test_parse_empty() {
        fixture(Reference::External, "  ");
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(
            PathBuf::from("/site/public/js/app.js"),
            resolve(Path::new("/site/public"), Path::new("/site/public"), "js/app.js")
        );
    }

    #[test]
    fn test_resolve_root_relative() {
        assert_eq!(
            PathBuf::from("/site/public/css/a.css"),
            resolve(Path::new("/site/public"), Path::new("/site/public/blog"), "/css/a.css")
        );
    }

    #[test]
    fn test_resolve_redundancies() {
        assert_eq!(
            PathBuf::from("/site/public/css/a.css"),
            resolve(Path::new("/site/public"), Path::new("/site/public/blog"), "./../css/a.css")
        );
    }

    fn fixture(wanted: Reference, reference: &str) {
        assert_eq!(wanted, Reference::parse(reference));
    }
}
