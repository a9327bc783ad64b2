//! Appends a cache-busting token to the local scripts and stylesheets a page
//! references so browsers never serve a stale copy after a rebuild.

use crate::url::{strip_query, Reference};
use regex::{Captures, Regex};
use std::sync::OnceLock;

/// A token derived from the current time in milliseconds. One token is used
/// for every page rendered in the same step run.
pub fn timestamp_token() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

/// Rewrites every local `<script src>` and stylesheet `<link href>` in `html`
/// to end in `?t={token}`, replacing any query the reference already had.
pub fn bust(html: &str, token: &str) -> String {
    tag_regex()
        .replace_all(html, |caps: &Captures| {
            let tag = &caps[0];
            let is_link = caps[1].eq_ignore_ascii_case("link");
            if is_link && !stylesheet_regex().is_match(tag) {
                return tag.to_owned();
            }
            bust_tag(tag, if is_link { "href" } else { "src" }, token)
        })
        .into_owned()
}

fn bust_tag(tag: &str, attribute: &str, token: &str) -> String {
    attribute_regex()
        .replace(tag, |caps: &Captures| {
            if !caps[2].eq_ignore_ascii_case(attribute) {
                return caps[0].to_owned();
            }
            let (quote, value) = match (caps.get(3), caps.get(4)) {
                (Some(v), _) => ('"', v.as_str()),
                (None, Some(v)) => ('\'', v.as_str()),
                (None, None) => return caps[0].to_owned(),
            };
            match Reference::parse(value) {
                Reference::Local(_) => format!(
                    "{}{}{}?t={}{}",
                    &caps[1],
                    quote,
                    strip_query(value.trim()),
                    token,
                    quote
                ),
                Reference::External => caps[0].to_owned(),
            }
        })
        .into_owned()
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(script|link)\b[^>]*>").unwrap())
}

fn stylesheet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\srel\s*=\s*["']?stylesheet\b"#).unwrap())
}

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(\s(src|href)\s*=\s*)(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}
