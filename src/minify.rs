//! Thin wrappers over the JS ([`oxc`]) and CSS ([`lightningcss`]) minifiers
//! used for production bundles. Both parse their input, so a bundle that
//! doesn't parse fails instead of being mangled.

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions};
use oxc::minifier::{Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;
use std::fmt;

/// Minifies a classic (non-module) script. Top-level declarations are
/// globals in that setting, so they keep their names.
pub fn js(source: &str) -> Result<String, Error> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::cjs()).parse();
    if parsed.panicked || !parsed.errors.is_empty() {
        let messages: Vec<String> = parsed.errors.iter().map(|e| e.to_string()).collect();
        return Err(Error::Script(messages.join("; ")));
    }
    let mut program = parsed.program;
    let minified = Minifier::new(MinifierOptions::default()).build(&allocator, &mut program);
    Ok(Codegen::new()
        .with_options(CodegenOptions::minify())
        .with_scoping(minified.scoping)
        .build(&program)
        .code)
}

pub fn css(source: &str) -> Result<String, Error> {
    let mut sheet = StyleSheet::parse(source, ParserOptions::default())
        .map_err(|e| Error::Parse(e.to_string()))?;
    sheet
        .minify(MinifyOptions::default())
        .map_err(|e| Error::Minify(e.to_string()))?;
    let output = sheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| Error::Print(e.to_string()))?;
    Ok(output.code)
}

/// Represents a minification failure. Parser diagnostics borrow the source
/// text, so they are flattened to messages.
#[derive(Debug)]
pub enum Error {
    /// Returned when a script doesn't parse.
    Script(String),

    /// Returned when the stylesheet doesn't parse.
    Parse(String),

    /// Returned when a minification pass fails.
    Minify(String),

    /// Returned when the minified stylesheet can't be printed.
    Print(String),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Script(msg) => write!(f, "Parsing script: {}", msg),
            Error::Parse(msg) => write!(f, "Parsing stylesheet: {}", msg),
            Error::Minify(msg) => write!(f, "Minifying stylesheet: {}", msg),
            Error::Print(msg) => write!(f, "Printing stylesheet: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
