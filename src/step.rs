//! Defines [`Step`], the unit the pipelines in [`crate::build`] sequence, and
//! the [`Context`] steps run against. Each step owns a distinct output
//! location so steps in the same stage never contend.
//!
//! Template rendering is the one step whose failures are logged rather than
//! returned; every other step's errors abort the enclosing pipeline.

use crate::config::Config;
use crate::images::{self, Cache};
use crate::reload::{AssetKind, Reloader};
use crate::{clean, copy, html, style, useref};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// What every step needs: the configuration and a handle for notifying
/// connected browsers.
#[derive(Clone, Debug)]
pub struct Context {
    pub config: Arc<Config>,
    pub reloader: Reloader,
}

impl Context {
    pub fn new(config: Config) -> Context {
        Context {
            config: Arc::new(config),
            reloader: Reloader::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    CleanPublic,
    HtmlPublic,
    CssPublic,
    JsPublic,
    ImagesPublic,
    FontsPublic,
    CleanDist,
    UserefDist,
    ImagesDist,
    FontsDist,
}

impl Step {
    pub const ALL: [Step; 10] = [
        Step::CleanPublic,
        Step::HtmlPublic,
        Step::CssPublic,
        Step::JsPublic,
        Step::ImagesPublic,
        Step::FontsPublic,
        Step::CleanDist,
        Step::UserefDist,
        Step::ImagesDist,
        Step::FontsDist,
    ];

    pub const NAMES: [&'static str; 10] = [
        "clean:public",
        "html:public",
        "css:public",
        "js:public",
        "images:public",
        "fonts:public",
        "clean:dist",
        "useref:dist",
        "images:dist",
        "fonts:dist",
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::CleanPublic => "clean:public",
            Step::HtmlPublic => "html:public",
            Step::CssPublic => "css:public",
            Step::JsPublic => "js:public",
            Step::ImagesPublic => "images:public",
            Step::FontsPublic => "fonts:public",
            Step::CleanDist => "clean:dist",
            Step::UserefDist => "useref:dist",
            Step::ImagesDist => "images:dist",
            Step::FontsDist => "fonts:dist",
        }
    }

    /// Runs the step to completion, logging its start, finish and duration.
    pub fn run(self, ctx: &Context) -> Result<()> {
        let start = Instant::now();
        info!(step = %self, "starting");
        let files = self.execute(ctx)?;
        info!(step = %self, files, elapsed_ms = start.elapsed().as_millis() as u64, "finished");
        Ok(())
    }

    // Returns the number of files the step wrote or removed.
    fn execute(self, ctx: &Context) -> Result<usize> {
        let config = &ctx.config;
        let reloader = &ctx.reloader;
        match self {
            Step::CleanPublic => Ok(clean::clean_path(&config.public_directory, true)?),
            Step::HtmlPublic => {
                match html::render_pages(&config.source("html"), &config.public_directory) {
                    Ok(report) => Ok(notify(reloader, AssetKind::Page, "", report.pages)),
                    Err(err) => {
                        error!(step = %self, error = %err, "template rendering failed");
                        Ok(0)
                    }
                }
            }
            Step::CssPublic => {
                let written = style::compile(&config.source("scss"), &config.public("css"))?;
                Ok(notify(reloader, AssetKind::Stylesheet, "css", written))
            }
            Step::JsPublic => {
                let copied = copy::mirror(&config.source("js"), &config.public("js"))?;
                Ok(notify(reloader, AssetKind::Script, "js", copied))
            }
            Step::ImagesPublic => {
                let copied = copy::mirror(&config.source("images"), &config.public("images"))?;
                Ok(notify(reloader, AssetKind::Image, "images", copied))
            }
            Step::FontsPublic => {
                let copied = copy::mirror(&config.source("fonts"), &config.public("fonts"))?;
                Ok(notify(reloader, AssetKind::Font, "fonts", copied))
            }
            Step::CleanDist => Ok(clean::clean_path(&config.dist_directory, true)?),
            Step::UserefDist => {
                let report = useref::bundle_pages(&config.public_directory, &config.dist_directory)?;
                Ok(report.pages.len() + report.bundles.len())
            }
            Step::ImagesDist => {
                let cache = Cache::new(config.cache_directory.join("images"));
                let report = images::optimize_tree(&config.public("images"), &config.dist("images"), &cache)?;
                info!(step = %self, cached = report.cached, "image cache");
                Ok(report.written.len())
            }
            Step::FontsDist => Ok(copy::copy_tree(&config.public("fonts"), &config.dist("fonts"), |_| true)?.len()),
        }
    }
}

// Tells browsers about written files, prefixing each path with the staging
// subdirectory the step writes into.
fn notify(reloader: &Reloader, kind: AssetKind, prefix: &str, written: Vec<String>) -> usize {
    let count = written.len();
    if count > 0 {
        let paths = written
            .into_iter()
            .map(|p| match prefix {
                "" => p,
                _ => format!("{}/{}", prefix, p),
            })
            .collect();
        reloader.notify(kind, paths);
    }
    count
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Step, Error> {
        Step::ALL
            .iter()
            .copied()
            .find(|step| step.name() == s)
            .ok_or_else(|| Error::UnknownStep(s.to_owned()))
    }
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for running a step. There is no variant for template
/// rendering since those failures never propagate.
#[derive(Debug)]
pub enum Error {
    /// Returned when a step name doesn't match any [`Step`].
    UnknownStep(String),

    /// Returned when clearing an output directory fails.
    Clean(clean::Error),

    /// Returned when Sass compilation fails.
    Style(style::Error),

    /// Returned when a copy step fails.
    Copy(copy::Error),

    /// Returned when production bundling fails.
    Useref(useref::Error),

    /// Returned when image optimization fails.
    Images(images::Error),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::UnknownStep(name) => write!(
                f,
                "Unknown task '{}'; expected one of: {}",
                name,
                Step::NAMES.join(", ")
            ),
            Error::Clean(err) => err.fmt(f),
            Error::Style(err) => err.fmt(f),
            Error::Copy(err) => err.fmt(f),
            Error::Useref(err) => err.fmt(f),
            Error::Images(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::UnknownStep(_) => None,
            Error::Clean(err) => Some(err),
            Error::Style(err) => Some(err),
            Error::Copy(err) => Some(err),
            Error::Useref(err) => Some(err),
            Error::Images(err) => Some(err),
        }
    }
}

impl From<clean::Error> for Error {
    fn from(err: clean::Error) -> Error {
        Error::Clean(err)
    }
}

impl From<style::Error> for Error {
    fn from(err: style::Error) -> Error {
        Error::Style(err)
    }
}

impl From<copy::Error> for Error {
    fn from(err: copy::Error) -> Error {
        Error::Copy(err)
    }
}

impl From<useref::Error> for Error {
    fn from(err: useref::Error) -> Error {
        Error::Useref(err)
    }
}

impl From<images::Error> for Error {
    fn from(err: images::Error) -> Error {
        Error::Images(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::write;
    use tempfile::TempDir;

    #[test]
    fn test_names_round_trip() {
        for (step, name) in Step::ALL.iter().zip(Step::NAMES.iter()) {
            assert_eq!(*name, step.name());
            assert_eq!(*step, name.parse::<Step>().unwrap());
        }
    }

    #[test]
    fn test_unknown_step() {
        match "css:dist".parse::<Step>() {
            Err(Error::UnknownStep(name)) => assert_eq!("css:dist", name),
            other => panic!("wanted UnknownStep; found {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_copy_step_notifies_with_staging_paths() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let ctx = Context::new(Config::with_root(dir.path()));
        write(&ctx.config.source("js").join("app.js"), "x").unwrap();
        let mut rx = ctx.reloader.subscribe();

        Step::JsPublic.run(&ctx)?;
        let event = rx.recv().await.unwrap();
        assert_eq!(AssetKind::Script, event.kind);
        assert_eq!(vec!["js/app.js".to_owned()], event.paths);
        Ok(())
    }

    #[test]
    fn test_template_failure_does_not_fail_step() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let ctx = Context::new(Config::with_root(dir.path()));
        write(&ctx.config.source("html").join("index.html"), "{{ if }}").unwrap();
        Step::HtmlPublic.run(&ctx)
    }

    #[test]
    fn test_style_failure_fails_step() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::new(Config::with_root(dir.path()));
        write(&ctx.config.source("scss").join("a.scss"), "a { color: $nope; }").unwrap();
        match Step::CssPublic.run(&ctx) {
            Err(Error::Style(_)) => {}
            other => panic!("wanted Style; found {:?}", other),
        }
    }
}
