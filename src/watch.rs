//! File watching for the development pipeline. The whole source tree is
//! watched recursively, so asset directories created after startup are
//! picked up too. Each change is routed by glob to the step for its asset
//! type and only that step re-runs. Events are debounced per step and re-runs
//! of the same step never overlap. A failing re-run is logged and watching
//! continues.

use crate::build::shutdown_signal;
use crate::config::Config;
use crate::step::{Context, Step};
use glob::{Pattern, PatternError};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Maps changed paths matching `pattern` to `step`.
#[derive(Debug)]
pub struct Rule {
    pub pattern: Pattern,
    pub step: Step,
}

impl Rule {
    fn new(config: &Config, kind: &str, glob: &str, step: Step) -> Result<Rule> {
        let directory = config.source(kind);
        let pattern = format!("{}/{}", Pattern::escape(&directory.to_string_lossy()), glob);
        Ok(Rule {
            pattern: Pattern::new(&pattern)?,
            step,
        })
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.matches_path(path)
    }
}

/// The watch rules for a project, one per asset type.
pub fn rules(config: &Config) -> Result<Vec<Rule>> {
    Ok(vec![
        Rule::new(config, "html", "**/*.html", Step::HtmlPublic)?,
        Rule::new(config, "scss", "**/*.scss", Step::CssPublic)?,
        Rule::new(config, "js", "**/*.js", Step::JsPublic)?,
        Rule::new(config, "images", "**/*", Step::ImagesPublic)?,
        Rule::new(config, "fonts", "**/*", Step::FontsPublic)?,
    ])
}

/// Returns the steps a changed path should re-run.
pub fn route(rules: &[Rule], path: &Path) -> Vec<Step> {
    rules.iter().filter(|r| r.matches(path)).map(|r| r.step).collect()
}

fn is_change(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Wakes the re-run worker of every rule one of `paths` matches. A worker
/// with a re-run already pending absorbs the wake-up.
fn dispatch(routes: &[(Rule, mpsc::Sender<()>)], paths: &[PathBuf]) {
    for (rule, tx) in routes {
        if let Some(path) = paths.iter().find(|p| rule.matches(p)) {
            debug!(path = %path.display(), step = %rule.step, "change");
            let _ = tx.try_send(());
        }
    }
}

/// Watches the source tree until Ctrl-C.
pub async fn watch(ctx: Context) -> Result<()> {
    let debounce = Duration::from_millis(ctx.config.watch.debounce_ms);
    let source = ctx.config.source_directory.clone();
    let mut workers = JoinSet::new();
    let mut routes = Vec::new();

    for rule in rules(&ctx.config)? {
        // Capacity 1: while a re-run is pending, further events coalesce
        // into it.
        let (tx, rx) = mpsc::channel::<()>(1);
        workers.spawn(rerun(rule.step, ctx.clone(), rx, debounce));
        info!(pattern = %rule.pattern, step = %rule.step, "watching");
        routes.push((rule, tx));
    }

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if is_change(&event) => dispatch(&routes, &event.paths),
        Ok(_) => {}
        Err(err) => warn!(error = %err, "watch error"),
    })?;
    if source.is_dir() {
        watcher.watch(&source, RecursiveMode::Recursive)?;
    } else {
        warn!(directory = %source.display(), "not watching missing source directory");
    }

    shutdown_signal().await;
    drop(watcher);
    workers.shutdown().await;
    Ok(())
}

async fn rerun(step: Step, ctx: Context, mut rx: mpsc::Receiver<()>, debounce: Duration) {
    while rx.recv().await.is_some() {
        tokio::time::sleep(debounce).await;
        while rx.try_recv().is_ok() {}

        let ctx = ctx.clone();
        match tokio::task::spawn_blocking(move || step.run(&ctx)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(step = %step, error = %err, "re-run failed"),
            Err(err) => error!(step = %step, error = %err, "re-run panicked"),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for the file watchers.
#[derive(Debug)]
pub enum Error {
    /// Returned when a watch glob is malformed.
    Pattern(PatternError),

    /// Returned when a watcher can't be created or registered.
    Notify(notify::Error),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Pattern(err) => write!(f, "Invalid watch pattern: {}", err),
            Error::Notify(err) => write!(f, "Watching: {}", err),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Pattern(err) => Some(err),
            Error::Notify(err) => Some(err),
        }
    }
}

impl From<PatternError> for Error {
    fn from(err: PatternError) -> Error {
        Error::Pattern(err)
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Error {
        Error::Notify(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::util::write;
    use tempfile::TempDir;

    fn fixture(root: &Path) -> Vec<Rule> {
        rules(&Config::with_root(root)).unwrap()
    }

    #[test]
    fn test_route_scss_only_restyles() {
        let root = Path::new("/site");
        let rules = fixture(root);
        assert_eq!(vec![Step::CssPublic], route(&rules, &root.join("src/scss/site.scss")));
        assert_eq!(vec![Step::CssPublic], route(&rules, &root.join("src/scss/parts/_nav.scss")));
    }

    #[test]
    fn test_route_by_type() {
        let root = Path::new("/site");
        let rules = fixture(root);
        assert_eq!(vec![Step::HtmlPublic], route(&rules, &root.join("src/html/partials/head.html")));
        assert_eq!(vec![Step::JsPublic], route(&rules, &root.join("src/js/app.js")));
        assert_eq!(vec![Step::ImagesPublic], route(&rules, &root.join("src/images/a/b.png")));
        assert_eq!(vec![Step::FontsPublic], route(&rules, &root.join("src/fonts/x.woff2")));
    }

    #[test]
    fn test_route_ignores_other_files() {
        let root = Path::new("/site");
        let rules = fixture(root);
        assert!(route(&rules, &root.join("src/js/notes.txt")).is_empty());
        assert!(route(&rules, &root.join("src/scss/site.css")).is_empty());
        assert!(route(&rules, &root.join("public/css/site.css")).is_empty());
    }

    #[test]
    fn test_dispatch_wakes_matching_steps() {
        let root = Path::new("/site");
        let mut routes = Vec::new();
        let mut receivers = Vec::new();
        for rule in fixture(root) {
            let (tx, rx) = mpsc::channel::<()>(1);
            receivers.push((rule.step, rx));
            routes.push((rule, tx));
        }

        let changed = vec![root.join("src/scss/site.scss"), root.join("src/scss/_nav.scss")];
        dispatch(&routes, &changed);
        dispatch(&routes, &changed);
        for (step, rx) in receivers.iter_mut() {
            assert_eq!(*step == Step::CssPublic, rx.try_recv().is_ok(), "{}", step);
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_watch_picks_up_directories_created_later() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_root(dir.path());
        config.watch.debounce_ms = 20;
        let ctx = Context::new(config);
        std::fs::create_dir_all(&ctx.config.source_directory).unwrap();
        let watching = tokio::spawn(watch(ctx.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let scss = ctx.config.source("scss");
        std::fs::create_dir_all(&scss).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        write(&scss.join("site.scss"), "a { b: c; }").unwrap();

        let compiled = ctx.config.public("css").join("site.css");
        let mut waited = 0;
        while !compiled.exists() && waited < 5000 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waited += 50;
        }
        watching.abort();
        assert!(compiled.exists());
    }

    #[tokio::test]
    async fn test_rerun_runs_step_once_per_burst() {
        let dir = TempDir::new().unwrap();
        let ctx = Context::new(Config::with_root(dir.path()));
        write(&ctx.config.source("js").join("app.js"), "x").unwrap();
        let mut reloads = ctx.reloader.subscribe();

        let (tx, rx) = mpsc::channel::<()>(1);
        let worker = tokio::spawn(rerun(Step::JsPublic, ctx.clone(), rx, Duration::from_millis(20)));
        let _ = tx.try_send(());
        let _ = tx.try_send(());
        drop(tx);
        worker.await.unwrap();

        assert!(ctx.config.public("js").join("app.js").exists());
        assert!(reloads.try_recv().is_ok());
        assert!(reloads.try_recv().is_err());
        assert!(!ctx.config.public("css").exists());
    }
}
