//! Exports the two pipelines, [`development`] and [`production`], and
//! [`run`], which executes a pipeline stage by stage. Every task in a stage
//! runs concurrently and the next stage starts only once all of them have
//! finished. A failing task aborts the pipeline.
//!
//! Steps are synchronous filesystem work, so they run on tokio's blocking
//! pool; the development server and the file watchers are async services
//! that run until Ctrl-C.

use crate::server::{self, Error as ServerError};
use crate::step::{Context, Error as StepError, Step};
use crate::watch::{self, Error as WatchError};
use futures::future::try_join_all;
use std::fmt;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::info;

/// One entry in a pipeline stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Task {
    Step(Step),

    /// Serve the staging tree with live reload.
    Serve,

    /// Re-run steps when their sources change.
    Watch,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Task::Step(step) => step.fmt(f),
            Task::Serve => f.write_str("serve"),
            Task::Watch => f.write_str("watch"),
        }
    }
}

/// A named, ordered list of stages.
#[derive(Clone, Debug)]
pub struct Pipeline {
    pub name: &'static str,
    pub stages: Vec<Vec<Task>>,
}

const STAGING_STEPS: [Step; 5] = [
    Step::HtmlPublic,
    Step::CssPublic,
    Step::JsPublic,
    Step::ImagesPublic,
    Step::FontsPublic,
];

/// `default`: rebuild the staging tree, then serve it and watch the sources.
pub fn development() -> Pipeline {
    let mut regenerate: Vec<Task> = STAGING_STEPS.iter().copied().map(Task::Step).collect();
    regenerate.push(Task::Serve);
    regenerate.push(Task::Watch);
    Pipeline {
        name: "default",
        stages: vec![vec![Task::Step(Step::CleanPublic)], regenerate],
    }
}

/// `build`: rebuild the staging tree, then derive the distribution tree from
/// it.
pub fn production() -> Pipeline {
    Pipeline {
        name: "build",
        stages: vec![
            vec![Task::Step(Step::CleanPublic)],
            STAGING_STEPS.iter().copied().map(Task::Step).collect(),
            vec![Task::Step(Step::CleanDist)],
            vec![
                Task::Step(Step::UserefDist),
                Task::Step(Step::ImagesDist),
                Task::Step(Step::FontsDist),
            ],
        ],
    }
}

/// Runs `pipeline` to completion.
pub async fn run(pipeline: &Pipeline, ctx: &Context) -> Result<()> {
    let start = Instant::now();
    info!(pipeline = pipeline.name, stages = pipeline.stages.len(), "starting pipeline");
    for (i, stage) in pipeline.stages.iter().enumerate() {
        info!(pipeline = pipeline.name, stage = i, tasks = stage.len(), "starting stage");
        run_stage(stage, ctx).await?;
    }
    info!(
        pipeline = pipeline.name,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "finished pipeline"
    );
    Ok(())
}

/// Runs a single step outside of any pipeline.
pub async fn run_step(step: Step, ctx: &Context) -> Result<()> {
    run_stage(&[Task::Step(step)], ctx).await
}

// The stage barrier: spawn every task, then wait for all of them.
async fn run_stage(stage: &[Task], ctx: &Context) -> Result<()> {
    try_join_all(stage.iter().map(|&task| spawn(task, ctx.clone()))).await?;
    Ok(())
}

async fn spawn(task: Task, ctx: Context) -> Result<()> {
    match task {
        Task::Step(step) => tokio::task::spawn_blocking(move || step.run(&ctx))
            .await?
            .map_err(|err| Error::Step { step, err }),
        Task::Serve => Ok(tokio::spawn(server::serve(ctx)).await??),
        Task::Watch => Ok(tokio::spawn(watch::watch(ctx)).await??),
    }
}

/// Resolves once the process receives Ctrl-C. Long-running services select on
/// this to stop.
pub(crate) async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

type Result<T> = std::result::Result<T, Error>;

/// The error type for running a pipeline.
#[derive(Debug)]
pub enum Error {
    /// Returned when a step fails.
    Step { step: Step, err: StepError },

    /// Returned when the development server fails.
    Server(ServerError),

    /// Returned when the file watchers fail.
    Watch(WatchError),

    /// Returned when a task panics or is cancelled.
    Join(JoinError),
}

impl fmt::Display for Error {
    /// Implements [`fmt::Display`] for [`Error`].
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Step { step, err } => write!(f, "Task '{}': {}", step, err),
            Error::Server(err) => err.fmt(f),
            Error::Watch(err) => err.fmt(f),
            Error::Join(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    /// Implements [`std::error::Error`] for [`Error`].
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Step { step: _, err } => Some(err),
            Error::Server(err) => Some(err),
            Error::Watch(err) => Some(err),
            Error::Join(err) => Some(err),
        }
    }
}

impl From<ServerError> for Error {
    /// Converts [`ServerError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: ServerError) -> Error {
        Error::Server(err)
    }
}

impl From<WatchError> for Error {
    /// Converts [`WatchError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: WatchError) -> Error {
        Error::Watch(err)
    }
}

impl From<JoinError> for Error {
    /// Converts [`JoinError`]s into [`Error`]. This allows us to use the `?`
    /// operator.
    fn from(err: JoinError) -> Error {
        Error::Join(err)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_development_stages() {
        let pipeline = development();
        assert_eq!("default", pipeline.name);
        assert_eq!(vec![Task::Step(Step::CleanPublic)], pipeline.stages[0]);
        assert_eq!(7, pipeline.stages[1].len());
        assert!(pipeline.stages[1].contains(&Task::Serve));
        assert!(pipeline.stages[1].contains(&Task::Watch));
    }

    #[test]
    fn test_production_cleans_dist_after_staging() {
        let stages = production().stages;
        assert_eq!(4, stages.len());
        assert!(stages[1].contains(&Task::Step(Step::CssPublic)));
        assert_eq!(vec![Task::Step(Step::CleanDist)], stages[2]);
        assert!(!stages.iter().flatten().any(|t| *t == Task::Serve || *t == Task::Watch));
    }
}
