use anyhow::{anyhow, Context as _, Result};
use clap::{crate_version, App, Arg, SubCommand};
use sitepipe::build;
use sitepipe::config::Config;
use sitepipe::step::{Context, Step};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sitepipe=info")),
        )
        .init();

    let matches = App::new("sitepipe")
        .version(crate_version!())
        .about("Builds and serves a static site from src/")
        .subcommand(
            SubCommand::with_name("default")
                .about("Rebuilds public/, serves it with live reload, and watches src/ (the default)"),
        )
        .subcommand(SubCommand::with_name("build").about("Rebuilds public/ and derives an optimized dist/"))
        .subcommand(
            SubCommand::with_name("task")
                .about("Runs a single named task")
                .arg(
                    Arg::with_name("name")
                        .required(true)
                        .possible_values(&Step::NAMES)
                        .help("The task to run"),
                ),
        )
        .get_matches();

    let cwd = std::env::current_dir().context("Resolving the current directory")?;
    let ctx = Context::new(Config::from_directory(&cwd)?);
    let runtime = tokio::runtime::Runtime::new().context("Starting the runtime")?;

    runtime.block_on(async move {
        match matches.subcommand() {
            ("build", _) => build::run(&build::production(), &ctx).await?,
            ("task", Some(args)) => {
                let step: Step = args
                    .value_of("name")
                    .ok_or_else(|| anyhow!("Missing task name"))?
                    .parse()?;
                build::run_step(step, &ctx).await?
            }
            _ => build::run(&build::development(), &ctx).await?,
        }
        Ok::<(), anyhow::Error>(())
    })
}
