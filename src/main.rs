/// Compiles a regular expression once and hands out a `&'static` reference to it.
macro_rules! regex {
    ($re:expr $(,)?) => {{
        static REGEX: ::std::sync::OnceLock<::regex_lite::Regex> = ::std::sync::OnceLock::new();

        REGEX.get_or_init(|| ::regex_lite::Regex::new($re).unwrap())
    }};
}

mod cli;
mod compose;
mod config;
mod feed;
mod fetch;
mod ledger;
mod normalize;
mod pipeline;
mod poller;
mod publish;
mod recency;
mod server;
mod state;
mod storage;

use std::future::Future;
use std::io;
use std::process::ExitCode;

use anyhow::Result;
use cli::Args;
use poller::Poller;
use server::Server;
use state::State;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn set_up_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_regex(false)
                .with_default_directive(Level::INFO.into())
                .with_env_var("TOOTFEED_LOG")
                .from_env_lossy(),
        )
        .init();
}

/// Cancels `cancel` once `signal` fires. A signal that can't be listened for leaves it alone.
async fn cancel_on_signal(
    signal: impl Future<Output = io::Result<()>>,
    cancel: CancellationToken,
) {
    match signal.await {
        Ok(()) => cancel.cancel(),
        Err(e) => error!("Could not listen for Ctrl-C: {e}"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    set_up_logging();

    let cancel = CancellationToken::new();

    tokio::spawn(cancel_on_signal(tokio::signal::ctrl_c(), cancel.clone()));

    let mut tasks = match start(cancel.clone()).await {
        Ok(Some(tasks)) => tasks,
        Ok(None) => return ExitCode::SUCCESS,

        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let mut exit_code = ExitCode::SUCCESS;

    while let Some(task_result) = tasks.join_next().await {
        cancel.cancel();

        match task_result {
            Ok(Ok(())) => {}

            Ok(Err(e)) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }

            Err(e) => {
                error!("{e:#}");
                exit_code = ExitCode::FAILURE;
            }
        }
    }

    exit_code
}

/// Returns `None` if there's nothing left to run.
async fn start(cancel: CancellationToken) -> Result<Option<JoinSet<Result<()>>>> {
    let mut args = Args::parse();
    let config_paths = args
        .config_path
        .take()
        .into_iter()
        .chain(["./tootfeed.toml".into(), "/etc/tootfeed.toml".into()])
        .collect::<Vec<_>>();
    let mut config = config::load(&config_paths)?;
    config.update(&args);
    let state = State::new(config).await?;

    if args.once {
        info!("Running a single cycle");
        state.pipeline.run_cycle().await;

        return Ok(None);
    }

    let poller = Poller::new(state.pipeline.clone(), state.cfg.poll_interval.into());
    let server = Server::new(&state).await?;

    let mut tasks = JoinSet::new();
    tasks.spawn(poller.run(cancel.clone()));
    tasks.spawn(server.serve(cancel.clone()));

    Ok(Some(tasks))
}
