mod cli;
mod ui;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};
use replayd::coordinator::{Coordinator, StartRequest, StatusReport};
use replayd::executor::HttpExecutionPort;
use replayd::store::{FileJobStore, JobStore};
use replayd::{
    Action, ExecutionContext, JobSnapshot, JobStatus, ReplayConfig, ReplayError, Request, Response,
};

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = ReplayConfig::load().context("failed to load replayd.toml")?;
    cli.apply(&mut config);

    match &cli.command {
        Command::Run { file, context } => {
            let contents = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let actions: Vec<Action> = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a JSON array of actions", file.display()))?;
            let context: ExecutionContext = match context {
                Some(raw) => serde_json::from_str(raw).context("--context is not valid JSON")?,
                None => ExecutionContext::default(),
            };

            let coordinator = build_coordinator(config)?;
            coordinator.recover().await.context("failed to load job store")?;
            let request = StartRequest::new(actions)
                .with_options(cli.options())
                .with_context(context);
            replay_file(&coordinator, request).await
        }
        Command::Status { job_id } => {
            let store = FileJobStore::new(&config.state_path);
            let jobs = store.load().await.context("failed to load job store")?;
            let mut snapshots: Vec<JobSnapshot> = match job_id {
                Some(id) => match jobs.get(id) {
                    Some(job) => vec![job.snapshot()],
                    None => bail!(ReplayError::JobNotFound(id.clone())),
                },
                None => jobs.values().map(|job| job.snapshot()).collect(),
            };
            snapshots.sort_by(|a, b| a.start_time.cmp(&b.start_time));
            ui::print_snapshots(&snapshots);
            Ok(ExitCode::SUCCESS)
        }
        Command::Prune => {
            let store = FileJobStore::new(&config.state_path);
            let mut jobs = store.load().await.context("failed to load job store")?;
            let before = jobs.len();
            let now = Utc::now();
            jobs.retain(|_, job| !job.is_expired(now, config.retention()));
            store.save(&jobs).await.context("failed to save job store")?;
            println!("Pruned {} job(s).", before - jobs.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            let coordinator = build_coordinator(config)?;
            let recovered = coordinator.recover().await.context("failed to load job store")?;
            info!(recovered, "serving control requests on stdin");
            let _sweep = coordinator.spawn_retention_sweep();
            serve(&coordinator).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_coordinator(config: ReplayConfig) -> anyhow::Result<Coordinator> {
    if config.executor_url.is_empty() {
        bail!("no executor endpoint: set executor_url, REPLAYD_EXECUTOR_URL or --executor-url");
    }
    let port = HttpExecutionPort::new(
        config.executor_url.clone(),
        Duration::from_millis(config.dispatch_timeout_ms),
    )
    .context("failed to build HTTP client")?;
    let store = FileJobStore::new(&config.state_path);
    Ok(Coordinator::new(config, Arc::new(store), Arc::new(port)))
}

/// Starts one job and follows it until a terminal status. Ctrl-C stops the job.
async fn replay_file(coordinator: &Coordinator, request: StartRequest) -> anyhow::Result<ExitCode> {
    let total = request.actions.len();
    let (job_id, mut run) = coordinator.start_tracked(request).await?;
    let spinner = ui::JobSpinner::start(&job_id, total);
    let mut ticker = tokio::time::interval(coordinator.config().poll_interval());
    let mut interrupted = false;

    loop {
        tokio::select! {
            finished = &mut run => {
                if let Err(e) = finished {
                    warn!(%job_id, error = %e, "job driver task failed");
                }
                break;
            }
            _ = ticker.tick() => {}
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = signal {
                    warn!(error = %e, "ctrl-c handler failed");
                } else if let Err(e) = coordinator.stop(&job_id).await {
                    warn!(%job_id, error = %e, "could not stop job");
                }
            }
        }
        spinner.update(&job_snapshot(coordinator, &job_id).await?);
    }

    let snapshot = job_snapshot(coordinator, &job_id).await?;
    spinner.complete(&snapshot);

    Ok(if snapshot.status == JobStatus::Complete {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn job_snapshot(coordinator: &Coordinator, job_id: &str) -> anyhow::Result<JobSnapshot> {
    match coordinator.status(Some(job_id)).await? {
        StatusReport::Job(snapshot) => Ok(snapshot),
        StatusReport::All(_) => bail!("unexpected status report for {job_id}"),
    }
}

/// Newline-delimited JSON: one [`Request`] per input line, one [`Response`] per output line.
async fn serve(coordinator: &Coordinator) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => coordinator.handle(request).await,
            Err(e) => Response::failure(&ReplayError::Validation(format!("invalid request: {e}"))),
        };
        let mut body = serde_json::to_vec(&response)?;
        body.push(b'\n');
        stdout.write_all(&body).await?;
        stdout.flush().await?;
    }
    info!("stdin closed, shutting down");
    Ok(())
}
