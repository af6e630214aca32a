mod config;
mod logging;
mod metrics;

use clap::{Parser, Subcommand};
use pod_utils::censor::CensorError;
use pod_utils::gcs::{GcsError, JobSpec};
use pod_utils::options::{GcsUploadOptions, OptionsError, SidecarOptions};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "prow", about = "GitHub webhook dispatch and pod utilities")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Receive GitHub webhooks and dispatch them to plugins
    Hook {
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Mask secrets in the outputs listed in $SIDECAR_OPTIONS
    Censor,
    /// Print where $GCSUPLOAD_OPTIONS items go for the job in $JOB_SPEC
    UploadPlan,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("config file has no hook section")]
    MissingHookConfig,
    #[error(transparent)]
    Metrics(#[from] metrics::MetricsError),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    Hook(#[from] hook::errors::HookError),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Censor(#[from] CensorError),
    #[error(transparent)]
    Gcs(#[from] GcsError),
    #[error("could not serialize upload plan: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("prow: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: CliCommand) -> Result<(), CliError> {
    match command {
        CliCommand::Hook { config } => run_hook(&config),
        CliCommand::Censor => {
            let _guard = logging::init(None);
            report(censor())
        }
        CliCommand::UploadPlan => {
            let _guard = logging::init(None);
            report(upload_plan())
        }
    }
}

/// Logs a fatal error. Callers hold the logging guard so the event still
/// reaches Sentry.
fn report<T>(result: Result<T, CliError>) -> Result<T, CliError> {
    if let Err(e) = &result {
        tracing::error!(error = %e, "exiting");
    }
    result
}

fn censor() -> Result<(), CliError> {
    let options = SidecarOptions::from_env()?;
    let count = pod_utils::censor_outputs(&options)?;
    tracing::info!(count, "censoring finished");
    Ok(())
}

fn upload_plan() -> Result<(), CliError> {
    let options = GcsUploadOptions::from_env()?;
    let spec = JobSpec::from_env()?;
    let plan = pod_utils::plan_upload(&options, &spec)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn run_hook(path: &std::path::Path) -> Result<(), CliError> {
    let config = config::Config::from_file(path)?;
    let _guard = logging::init(config.common.logging.as_ref());
    report(serve_hook(config))
}

fn serve_hook(config: config::Config) -> Result<(), CliError> {
    if let Some(metrics_config) = &config.common.metrics {
        metrics::init(metrics_config)?;
    }

    let hook_config = config.hook.ok_or(CliError::MissingHookConfig)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    tracing::info!("starting hook");
    runtime.block_on(hook::run(hook_config))?;
    tracing::info!("hook stopped");
    Ok(())
}
