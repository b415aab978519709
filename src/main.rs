//! Binary entry point for the `scanywhere` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use scanywhere::command::ProcessCommandRunner;
use scanywhere::config::{ConfigError, HarnessConfig, ProviderProfiles};
use scanywhere::engine::{ContainerEngine, DockerCli, EngineError};
use scanywhere::janitor::{Janitor, JanitorError, SweepScope, SweepSummary};
use scanywhere::probe::{ConnectivityProbe, HttpIpFetcher};
use scanywhere::selection::{FileCatalog, SelectionMode, SelectionPolicy};
use scanywhere::trial::{Campaign, CampaignPlan, FatalError, TrialOrchestrator, TrialSettings};
use scanywhere::tunnel::{CommandInstanceProvisioner, HidemeEndpoints, SystemResolver};

mod cli;

use cli::{Cli, ScanCommand, SelectionArg};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("container engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("sweep failed: {0}")]
    Janitor(#[from] JanitorError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Fatal(FatalError::UnknownImage { .. }) => 2,
            _ => 1,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(log_level(&cli));
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn log_level(cli: &Cli) -> &str {
    match cli {
        Cli::Scan(args) => &args.log,
        Cli::Sweep => "info",
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Scan(args) => run_scan(args).await,
        Cli::Sweep => {
            let config = HarnessConfig::load_without_cli_args()?;
            let engine = DockerCli::with_process_runner(config.docker_bin.clone());
            let summary = Janitor::new(&engine, SweepScope::AllSessions).sweep()?;
            write_summary(io::stdout(), &summary)?;
            Ok(())
        }
    }
}

async fn run_scan(args: ScanCommand) -> Result<(), CliError> {
    let config = HarnessConfig::load_without_cli_args()?;
    let profiles = ProviderProfiles::load(Utf8Path::new(&config.profiles_path))?;
    let profile = profiles.profile(&args.profile)?.clone();
    let session = Uuid::new_v4().to_string();
    tracing::info!(session = %session, profile = %args.profile, workload = %args.workload, "starting session");

    let engine = DockerCli::with_process_runner(config.docker_bin.clone());
    prepare_images(&engine, &config, &args)?;

    let settings = TrialSettings::from_harness(&config, &session)?;
    let mut orchestrator =
        TrialOrchestrator::new(engine, ConnectivityProbe::new(HttpIpFetcher::new()), settings)
            .with_hideme(HidemeEndpoints::new(
                config.hideme_servers_path.clone(),
                SystemResolver,
            ));
    if let Some(helper) = &config.instance_helper {
        orchestrator = orchestrator.with_instances(CommandInstanceProvisioner::new(
            helper.clone(),
            ProcessCommandRunner,
            config.instance_timeout(),
        ));
    }

    let catalog = FileCatalog::new(config.catalog_path.clone());
    let policy = SelectionPolicy::new(selection_mode(args.selection), StdRng::from_entropy());
    let plan = CampaignPlan {
        profile,
        workload: args.workload,
        chaining: args.chain,
        catalog_retry: config.catalog_retry_delay(),
    };
    Campaign::new(&orchestrator, &catalog, policy, plan)
        .run(args.trials)
        .await?;
    Ok(())
}

/// Prunes and builds images before the first trial. Containers are left
/// alone: other scans may share the engine, and `sweep` removes leftovers.
fn prepare_images<E: ContainerEngine>(
    engine: &E,
    config: &HarnessConfig,
    args: &ScanCommand,
) -> Result<(), CliError> {
    if args.prune {
        engine.prune_images(&args.workload)?;
        tracing::info!(label = %args.workload, "pruned workload images");
    }
    if args.build {
        engine.build_image(&config.workload_dir(&args.workload), &args.workload)?;
        if args.chain {
            let relay = &config.relay_gateway_image;
            engine.build_image(&config.workload_dir(relay), relay)?;
        }
    }
    Ok(())
}

const fn selection_mode(arg: SelectionArg) -> SelectionMode {
    match arg {
        SelectionArg::Random => SelectionMode::Random,
        SelectionArg::Normalized => SelectionMode::Normalized,
    }
}

fn write_summary(mut target: impl Write, summary: &SweepSummary) -> io::Result<()> {
    writeln!(
        target,
        "sweep complete: removed_containers={}, removed_networks={}",
        summary.removed_containers, summary.removed_networks
    )
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
