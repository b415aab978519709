//! Shared fixtures and helpers for trial BDD scenarios.

use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use scanywhere::probe::{ConnectivityProbe, ProbeSchedule};
use scanywhere::test_support::{FakeEngine, ScriptedFetcher, ScriptedRunner};
use scanywhere::trial::{TrialOrchestrator, TrialOutcome, TrialSettings};
use scanywhere::tunnel::{CommandInstanceProvisioner, GatewaySettings};
use scanywhere::workload::WorkloadSettings;
use scanywhere::{TrialConfig, config::keys};

pub const GATEWAY_IMAGE: &str = "gluetun";
pub const RELAY_IMAGE: &str = "gluetun-warp";
pub const WORKLOAD_IMAGE: &str = "check-ip-connectivity";

/// What the scenario observed once the trial returned.
#[derive(Clone, Debug)]
pub struct TrialObservation {
    pub ip: Option<String>,
    pub failure: Option<String>,
    pub residual: usize,
}

#[derive(Clone, Debug)]
pub struct TrialContext {
    pub engine: FakeEngine,
    pub fetcher: ScriptedFetcher,
    pub observation: Option<TrialObservation>,
}

#[fixture]
pub fn trial_context() -> TrialContext {
    TrialContext {
        engine: FakeEngine::new(),
        fetcher: ScriptedFetcher::new(),
        observation: None,
    }
}

fn settings() -> TrialSettings {
    TrialSettings {
        gateway: GatewaySettings {
            image: String::from(GATEWAY_IMAGE),
            relay_image: String::from(RELAY_IMAGE),
            gateway_dir: Utf8PathBuf::from("/srv/gluetun"),
            control_port: None,
            settle_delay: Duration::ZERO,
            probe: ProbeSchedule {
                max_wait: Duration::from_millis(50),
                poll_interval: Duration::from_millis(5),
            },
            session: String::from("bdd"),
        },
        workload: WorkloadSettings {
            poll_interval: Duration::from_millis(5),
            max_wait: Some(Duration::from_secs(5)),
            session: String::from("bdd"),
        },
        workload_root: Utf8PathBuf::from("/nonexistent/workloads"),
    }
}

/// Runs one trial against the scripted doubles and records the outcome.
pub fn run_trial(context: &TrialContext, chaining: bool) -> TrialObservation {
    let orchestrator: TrialOrchestrator<_, _, CommandInstanceProvisioner<ScriptedRunner>> =
        TrialOrchestrator::new(
            context.engine.clone(),
            ConnectivityProbe::new(context.fetcher.clone()),
            settings(),
        );
    let config = TrialConfig::from_pairs([(keys::PROVIDER, "demo"), (keys::PROTOCOL, "wg")]);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap_or_else(|err| panic!("runtime should build: {err}"));
    let report = runtime
        .block_on(orchestrator.run_trial(&config, WORKLOAD_IMAGE, chaining))
        .unwrap_or_else(|err| panic!("trial should not be fatal: {err}"));

    match report.outcome {
        TrialOutcome::Completed { ip, .. } => TrialObservation {
            ip: Some(ip),
            failure: None,
            residual: report.residual,
        },
        TrialOutcome::Abandoned(err) => TrialObservation {
            ip: None,
            failure: Some(format!("{:?}", err.kind())),
            residual: report.residual,
        },
    }
}
