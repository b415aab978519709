//! BDD scenarios for trial orchestration.

use rstest_bdd_macros::scenario;

use super::test_helpers::{TrialContext, trial_context};

#[scenario(
    path = "tests/features/trial.feature",
    name = "Confirmed tunnel runs the workload and releases everything"
)]
fn scenario_confirmed_tunnel(trial_context: TrialContext) {
    let _ = trial_context;
}

#[scenario(
    path = "tests/features/trial.feature",
    name = "Gateway that dies while settling abandons the trial"
)]
fn scenario_dead_gateway(trial_context: TrialContext) {
    let _ = trial_context;
}

#[scenario(
    path = "tests/features/trial.feature",
    name = "Tunnel that never confirms abandons the trial"
)]
fn scenario_probe_timeout(trial_context: TrialContext) {
    let _ = trial_context;
}

#[scenario(
    path = "tests/features/trial.feature",
    name = "Chained relay carries the workload"
)]
fn scenario_chained_relay(trial_context: TrialContext) {
    let _ = trial_context;
}
