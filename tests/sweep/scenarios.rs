//! BDD scenarios for the stale-resource sweep.

use rstest_bdd_macros::scenario;

use super::test_helpers::{SweepContext, sweep_context};

#[scenario(
    path = "tests/features/sweep.feature",
    name = "Sweep removes resources left by an interrupted session"
)]
fn scenario_sweep_removes_leftovers(sweep_context: SweepContext) {
    let _ = sweep_context;
}

#[scenario(
    path = "tests/features/sweep.feature",
    name = "Sweep fails when a container cannot be removed"
)]
fn scenario_sweep_not_clean(sweep_context: SweepContext) {
    let _ = sweep_context;
}
