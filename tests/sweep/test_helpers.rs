//! Shared fixtures and helpers for sweep BDD scenarios.

use rstest::fixture;
use scanywhere::janitor::SweepSummary;
use scanywhere::test_support::FakeEngine;

#[derive(Clone, Debug)]
pub enum SweepOutcome {
    Success(SweepSummary),
    Failure(String),
}

#[derive(Clone, Debug)]
pub struct SweepContext {
    pub engine: FakeEngine,
    pub outcome: Option<SweepOutcome>,
}

#[fixture]
pub fn sweep_context() -> SweepContext {
    SweepContext {
        engine: FakeEngine::new(),
        outcome: None,
    }
}
