//! BDD step definitions for sweep behaviour.

use rstest_bdd_macros::{given, then, when};
use scanywhere::engine::{ContainerEngine, ContainerSpec, managed_labels};
use scanywhere::janitor::{Janitor, SweepScope};

use super::test_helpers::{SweepContext, SweepOutcome};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn start(sweep_context: &SweepContext, spec: &ContainerSpec) {
    sweep_context
        .engine
        .run_detached(spec)
        .unwrap_or_else(|err| panic!("fake engine should start {}: {err}", spec.name));
}

#[given("the engine refuses removals")]
fn engine_refuses(mut sweep_context: SweepContext) -> SweepContext {
    sweep_context.engine = sweep_context.engine.with_failing_remove();
    sweep_context
}

#[given("a container \"{name}\" left by session \"{session}\"")]
fn leftover_container(sweep_context: SweepContext, name: String, session: String) -> SweepContext {
    start(
        &sweep_context,
        &ContainerSpec {
            name,
            image: String::from("gluetun"),
            labels: managed_labels(&session),
            ..ContainerSpec::default()
        },
    );
    sweep_context
}

#[given("a network \"{name}\" left by session \"{session}\"")]
fn leftover_network(sweep_context: SweepContext, name: String, session: String) -> SweepContext {
    sweep_context
        .engine
        .create_network(&name, &managed_labels(&session))
        .unwrap_or_else(|err| panic!("fake engine should create {name}: {err}"));
    sweep_context
}

#[given("an unmanaged container \"{name}\"")]
fn unmanaged_container(sweep_context: SweepContext, name: String) -> SweepContext {
    start(
        &sweep_context,
        &ContainerSpec {
            name,
            image: String::from("postgres"),
            ..ContainerSpec::default()
        },
    );
    sweep_context
}

#[when("I sweep all sessions")]
fn sweep_all(mut sweep_context: SweepContext) -> SweepContext {
    let outcome = match Janitor::new(&sweep_context.engine, SweepScope::AllSessions).sweep() {
        Ok(summary) => SweepOutcome::Success(summary),
        Err(err) => SweepOutcome::Failure(err.to_string()),
    };
    sweep_context.outcome = Some(outcome);
    sweep_context
}

#[then("the sweep reports {containers:u32} container and {networks:u32} network removed")]
fn reports_removals(
    sweep_context: &SweepContext,
    containers: u32,
    networks: u32,
) -> Result<(), StepError> {
    let Some(SweepOutcome::Success(summary)) = sweep_context.outcome.as_ref() else {
        return Err(StepError::Assertion(format!(
            "expected success, got: {:?}",
            sweep_context.outcome
        )));
    };
    if summary.removed_containers == containers as usize
        && summary.removed_networks == networks as usize
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {containers} containers and {networks} networks, got {summary:?}"
        )))
    }
}

#[then("only \"{name}\" is left running")]
fn only_left(sweep_context: &SweepContext, name: String) -> Result<(), StepError> {
    let live = sweep_context.engine.live_containers();
    if live == vec![name.clone()] {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected only {name}, found {live:?}"
        )))
    }
}

#[then("the sweep reports a not-clean error")]
fn reports_not_clean(sweep_context: &SweepContext) -> Result<(), StepError> {
    match sweep_context.outcome.as_ref() {
        Some(SweepOutcome::Failure(message)) if message.contains("resources remain after sweep") => {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected not-clean error, got: {other:?}"
        ))),
    }
}
