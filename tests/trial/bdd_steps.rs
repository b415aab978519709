//! BDD step definitions for trial behaviour.

use std::net::{IpAddr, Ipv4Addr};

use rstest_bdd_macros::{given, then, when};
use scanywhere::engine::ContainerStatus;

use super::test_helpers::{
    GATEWAY_IMAGE, TrialContext, TrialObservation, WORKLOAD_IMAGE, run_trial,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a gateway that reports exit address \"{ip}\" in \"{country}\"")]
fn gateway_reports(trial_context: TrialContext, ip: String, country: String) -> TrialContext {
    trial_context.fetcher.push_gateway_ip(&ip, &country);
    trial_context
}

#[given("a gateway that exits immediately")]
fn gateway_exits(mut trial_context: TrialContext) -> TrialContext {
    trial_context.engine = trial_context
        .engine
        .with_statuses(GATEWAY_IMAGE, vec![Some(ContainerStatus::Exited)]);
    trial_context
}

#[given("a gateway whose control server never answers")]
fn gateway_silent(trial_context: TrialContext) -> TrialContext {
    trial_context
}

#[given("a relay that reports exit address \"{ip}\" in \"{country}\"")]
fn relay_reports(mut trial_context: TrialContext, ip: String, country: String) -> TrialContext {
    trial_context.engine = trial_context
        .engine
        .with_address(GATEWAY_IMAGE, IpAddr::V4(Ipv4Addr::new(172, 18, 0, 2)));
    trial_context.engine.push_exec_output(0, "");
    trial_context.engine.push_exec_output(0, "");
    trial_context.engine.push_exec_output(
        0,
        "PrivateKey = a\nAddress = 172.16.0.2/32\nPublicKey = b\n",
    );
    trial_context.fetcher.push_gateway_ip(&ip, &country);
    trial_context
}

#[given("a workload that exits after one poll")]
fn workload_exits(mut trial_context: TrialContext) -> TrialContext {
    trial_context.engine = trial_context
        .engine
        .with_image(WORKLOAD_IMAGE)
        .with_statuses(
            WORKLOAD_IMAGE,
            vec![Some(ContainerStatus::Running), Some(ContainerStatus::Exited)],
        );
    trial_context
}

#[when("I run a trial")]
fn run_plain(mut trial_context: TrialContext) -> TrialContext {
    trial_context.observation = Some(run_trial(&trial_context, false));
    trial_context
}

#[when("I run a chained trial")]
fn run_chained(mut trial_context: TrialContext) -> TrialContext {
    trial_context.observation = Some(run_trial(&trial_context, true));
    trial_context
}

fn observation(trial_context: &TrialContext) -> Result<&TrialObservation, StepError> {
    trial_context
        .observation
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing trial observation")))
}

#[then("the trial completes with exit address \"{ip}\"")]
fn completes_with(trial_context: &TrialContext, ip: String) -> Result<(), StepError> {
    let seen = observation(trial_context)?;
    if seen.ip.as_deref() == Some(ip.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected completion via {ip}, got {seen:?}"
        )))
    }
}

#[then("the trial is abandoned with \"{kind}\"")]
fn abandoned_with(trial_context: &TrialContext, kind: String) -> Result<(), StepError> {
    let seen = observation(trial_context)?;
    if seen.failure.as_deref() == Some(kind.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {kind} abandonment, got {seen:?}"
        )))
    }
}

#[then("every container started by the trial is removed")]
fn containers_removed(trial_context: &TrialContext) -> Result<(), StepError> {
    let seen = observation(trial_context)?;
    let live = trial_context.engine.live_containers();
    if seen.residual == 0 && live.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "residual {} with live containers {live:?}",
            seen.residual
        )))
    }
}

#[then("no workload was started")]
fn no_workload(trial_context: &TrialContext) -> Result<(), StepError> {
    let started = trial_context
        .engine
        .runs()
        .iter()
        .any(|spec| spec.image == WORKLOAD_IMAGE);
    if started {
        Err(StepError::Assertion(String::from("workload was started")))
    } else {
        Ok(())
    }
}

#[then("the trial network is removed")]
fn network_removed(trial_context: &TrialContext) -> Result<(), StepError> {
    let engine = &trial_context.engine;
    if engine.networks().is_empty() && engine.removed_networks().len() == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "networks left {:?}, removed {:?}",
            engine.networks(),
            engine.removed_networks()
        )))
    }
}
