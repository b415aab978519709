//! Unit tests for the janitor module.

use super::*;
use crate::engine::{ContainerSpec, managed_labels};
use crate::test_support::FakeEngine;
use rstest::rstest;

fn start(engine: &FakeEngine, name: &str, session: &str) {
    let spec = ContainerSpec {
        name: name.to_owned(),
        image: String::from("gluetun"),
        labels: managed_labels(session),
        ..ContainerSpec::default()
    };
    engine.run_detached(&spec).expect("fake run");
}

#[rstest]
#[case(SweepScope::AllSessions, "scanywhere.managed")]
#[case(SweepScope::Session(String::from("s-1")), "scanywhere.session=s-1")]
fn scope_renders_label_filter(#[case] scope: SweepScope, #[case] expected: &str) {
    assert_eq!(scope.label_filter(), expected);
}

#[rstest]
fn sweep_removes_labelled_containers_and_networks() {
    let engine = FakeEngine::new();
    start(&engine, "gw-a", "s-1");
    start(&engine, "gw-b", "s-2");
    engine
        .run_detached(&ContainerSpec {
            name: String::from("unrelated"),
            image: String::from("postgres"),
            ..ContainerSpec::default()
        })
        .expect("fake run");
    engine
        .create_network("scanywhere-net", &managed_labels("s-1"))
        .expect("fake network");

    let summary = Janitor::new(&engine, SweepScope::AllSessions)
        .sweep()
        .expect("sweep should succeed");

    assert_eq!(
        summary,
        SweepSummary {
            removed_containers: 2,
            removed_networks: 1,
        }
    );
    assert_eq!(engine.live_containers(), vec![String::from("unrelated")]);
    assert_eq!(engine.removed_networks(), vec![String::from("scanywhere-net")]);
}

#[rstest]
fn session_scope_leaves_other_sessions_alone() {
    let engine = FakeEngine::new();
    start(&engine, "gw-a", "s-1");
    start(&engine, "gw-b", "s-2");

    let summary = Janitor::new(&engine, SweepScope::Session(String::from("s-1")))
        .sweep()
        .expect("sweep should succeed");

    assert_eq!(summary.removed_containers, 1);
    assert_eq!(engine.live_containers(), vec![String::from("gw-b")]);
}

#[rstest]
fn sweep_reports_survivors() {
    let engine = FakeEngine::new().with_failing_remove();
    start(&engine, "gw-a", "s-1");

    let err = Janitor::new(&engine, SweepScope::AllSessions)
        .sweep()
        .expect_err("removal failures leave survivors");

    let JanitorError::NotClean { containers, networks } = err else {
        panic!("expected NotClean, got {err:?}");
    };
    assert_eq!(containers, vec![String::from("gw-a")]);
    assert!(networks.is_empty());
}

#[rstest]
fn empty_sweep_is_clean() {
    let engine = FakeEngine::new();
    let summary = Janitor::new(&engine, SweepScope::AllSessions)
        .sweep()
        .expect("nothing to sweep");
    assert_eq!(summary, SweepSummary::default());
}
