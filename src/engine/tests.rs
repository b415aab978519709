//! Unit tests for the Docker CLI engine.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use rstest::{fixture, rstest};

use super::docker::{parse_address, run_args};
use super::*;
use crate::test_support::ScriptedRunner;

#[fixture]
fn docker() -> DockerCli<ScriptedRunner> {
    DockerCli::new(DEFAULT_DOCKER_BIN, ScriptedRunner::new())
}

fn rendered(args: &[std::ffi::OsString]) -> Vec<String> {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

#[rstest]
fn run_args_place_image_last_and_bind_ports_to_loopback() {
    let spec = ContainerSpec {
        name: String::from("gw-1"),
        image: String::from("gateway:latest"),
        network: NetworkMode::Named(String::from("trial-net")),
        cap_add: vec![String::from("NET_ADMIN")],
        devices: vec![String::from("/dev/net/tun:/dev/net/tun")],
        mounts: vec![Mount {
            source: "/srv/gw".into(),
            target: String::from("/gluetun"),
            read_only: true,
        }],
        ports: vec![PortBinding {
            host_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            host_port: 41000,
            container_port: 41000,
        }],
        sysctls: BTreeMap::from([(
            String::from("net.ipv6.conf.all.disable_ipv6"),
            String::from("0"),
        )]),
        env: BTreeMap::from([(String::from("VPN_TYPE"), String::from("wireguard"))]),
        labels: BTreeMap::from([(String::from(MANAGED_LABEL), String::from("true"))]),
        auto_remove: true,
    };

    let args = rendered(&run_args(&spec));

    assert_eq!(args.first().map(String::as_str), Some("run"));
    assert_eq!(args.last().map(String::as_str), Some("gateway:latest"));
    for expected in [
        "--rm",
        "trial-net",
        "NET_ADMIN",
        "/dev/net/tun:/dev/net/tun",
        "/srv/gw:/gluetun:ro",
        "127.0.0.1:41000:41000/tcp",
        "net.ipv6.conf.all.disable_ipv6=0",
        "VPN_TYPE=wireguard",
        "scanywhere.managed=true",
    ] {
        assert!(
            args.iter().any(|arg| arg == expected),
            "missing {expected} in {args:?}"
        );
    }
}

#[rstest]
fn run_args_share_namespace_for_container_mode() {
    let spec = ContainerSpec {
        name: String::from("workload"),
        image: String::from("probe"),
        network: NetworkMode::Container(String::from("gw-1")),
        ..ContainerSpec::default()
    };

    let args = rendered(&run_args(&spec));

    assert!(args.iter().any(|arg| arg == "container:gw-1"));
    assert!(!args.iter().any(|arg| arg == "--rm"));
}

#[rstest]
fn status_treats_failed_inspect_as_missing(docker: DockerCli<ScriptedRunner>) {
    docker.runner().push_failure(1);
    let status = docker.status("gone").expect("status query");
    assert_eq!(status, None);
}

#[rstest]
#[case("running\n", ContainerStatus::Running, true)]
#[case("restarting", ContainerStatus::Restarting, true)]
#[case("created", ContainerStatus::Created, true)]
#[case("exited", ContainerStatus::Exited, false)]
#[case("weird", ContainerStatus::Other(String::from("weird")), false)]
fn status_parses_engine_states(
    docker: DockerCli<ScriptedRunner>,
    #[case] raw: &str,
    #[case] expected: ContainerStatus,
    #[case] active: bool,
) {
    docker.runner().push_output(Some(0), raw, "");
    let status = docker
        .status("gw")
        .expect("status query")
        .expect("present");
    assert_eq!(status, expected);
    assert_eq!(status.is_active(), active);
}

#[rstest]
fn image_exists_reflects_inspect_exit_code(docker: DockerCli<ScriptedRunner>) {
    docker.runner().push_success();
    docker.runner().push_failure(1);

    assert!(docker.image_exists("present").expect("inspect"));
    assert!(!docker.image_exists("absent").expect("inspect"));
}

#[rstest]
fn remove_container_forces_removal(docker: DockerCli<ScriptedRunner>) {
    docker.runner().push_success();
    docker.remove_container("gw").expect("remove");
    let invocation = docker.runner().invocations().pop().expect("invocation");
    assert_eq!(invocation.command_string(), "docker rm --force gw");
}

#[rstest]
fn remove_container_surfaces_engine_failures(docker: DockerCli<ScriptedRunner>) {
    docker.runner().push_failure(1);
    let err = docker.remove_container("gw").expect_err("removal should fail");
    assert!(matches!(
        err,
        EngineError::Command(CommandError::Failure {
            status: Some(1),
            ..
        })
    ));
}

#[rstest]
fn list_containers_filters_by_label(docker: DockerCli<ScriptedRunner>) {
    docker.runner().push_output(Some(0), "gw-a\n\nwl-b\n", "");

    let names = docker.list_containers(MANAGED_LABEL).expect("list");

    assert_eq!(names, vec![String::from("gw-a"), String::from("wl-b")]);
    let invocation = docker
        .runner()
        .invocations()
        .pop()
        .expect("recorded invocation");
    assert!(
        invocation
            .command_string()
            .contains("--filter label=scanywhere.managed")
    );
}

#[rstest]
#[case(r#"{"IPAddress":"172.17.0.2","Networks":{}}"#, None, Some("172.17.0.2"))]
#[case(
    r#"{"IPAddress":"","Networks":{"trial":{"IPAddress":"10.1.0.3"}}}"#,
    Some("trial"),
    Some("10.1.0.3")
)]
#[case(
    r#"{"IPAddress":"172.17.0.2","Networks":{"trial":{"IPAddress":"10.1.0.3"}}}"#,
    Some("trial"),
    Some("10.1.0.3")
)]
#[case(r#"{"IPAddress":"","Networks":{}}"#, Some("trial"), None)]
fn parse_address_prefers_named_network(
    #[case] raw: &str,
    #[case] network: Option<&str>,
    #[case] expected: Option<&str>,
) {
    let address = parse_address(raw, network).expect("parse");
    let wanted = expected.map(|value| value.parse::<IpAddr>().expect("ip literal"));
    assert_eq!(address, wanted);
}

#[rstest]
fn parse_address_rejects_garbage() {
    let err = parse_address("not json", None).expect_err("garbage should fail");
    assert!(matches!(err, EngineError::Parse { .. }));
}
