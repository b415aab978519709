//! [`ContainerEngine`] backed by the `docker` command line.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::net::IpAddr;
use std::str::FromStr;

use camino::Utf8Path;
use serde::Deserialize;

use super::{ContainerEngine, ContainerSpec, ContainerStatus, EngineError};
use crate::command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};

/// Default Docker CLI binary name.
pub const DEFAULT_DOCKER_BIN: &str = "docker";

/// Drives Docker by shelling out to its CLI.
#[derive(Clone, Debug)]
pub struct DockerCli<R: CommandRunner> {
    bin: String,
    runner: R,
}

impl DockerCli<ProcessCommandRunner> {
    /// Creates an engine wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(bin: impl Into<String>) -> Self {
        Self::new(bin, ProcessCommandRunner)
    }
}

impl<R: CommandRunner> DockerCli<R> {
    /// Creates an engine using the given binary and runner.
    #[must_use]
    pub fn new(bin: impl Into<String>, runner: R) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    /// Returns the runner, mainly so tests can inspect invocations.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    fn invoke(&self, args: &[OsString]) -> Result<CommandOutput, EngineError> {
        Ok(self.runner.run(&self.bin, args)?)
    }

    fn invoke_checked(&self, args: &[OsString]) -> Result<CommandOutput, EngineError> {
        let output = self.invoke(args)?;
        if output.is_success() {
            Ok(output)
        } else {
            Err(CommandError::failure(&self.bin, &output).into())
        }
    }
}

/// Builds the argument vector for `docker run`.
pub(super) fn run_args(spec: &ContainerSpec) -> Vec<OsString> {
    let mut args = vec![OsString::from("run"), OsString::from("--detach")];
    if spec.auto_remove {
        args.push(OsString::from("--rm"));
    }
    push_pair(&mut args, "--name", &spec.name);
    if let Some(network) = spec.network.as_arg() {
        push_pair(&mut args, "--network", &network);
    }
    for cap in &spec.cap_add {
        push_pair(&mut args, "--cap-add", cap);
    }
    for device in &spec.devices {
        push_pair(&mut args, "--device", device);
    }
    for mount in &spec.mounts {
        let suffix = if mount.read_only { ":ro" } else { "" };
        push_pair(
            &mut args,
            "--volume",
            &format!("{}:{}{suffix}", mount.source, mount.target),
        );
    }
    for port in &spec.ports {
        push_pair(
            &mut args,
            "--publish",
            &format!(
                "{}:{}:{}/tcp",
                port.host_ip, port.host_port, port.container_port
            ),
        );
    }
    for (key, value) in &spec.sysctls {
        push_pair(&mut args, "--sysctl", &format!("{key}={value}"));
    }
    for (key, value) in &spec.env {
        push_pair(&mut args, "--env", &format!("{key}={value}"));
    }
    for (key, value) in &spec.labels {
        push_pair(&mut args, "--label", &format!("{key}={value}"));
    }
    args.push(OsString::from(&spec.image));
    args
}

fn push_pair(args: &mut Vec<OsString>, flag: &str, value: &str) {
    args.push(OsString::from(flag));
    args.push(OsString::from(value));
}

fn os_args(parts: &[&str]) -> Vec<OsString> {
    parts.iter().map(OsString::from).collect()
}

fn parse_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct NetworkSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
    #[serde(rename = "Networks", default)]
    networks: BTreeMap<String, EndpointSettings>,
}

#[derive(Debug, Default, Deserialize)]
struct EndpointSettings {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

/// Picks the container's address on `network`, falling back to the
/// top-level address of the default bridge.
pub(super) fn parse_address(
    raw: &str,
    network: Option<&str>,
) -> Result<Option<IpAddr>, EngineError> {
    let settings: NetworkSettings =
        serde_json::from_str(raw.trim()).map_err(|err| EngineError::Parse {
            what: String::from("network settings"),
            message: err.to_string(),
        })?;

    let from_network = network
        .and_then(|name| settings.networks.get(name))
        .map(|endpoint| endpoint.ip_address.as_str());
    let candidate = [from_network, Some(settings.ip_address.as_str())]
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty());

    Ok(candidate.and_then(|value| IpAddr::from_str(value).ok()))
}

impl<R: CommandRunner> ContainerEngine for DockerCli<R> {
    fn image_exists(&self, image: &str) -> Result<bool, EngineError> {
        let output = self.invoke(&os_args(&["image", "inspect", "--format", "{{.Id}}", image]))?;
        Ok(output.is_success())
    }

    fn build_image(&self, context: &Utf8Path, tag: &str) -> Result<(), EngineError> {
        self.invoke_checked(&os_args(&["build", "--tag", tag, context.as_str()]))?;
        Ok(())
    }

    fn prune_images(&self, label: &str) -> Result<(), EngineError> {
        let filter = format!("label={label}");
        self.invoke_checked(&os_args(&["image", "prune", "--force", "--filter", &filter]))?;
        Ok(())
    }

    fn run_detached(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        self.invoke_checked(&run_args(spec))?;
        Ok(spec.name.clone())
    }

    fn status(&self, name: &str) -> Result<Option<ContainerStatus>, EngineError> {
        let output = self.invoke(&os_args(&[
            "container",
            "inspect",
            "--format",
            "{{.State.Status}}",
            name,
        ]))?;
        if !output.is_success() {
            return Ok(None);
        }
        Ok(Some(ContainerStatus::parse(&output.stdout)))
    }

    fn exec(&self, name: &str, argv: &[String]) -> Result<CommandOutput, EngineError> {
        let mut args = os_args(&["exec", name]);
        args.extend(argv.iter().map(OsString::from));
        self.invoke(&args)
    }

    fn address_on(
        &self,
        name: &str,
        network: Option<&str>,
    ) -> Result<Option<IpAddr>, EngineError> {
        let output = self.invoke_checked(&os_args(&[
            "container",
            "inspect",
            "--format",
            "{{json .NetworkSettings}}",
            name,
        ]))?;
        parse_address(&output.stdout, network)
    }

    fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        self.invoke_checked(&os_args(&["rm", "--force", name]))?;
        Ok(())
    }

    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        let mut args = os_args(&["network", "create"]);
        for (key, value) in labels {
            push_pair(&mut args, "--label", &format!("{key}={value}"));
        }
        args.push(OsString::from(name));
        self.invoke_checked(&args)?;
        Ok(())
    }

    fn remove_network(&self, name: &str) -> Result<(), EngineError> {
        self.invoke_checked(&os_args(&["network", "rm", name]))?;
        Ok(())
    }

    fn list_containers(&self, label: &str) -> Result<Vec<String>, EngineError> {
        let filter = format!("label={label}");
        let output = self.invoke_checked(&os_args(&[
            "ps",
            "--all",
            "--format",
            "{{.Names}}",
            "--filter",
            &filter,
        ]))?;
        Ok(parse_lines(&output.stdout))
    }

    fn list_networks(&self, label: &str) -> Result<Vec<String>, EngineError> {
        let filter = format!("label={label}");
        let output = self.invoke_checked(&os_args(&[
            "network",
            "ls",
            "--format",
            "{{.Name}}",
            "--filter",
            &filter,
        ]))?;
        Ok(parse_lines(&output.stdout))
    }
}
