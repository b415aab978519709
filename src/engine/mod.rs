//! Container engine abstraction.
//!
//! Gateways and workloads are containers. The orchestrator only needs a
//! narrow set of engine capabilities, captured by [`ContainerEngine`]; the
//! production implementation is [`DockerCli`], which drives the `docker`
//! command line through a [`crate::command::CommandRunner`].

mod docker;

use std::collections::BTreeMap;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::command::{CommandError, CommandOutput};

pub use docker::{DEFAULT_DOCKER_BIN, DockerCli};

/// Label carried by every container and network started by this crate.
pub const MANAGED_LABEL: &str = "scanywhere.managed";

/// Label recording the session that started a resource.
pub const SESSION_LABEL: &str = "scanywhere.session";

/// Labels attached to every resource started during `session`.
#[must_use]
pub fn managed_labels(session: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_LABEL.to_owned(), String::from("true")),
        (SESSION_LABEL.to_owned(), session.to_owned()),
    ])
}

/// Network attachment for a container.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum NetworkMode {
    /// Engine default bridge network.
    #[default]
    Default,
    /// Host network stack.
    Host,
    /// A named, user-defined network.
    Named(String),
    /// Share the network namespace of another container.
    Container(String),
}

impl NetworkMode {
    /// Renders the value passed to `--network`, if any.
    #[must_use]
    pub fn as_arg(&self) -> Option<String> {
        match self {
            Self::Default => None,
            Self::Host => Some(String::from("host")),
            Self::Named(name) => Some(name.clone()),
            Self::Container(name) => Some(format!("container:{name}")),
        }
    }

    /// Name of the user-defined network, when attached to one.
    #[must_use]
    pub fn network_name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name.as_str()),
            Self::Default | Self::Host | Self::Container(_) => None,
        }
    }
}

/// Bind mount from the host into a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mount {
    /// Host path.
    pub source: Utf8PathBuf,
    /// Path inside the container.
    pub target: String,
    /// Whether the mount is read-only.
    pub read_only: bool,
}

/// TCP port published from a container onto a host address.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PortBinding {
    /// Host address the port is bound to.
    pub host_ip: IpAddr,
    /// Host port.
    pub host_port: u16,
    /// Container port.
    pub container_port: u16,
}

/// Everything needed to start a detached container.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Network attachment.
    pub network: NetworkMode,
    /// Linux capabilities to add.
    pub cap_add: Vec<String>,
    /// Host devices to expose (`host:container`).
    pub devices: Vec<String>,
    /// Bind mounts.
    pub mounts: Vec<Mount>,
    /// Published ports.
    pub ports: Vec<PortBinding>,
    /// Namespaced kernel parameters.
    pub sysctls: BTreeMap<String, String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Resource labels.
    pub labels: BTreeMap<String, String>,
    /// Remove the container once it stops.
    pub auto_remove: bool,
}

/// Lifecycle status reported by the engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContainerStatus {
    /// Created but not started.
    Created,
    /// Running.
    Running,
    /// Restarting after a failure.
    Restarting,
    /// Paused.
    Paused,
    /// Being removed.
    Removing,
    /// Stopped.
    Exited,
    /// Dead.
    Dead,
    /// Any status this crate does not know about.
    Other(String),
}

impl ContainerStatus {
    /// Parses the engine's status string.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Whether the container still counts as running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Restarting)
    }
}

/// Errors raised by a container engine.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EngineError {
    /// The engine command failed or could not be spawned.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// The engine produced output that could not be interpreted.
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// What was being parsed.
        what: String,
        /// Parser error message.
        message: String,
    },
}

/// Capabilities required from a container engine.
pub trait ContainerEngine {
    /// Returns whether `image` is present locally.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine cannot be queried.
    fn image_exists(&self, image: &str) -> Result<bool, EngineError>;

    /// Builds `context` into an image tagged `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the build fails.
    fn build_image(&self, context: &Utf8Path, tag: &str) -> Result<(), EngineError>;

    /// Removes unused images carrying `label`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when pruning fails.
    fn prune_images(&self, label: &str) -> Result<(), EngineError>;

    /// Starts a detached container and returns its name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the container cannot be started.
    fn run_detached(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Current status of `name`, or `None` when the container does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the engine cannot be queried.
    fn status(&self, name: &str) -> Result<Option<ContainerStatus>, EngineError>;

    /// Runs `argv` inside a running container.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the exec cannot be started.
    fn exec(&self, name: &str, argv: &[String]) -> Result<CommandOutput, EngineError>;

    /// Address of the container on `network` (or its default address).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when inspection fails.
    fn address_on(&self, name: &str, network: Option<&str>)
    -> Result<Option<IpAddr>, EngineError>;

    /// Stops a container if it is running and removes it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the removal request fails.
    fn remove_container(&self, name: &str) -> Result<(), EngineError>;

    /// Creates a user-defined network.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the network cannot be created.
    fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), EngineError>;

    /// Removes a user-defined network.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the network cannot be removed.
    fn remove_network(&self, name: &str) -> Result<(), EngineError>;

    /// Lists containers (running or not) carrying `label`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when listing fails.
    fn list_containers(&self, label: &str) -> Result<Vec<String>, EngineError>;

    /// Lists networks carrying `label`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when listing fails.
    fn list_networks(&self, label: &str) -> Result<Vec<String>, EngineError>;
}

#[cfg(test)]
mod tests;
