//! Workload containers attached to a ready tunnel.
//!
//! A workload shares the gateway's network namespace, so all of its traffic
//! (DNS included) egresses through the tunnel. Completion is detected by
//! polling the engine; an exit code of zero and a crash look the same.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::TrialConfig;
use crate::engine::{ContainerEngine, ContainerSpec, EngineError, Mount, managed_labels};
use crate::fsutil;
use crate::ledger::{ResourceId, ResourceLedger};
use crate::tunnel::{IPV6_SYSCTL, TunnelHandle, TunnelState};

/// Extra environment every workload receives on top of the trial config.
pub const WORKLOAD_ENV: [(&str, &str); 1] = [("PYTHONUNBUFFERED", "1")];

/// Image and host directories of a workload.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkloadSpec {
    /// Workload image tag.
    pub image: String,
    /// Host directory mounted read-only at `/<image>/resources`.
    pub resources_dir: Utf8PathBuf,
    /// Host directory mounted at `/<image>/results`.
    pub results_dir: Utf8PathBuf,
}

impl WorkloadSpec {
    /// Derives the spec for `image` from `<root>/<image>/{resources,results}`.
    ///
    /// # Errors
    ///
    /// Returns a message when `root` cannot be made absolute.
    pub fn from_root(root: &Utf8Path, image: &str) -> Result<Self, String> {
        let base = fsutil::absolute(&root.join(image))?;
        Ok(Self {
            image: image.to_owned(),
            resources_dir: base.join("resources"),
            results_dir: base.join("results"),
        })
    }

    fn mounts(&self) -> Vec<Mount> {
        let mut mounts = Vec::new();
        if self.resources_dir.is_dir() {
            mounts.push(Mount {
                source: self.resources_dir.clone(),
                target: format!("/{}/resources", self.image),
                read_only: true,
            });
        }
        if self.results_dir.is_dir() {
            mounts.push(Mount {
                source: self.results_dir.clone(),
                target: format!("/{}/results", self.image),
                read_only: false,
            });
        }
        mounts
    }
}

/// Last observed state of a workload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkloadStatus {
    /// Created, running or restarting.
    Running,
    /// Stopped for any reason.
    Exited,
    /// The engine no longer knows the container.
    Missing,
}

/// How a workload finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerminalStatus {
    /// The engine reported a non-running status.
    Exited,
    /// The container disappeared between polls.
    VanishedWhilePolling,
}

/// A started workload container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkloadHandle {
    /// Container name.
    pub container: String,
    /// Image the container runs.
    pub image: String,
    /// Last observed status.
    pub status: WorkloadStatus,
}

/// Polling and labelling settings for workloads.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkloadSettings {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Optional upper bound on completion; unbounded when `None`.
    pub max_wait: Option<Duration>,
    /// Session identifier recorded in resource labels.
    pub session: String,
}

/// Errors raised while running workloads.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// Wraps container engine failures.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The tunnel is not in a state workloads may attach to.
    #[error("tunnel {container} is {state}, not ready")]
    TunnelNotReady {
        /// Gateway container.
        container: String,
        /// Its current state.
        state: TunnelState,
    },
    /// The workload outlived the configured bound.
    #[error("workload {container} still running after {waited:?}")]
    Timeout {
        /// Workload container.
        container: String,
        /// Time spent polling.
        waited: Duration,
    },
}

/// Starts workloads and waits for them to finish.
#[derive(Debug)]
pub struct WorkloadRunner<'a, E: ContainerEngine> {
    engine: &'a E,
    settings: &'a WorkloadSettings,
}

impl<'a, E: ContainerEngine> WorkloadRunner<'a, E> {
    /// Creates a runner over `engine`.
    #[must_use]
    pub const fn new(engine: &'a E, settings: &'a WorkloadSettings) -> Self {
        Self { engine, settings }
    }

    /// Starts `spec` inside the network namespace of `tunnel`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::TunnelNotReady`] unless the tunnel is
    /// [`TunnelState::Ready`], and engine errors otherwise.
    pub fn run(
        &self,
        tunnel: &TunnelHandle,
        spec: &WorkloadSpec,
        config: &TrialConfig,
        ledger: &mut ResourceLedger,
    ) -> Result<WorkloadHandle, WorkloadError> {
        if !tunnel.state.is_ready() {
            return Err(WorkloadError::TunnelNotReady {
                container: tunnel.container.clone(),
                state: tunnel.state,
            });
        }
        let mut env = config.as_env().clone();
        env.extend(
            WORKLOAD_ENV
                .iter()
                .map(|(key, value)| ((*key).to_owned(), (*value).to_owned())),
        );
        let container_spec = ContainerSpec {
            name: format!("scanywhere-{}-{}", spec.image, Uuid::new_v4()),
            image: spec.image.clone(),
            network: tunnel.attachment(),
            mounts: spec.mounts(),
            sysctls: BTreeMap::from([(IPV6_SYSCTL.to_owned(), String::from("0"))]),
            env,
            labels: managed_labels(&self.settings.session),
            auto_remove: false,
            ..ContainerSpec::default()
        };
        let container = self.engine.run_detached(&container_spec)?;
        ledger.register(ResourceId::Container(container.clone()));
        tracing::info!(
            container = %container,
            image = %spec.image,
            gateway = %tunnel.container,
            "workload started"
        );
        Ok(WorkloadHandle {
            container,
            image: spec.image.clone(),
            status: WorkloadStatus::Running,
        })
    }

    /// Polls `handle` until it stops running.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Timeout`] when a bound is configured and
    /// exceeded, and engine errors otherwise.
    pub async fn await_completion(
        &self,
        handle: &mut WorkloadHandle,
    ) -> Result<TerminalStatus, WorkloadError> {
        let started = Instant::now();
        loop {
            match self.engine.status(&handle.container)? {
                None => {
                    handle.status = WorkloadStatus::Missing;
                    tracing::info!(container = %handle.container, "workload vanished");
                    return Ok(TerminalStatus::VanishedWhilePolling);
                }
                Some(status) if !status.is_active() => {
                    handle.status = WorkloadStatus::Exited;
                    tracing::info!(container = %handle.container, status = ?status, "workload finished");
                    return Ok(TerminalStatus::Exited);
                }
                Some(_) => {}
            }

            let waited = started.elapsed();
            if self.settings.max_wait.is_some_and(|limit| waited > limit) {
                return Err(WorkloadError::Timeout {
                    container: handle.container.clone(),
                    waited,
                });
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}
