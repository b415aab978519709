//! One complete provision, confirm, run and teardown cycle.
//!
//! [`TrialOrchestrator::run_trial`] drives a single trial and owns the
//! cleanup contract: every resource it starts is recorded in a
//! [`ResourceLedger`](crate::ledger::ResourceLedger) and released on every
//! exit path. Only a missing workload image is fatal; every other failure
//! is logged, cleaned up and reported as [`TrialOutcome::Abandoned`].
//! [`Campaign`] repeats trials, choosing a fresh location pin each time.

mod campaign;
mod orchestrator;
mod releaser;

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::engine::EngineError;
use crate::ledger::ReleaseReport;
use crate::probe::ProbeError;
use crate::tunnel::TunnelError;
use crate::workload::{TerminalStatus, WorkloadError};

pub use campaign::{Campaign, CampaignPlan, CampaignSummary};
pub use orchestrator::{TrialOrchestrator, TrialSettings, rewrite_pass_through};
pub use releaser::TrialReleaser;

/// Step of a trial, recorded with failures.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrialStage {
    /// Pinning a provider server the gateway cannot choose itself.
    Endpoint,
    /// Starting a cloud instance endpoint.
    Instance,
    /// Creating the per-trial network.
    Network,
    /// Starting and confirming the primary gateway.
    Gateway,
    /// Layering the chained relay.
    Chain,
    /// Starting the workload.
    Workload,
    /// Waiting for the workload to finish.
    Completion,
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Endpoint => "endpoint",
            Self::Instance => "instance",
            Self::Network => "network",
            Self::Gateway => "gateway",
            Self::Chain => "chain",
            Self::Workload => "workload",
            Self::Completion => "completion",
        };
        f.write_str(label)
    }
}

/// Recoverable trial failures.
#[derive(Debug, Error)]
pub enum TrialError {
    /// Connectivity was never confirmed within the probe budget.
    #[error("{stage}: {source}")]
    ProbeTimeout {
        /// Stage that was probing.
        stage: TrialStage,
        /// Probe failure.
        #[source]
        source: ProbeError,
    },
    /// A gateway died during its settle delay.
    #[error("{stage}: gateway {container} is not running")]
    GatewayNotRunning {
        /// Stage that started the gateway.
        stage: TrialStage,
        /// Gateway container.
        container: String,
    },
    /// A cloud instance never became reachable.
    #[error("instance not ready after {waited:?}")]
    ProvisionTimeout {
        /// Time spent waiting.
        waited: Duration,
    },
    /// Any other failure.
    #[error("{stage}: {message}")]
    Unexpected {
        /// Stage that failed.
        stage: TrialStage,
        /// Failure description.
        message: String,
    },
}

/// Discriminant of [`TrialError`] for matching and logging.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TrialErrorKind {
    /// See [`TrialError::ProbeTimeout`].
    ProbeTimeout,
    /// See [`TrialError::GatewayNotRunning`].
    GatewayNotRunning,
    /// See [`TrialError::ProvisionTimeout`].
    ProvisionTimeout,
    /// See [`TrialError::Unexpected`].
    Unexpected,
}

impl TrialError {
    /// Kind of failure.
    #[must_use]
    pub const fn kind(&self) -> TrialErrorKind {
        match self {
            Self::ProbeTimeout { .. } => TrialErrorKind::ProbeTimeout,
            Self::GatewayNotRunning { .. } => TrialErrorKind::GatewayNotRunning,
            Self::ProvisionTimeout { .. } => TrialErrorKind::ProvisionTimeout,
            Self::Unexpected { .. } => TrialErrorKind::Unexpected,
        }
    }

    /// Stage the failure occurred in.
    #[must_use]
    pub const fn stage(&self) -> TrialStage {
        match self {
            Self::ProbeTimeout { stage, .. }
            | Self::GatewayNotRunning { stage, .. }
            | Self::Unexpected { stage, .. } => *stage,
            Self::ProvisionTimeout { .. } => TrialStage::Instance,
        }
    }

    pub(crate) fn from_tunnel(stage: TrialStage, err: TunnelError) -> Self {
        match err {
            TunnelError::Probe(source) => Self::ProbeTimeout { stage, source },
            TunnelError::GatewayNotRunning { container } => {
                Self::GatewayNotRunning { stage, container }
            }
            TunnelError::ProvisionTimeout { waited } => Self::ProvisionTimeout { waited },
            other => Self::Unexpected {
                stage,
                message: other.to_string(),
            },
        }
    }

    pub(crate) fn from_workload(stage: TrialStage, err: &WorkloadError) -> Self {
        Self::Unexpected {
            stage,
            message: err.to_string(),
        }
    }

    pub(crate) fn from_engine(stage: TrialStage, err: &EngineError) -> Self {
        Self::Unexpected {
            stage,
            message: err.to_string(),
        }
    }
}

/// Failures that stop the whole process.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The workload image is not present locally.
    #[error("unknown workload image '{image}'")]
    UnknownImage {
        /// Requested image.
        image: String,
    },
    /// The engine could not be asked whether the image exists.
    #[error("failed to look up workload image '{image}': {source}")]
    ImageCheck {
        /// Requested image.
        image: String,
        /// Engine failure.
        #[source]
        source: EngineError,
    },
}

/// How a trial ended.
#[derive(Debug)]
pub enum TrialOutcome {
    /// The workload ran to completion.
    Completed {
        /// How the workload finished.
        status: TerminalStatus,
        /// Public address the workload egressed from.
        ip: String,
        /// Country reported for that address.
        country: String,
        /// Whether a chained relay carried the traffic.
        chained: bool,
    },
    /// The trial failed and was cleaned up.
    Abandoned(TrialError),
}

impl TrialOutcome {
    /// Returns `true` for [`TrialOutcome::Completed`].
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Result of one trial, including its cleanup.
#[derive(Debug)]
pub struct TrialReport {
    /// Trial identifier used in logs.
    pub id: String,
    /// How the trial ended.
    pub outcome: TrialOutcome,
    /// What the ledger drain released.
    pub release: ReleaseReport,
    /// Resources still recorded after the drain; always zero.
    pub residual: usize,
}
