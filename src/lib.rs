//! Core library for the `scanywhere` measurement harness.
//!
//! Each trial brings up a VPN gateway container, confirms the tunnel by
//! probing the exit address it reports, optionally chains a relay gateway
//! behind it, and runs a measurement workload inside the gateway's network
//! namespace. Everything a trial starts is recorded in a
//! [`ledger::ResourceLedger`] and released before the next trial begins.

pub mod command;
pub mod config;
pub mod engine;
pub mod fsutil;
pub mod janitor;
pub mod ledger;
pub mod probe;
pub mod relay;
pub mod selection;
pub mod test_support;
pub mod trial;
pub mod tunnel;
pub mod workload;

pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner};
pub use config::{ConfigError, HarnessConfig, ProviderProfiles, TrialConfig};
pub use engine::{ContainerEngine, DockerCli, EngineError};
pub use janitor::{Janitor, JanitorError, SweepScope, SweepSummary};
pub use ledger::{ResourceId, ResourceLedger};
pub use probe::{ConnectivityProbe, HttpIpFetcher, ObservedIp, ProbeError};
pub use selection::{SelectionMode, SelectionPolicy};
pub use trial::{
    Campaign, CampaignPlan, FatalError, TrialError, TrialErrorKind, TrialOrchestrator,
    TrialOutcome, TrialReport,
};
pub use tunnel::{GatewayProvisioner, TunnelError, TunnelHandle, TunnelState};
pub use workload::{WorkloadRunner, WorkloadSpec};
