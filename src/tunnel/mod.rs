//! Tunnel endpoints: gateway containers and the cloud instances behind them.
//!
//! A tunnel is a gateway container whose network namespace egresses through
//! a VPN. [`GatewayProvisioner`] starts one, confirms it stays up and that
//! traffic actually leaves through it, and optionally stacks a chained relay
//! gateway on top. Cloud-instance tunnels first obtain their endpoint
//! parameters from an [`InstanceProvisioner`] and then run through the same
//! gateway path. `hideme` tunnels are pinned to a resolved server by
//! [`HidemeEndpoints`] before the gateway starts.

mod gateway;
mod hideme;
mod instance;

use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::time::Duration;

use thiserror::Error;

use crate::config::TrialConfig;
use crate::engine::{EngineError, NetworkMode};
use crate::probe::{ObservedIp, ProbeError};
use crate::relay::RelayError;

pub use gateway::{GATEWAY_DIR_TARGET, GatewayProvisioner, GatewaySettings, IPV6_SYSCTL};
pub use hideme::{
    HidemeEndpoints, HidemeError, HidemeServers, HostResolver, OPENVPN_PORT, PinnedEndpoint,
    ResolveFuture, SERVER_LIST_URL, SystemResolver, render_profile,
};
pub use instance::{
    CommandInstanceProvisioner, InstanceFuture, InstanceProvisioner, InstanceTunnel,
};

/// Lifecycle of a single tunnel.
///
/// `Created -> Starting -> LivenessConfirmed -> ConnectivityConfirmed ->
/// [Chaining ->] Ready -> Stopping -> Stopped`. Any state before `Ready` may
/// move to `Stopping` and end in `Failed`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TunnelState {
    /// Spec prepared, nothing started yet.
    Created,
    /// Container started, liveness not yet checked.
    Starting,
    /// Gateway still running after the settle delay.
    LivenessConfirmed,
    /// Public address observed through the tunnel.
    ConnectivityConfirmed,
    /// A relay is being layered on top of this tunnel.
    Chaining,
    /// Workloads may attach.
    Ready,
    /// Release in progress.
    Stopping,
    /// Released after a successful run.
    Stopped,
    /// Released after failing before `Ready`.
    Failed,
}

impl TunnelState {
    /// Returns whether moving to `next` is a legal transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Starting)
                | (Self::Starting, Self::LivenessConfirmed)
                | (Self::LivenessConfirmed, Self::ConnectivityConfirmed)
                | (Self::ConnectivityConfirmed, Self::Chaining | Self::Ready)
                | (Self::Chaining, Self::Ready)
                | (
                    Self::Created
                        | Self::Starting
                        | Self::LivenessConfirmed
                        | Self::ConnectivityConfirmed
                        | Self::Chaining
                        | Self::Ready,
                    Self::Stopping
                )
                | (Self::Stopping, Self::Stopped | Self::Failed)
        )
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::InvalidTransition`] for illegal transitions.
    pub fn advance(&mut self, next: Self) -> Result<(), TunnelError> {
        if !self.can_advance_to(next) {
            return Err(TunnelError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    /// Records a failure by passing through `Stopping` to `Failed`.
    /// Terminal states are left alone.
    ///
    /// The resources themselves are released by the trial's ledger.
    pub fn fail(&mut self) {
        if self.is_terminal() {
            return;
        }
        if *self != Self::Stopping && self.advance(Self::Stopping).is_err() {
            return;
        }
        if self.advance(Self::Failed).is_err() {
            tracing::warn!(state = %self, "failure could not be recorded");
        }
    }

    /// Returns `true` once workloads may attach.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns `true` for `Stopped` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::LivenessConfirmed => "liveness-confirmed",
            Self::ConnectivityConfirmed => "connectivity-confirmed",
            Self::Chaining => "chaining",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A running gateway and what was observed through it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TunnelHandle {
    /// Gateway container name.
    pub container: String,
    /// Network the gateway container itself is attached to.
    pub network: NetworkMode,
    /// Loopback port of the gateway control API.
    pub control_port: u16,
    /// Public address and country confirmed through the tunnel.
    pub observed: ObservedIp,
    /// Current lifecycle state.
    pub state: TunnelState,
    /// Configuration the gateway runs with, including the observed address.
    pub config: TrialConfig,
}

impl TunnelHandle {
    /// Network mode that shares this gateway's network stack.
    #[must_use]
    pub fn attachment(&self) -> NetworkMode {
        NetworkMode::Container(self.container.clone())
    }

    /// Records that the ledger released this tunnel: `Stopped` if it had
    /// reached `Ready`, `Failed` otherwise.
    pub fn mark_released(&mut self) {
        let was_ready = self.state.is_ready();
        if self.state.advance(TunnelState::Stopping).is_err() {
            self.state.fail();
            return;
        }
        self.state = if was_ready {
            TunnelState::Stopped
        } else {
            TunnelState::Failed
        };
    }
}

/// Errors raised while provisioning tunnels.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Wraps container engine failures.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// The gateway exited before its liveness check.
    #[error("gateway {container} is not running after start")]
    GatewayNotRunning {
        /// Gateway container name.
        container: String,
    },
    /// Connectivity was never confirmed.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// The chained-relay handshake failed.
    #[error(transparent)]
    Relay(#[from] RelayError),
    /// The cloud instance did not become reachable in time.
    #[error("instance tunnel not ready after {waited:?}")]
    ProvisionTimeout {
        /// Time spent waiting.
        waited: Duration,
    },
    /// The instance provisioner failed or returned unusable output.
    #[error("instance provisioning failed: {0}")]
    Instance(String),
    /// No loopback port could be reserved for the control API.
    #[error("failed to reserve a control port: {0}")]
    PortReservation(String),
    /// A state transition was attempted out of order.
    #[error("invalid tunnel transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: TunnelState,
        /// Requested state.
        to: TunnelState,
    },
}

/// Picks the gateway control port.
///
/// A pinned port is used as is. Otherwise a free loopback port is found by
/// binding port 0 and releasing it immediately before the gateway claims it.
///
/// # Errors
///
/// Returns [`TunnelError::PortReservation`] when binding fails.
pub fn reserve_control_port(pinned: Option<u16>) -> Result<u16, TunnelError> {
    if let Some(port) = pinned {
        return Ok(port);
    }
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|err| TunnelError::PortReservation(err.to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|err| TunnelError::PortReservation(err.to_string()))?
        .port();
    drop(listener);
    Ok(port)
}
