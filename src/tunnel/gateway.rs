//! Container-based tunnel endpoints.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::time::sleep;
use uuid::Uuid;

use super::{TunnelError, TunnelHandle, TunnelState, reserve_control_port};
use crate::config::{ConfigError, HarnessConfig, TrialConfig, keys};
use crate::engine::{ContainerEngine, ContainerSpec, Mount, NetworkMode, PortBinding, managed_labels};
use crate::fsutil;
use crate::ledger::{ResourceId, ResourceLedger};
use crate::probe::{ConnectivityProbe, IpFetcher, ObservedIp, ProbeSchedule, ProbeTarget};
use crate::relay::{RelayError, RelayHandshake, relay_config};

/// Mount point of the gateway directory inside gateway containers.
pub const GATEWAY_DIR_TARGET: &str = "/gluetun";

/// Sysctl enabling IPv6 inside a container's network namespace.
pub const IPV6_SYSCTL: &str = "net.ipv6.conf.all.disable_ipv6";

/// Settings shared by every gateway a harness session starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatewaySettings {
    /// Primary gateway image.
    pub image: String,
    /// Relay gateway image used when chaining.
    pub relay_image: String,
    /// Absolute host directory mounted at [`GATEWAY_DIR_TARGET`].
    pub gateway_dir: Utf8PathBuf,
    /// Pinned control port, if any.
    pub control_port: Option<u16>,
    /// Delay between start and the liveness check.
    pub settle_delay: Duration,
    /// Connectivity probe budget.
    pub probe: ProbeSchedule,
    /// Session identifier recorded in resource labels.
    pub session: String,
}

impl GatewaySettings {
    /// Derives gateway settings from harness configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the gateway directory cannot be
    /// resolved to an absolute path.
    pub fn from_harness(config: &HarnessConfig, session: &str) -> Result<Self, ConfigError> {
        let gateway_dir = fsutil::absolute(&config.gateway_dir_path()).map_err(|message| {
            ConfigError::Read {
                path: config.gateway_dir.clone(),
                message,
            }
        })?;
        Ok(Self {
            image: config.gateway_image.clone(),
            relay_image: config.relay_gateway_image.clone(),
            gateway_dir,
            control_port: config.control_port,
            settle_delay: config.settle_delay(),
            probe: ProbeSchedule {
                max_wait: config.probe_max_wait(),
                poll_interval: config.probe_poll_interval(),
            },
            session: session.to_owned(),
        })
    }
}

/// Starts gateway containers and confirms they carry traffic.
#[derive(Debug)]
pub struct GatewayProvisioner<'a, E: ContainerEngine, F: IpFetcher> {
    engine: &'a E,
    probe: &'a ConnectivityProbe<F>,
    settings: &'a GatewaySettings,
}

impl<'a, E: ContainerEngine, F: IpFetcher> GatewayProvisioner<'a, E, F> {
    /// Creates a provisioner over the given collaborators.
    #[must_use]
    pub const fn new(
        engine: &'a E,
        probe: &'a ConnectivityProbe<F>,
        settings: &'a GatewaySettings,
    ) -> Self {
        Self {
            engine,
            probe,
            settings,
        }
    }

    /// Starts the primary gateway for `config` on `network`.
    ///
    /// The returned handle is in [`TunnelState::ConnectivityConfirmed`]; the
    /// caller either marks it ready or chains a relay on top of it. The
    /// container is registered in `ledger` as soon as it exists.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::GatewayNotRunning`] when the gateway dies during
    /// the settle delay, [`TunnelError::Probe`] when connectivity is never
    /// confirmed, and engine errors otherwise.
    pub async fn provision(
        &self,
        config: &TrialConfig,
        network: &NetworkMode,
        ledger: &mut ResourceLedger,
    ) -> Result<TunnelHandle, TunnelError> {
        self.start("gateway", &self.settings.image, config, network, ledger)
            .await
    }

    /// Layers a relay gateway on top of `primary`.
    ///
    /// Runs the relay handshake inside `primary`, then starts the relay
    /// gateway on the same network, routing through the primary's address.
    /// On success both handles are [`TunnelState::Ready`] and the relay
    /// handle is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Relay`] when the handshake fails, and the same
    /// errors as [`Self::provision`] for the relay gateway.
    pub async fn chain(
        &self,
        primary: &mut TunnelHandle,
        ledger: &mut ResourceLedger,
    ) -> Result<TunnelHandle, TunnelError> {
        primary.state.advance(TunnelState::Chaining)?;
        match self.start_relay(primary, ledger).await {
            Ok(mut relay) => {
                relay.state.advance(TunnelState::Ready)?;
                primary.state.advance(TunnelState::Ready)?;
                Ok(relay)
            }
            Err(err) => {
                primary.state.fail();
                Err(err)
            }
        }
    }

    async fn start_relay(
        &self,
        primary: &TunnelHandle,
        ledger: &mut ResourceLedger,
    ) -> Result<TunnelHandle, TunnelError> {
        tracing::info!(container = %primary.container, "chaining relay through gateway");
        let params = RelayHandshake::new(self.engine).perform(&primary.container)?;
        let gateway_ip = self
            .engine
            .address_on(&primary.container, primary.network.network_name())?
            .ok_or_else(|| RelayError::NoGatewayAddress {
                container: primary.container.clone(),
            })?;
        let config = relay_config(&params, gateway_ip)?;
        self.start(
            "relay",
            &self.settings.relay_image,
            &config,
            &primary.network,
            ledger,
        )
        .await
    }

    async fn start(
        &self,
        role: &str,
        image: &str,
        config: &TrialConfig,
        network: &NetworkMode,
        ledger: &mut ResourceLedger,
    ) -> Result<TunnelHandle, TunnelError> {
        let mut state = TunnelState::Created;
        let port = reserve_control_port(self.settings.control_port)?;
        let name = format!("scanywhere-{role}-{}", Uuid::new_v4());
        let spec = self.container_spec(&name, image, config, network, port);

        tracing::info!(container = %name, image, port, "starting {role}");
        state.advance(TunnelState::Starting)?;
        let container = match self.engine.run_detached(&spec) {
            Ok(container) => container,
            Err(err) => {
                state.fail();
                return Err(err.into());
            }
        };
        ledger.register(ResourceId::Container(container.clone()));

        match self.confirm(&container, port, &mut state).await {
            Ok(observed) => {
                tracing::info!(
                    container = %container,
                    ip = %observed.ip,
                    country = %observed.country,
                    "{role} connected"
                );
                let resolved = config.with_overrides([(keys::PUBLIC_IP, observed.ip.as_str())]);
                Ok(TunnelHandle {
                    container,
                    network: network.clone(),
                    control_port: port,
                    observed,
                    state,
                    config: resolved,
                })
            }
            Err(err) => {
                tracing::debug!(container = %container, from = %state, "{role} failed before ready");
                state.fail();
                Err(err)
            }
        }
    }

    async fn confirm(
        &self,
        container: &str,
        port: u16,
        state: &mut TunnelState,
    ) -> Result<ObservedIp, TunnelError> {
        sleep(self.settings.settle_delay).await;
        let alive = self
            .engine
            .status(container)?
            .is_some_and(|status| status.is_active());
        if !alive {
            return Err(TunnelError::GatewayNotRunning {
                container: container.to_owned(),
            });
        }
        state.advance(TunnelState::LivenessConfirmed)?;

        let observed = self
            .probe
            .probe(&ProbeTarget::gateway_control(port), &self.settings.probe)
            .await?;
        state.advance(TunnelState::ConnectivityConfirmed)?;
        Ok(observed)
    }

    pub(super) fn container_spec(
        &self,
        name: &str,
        image: &str,
        config: &TrialConfig,
        network: &NetworkMode,
        port: u16,
    ) -> ContainerSpec {
        let mut env = config.as_env().clone();
        env.insert(keys::CONTROL_ADDRESS.to_owned(), format!(":{port}"));
        ContainerSpec {
            name: name.to_owned(),
            image: image.to_owned(),
            network: network.clone(),
            cap_add: vec![String::from("NET_ADMIN")],
            devices: vec![String::from("/dev/net/tun")],
            mounts: vec![Mount {
                source: self.settings.gateway_dir.clone(),
                target: GATEWAY_DIR_TARGET.to_owned(),
                read_only: false,
            }],
            ports: vec![PortBinding {
                host_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                host_port: port,
                container_port: port,
            }],
            sysctls: BTreeMap::from([(IPV6_SYSCTL.to_owned(), String::from("0"))]),
            env,
            labels: managed_labels(&self.settings.session),
            auto_remove: true,
        }
    }
}
