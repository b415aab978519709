//! Trial state machine.

use camino::Utf8PathBuf;
use tracing::Instrument;
use uuid::Uuid;

use super::{FatalError, TrialError, TrialOutcome, TrialReleaser, TrialReport, TrialStage};
use crate::config::{
    CHAINED_PROVIDER, CLOUD_INSTANCE_PROVIDERS, CUSTOM_PROVIDER, ConfigError, HIDEME_PROVIDER,
    HarnessConfig, PASS_THROUGH_PROVIDERS, TrialConfig, keys,
};
use crate::engine::{ContainerEngine, NetworkMode, managed_labels};
use crate::ledger::{ResourceId, ResourceLedger};
use crate::probe::{ConnectivityProbe, IpFetcher};
use crate::tunnel::{
    GatewayProvisioner, GatewaySettings, HidemeEndpoints, InstanceProvisioner, TunnelHandle,
    TunnelState,
};
use crate::workload::{TerminalStatus, WorkloadHandle, WorkloadRunner, WorkloadSettings, WorkloadSpec};

/// Settings shared by every trial of a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrialSettings {
    /// Gateway settings.
    pub gateway: GatewaySettings,
    /// Workload settings.
    pub workload: WorkloadSettings,
    /// Directory holding one subdirectory per workload image.
    pub workload_root: Utf8PathBuf,
}

impl TrialSettings {
    /// Derives trial settings from harness configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when a configured directory cannot be
    /// resolved.
    pub fn from_harness(config: &HarnessConfig, session: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewaySettings::from_harness(config, session)?,
            workload: WorkloadSettings {
                poll_interval: config.workload_poll_interval(),
                max_wait: config.workload_max_wait(),
                session: session.to_owned(),
            },
            workload_root: Utf8PathBuf::from(&config.workload_root),
        })
    }
}

/// What a trial has created so far, kept for bookkeeping after release.
#[derive(Debug, Default)]
struct TrialProgress {
    tunnels: Vec<TunnelHandle>,
    workload: Option<WorkloadHandle>,
}

struct Completion {
    status: TerminalStatus,
    ip: String,
    country: String,
    chained: bool,
}

/// Drives trials end to end.
#[derive(Debug)]
pub struct TrialOrchestrator<E, F, I> {
    engine: E,
    probe: ConnectivityProbe<F>,
    instances: Option<I>,
    hideme: Option<HidemeEndpoints>,
    settings: TrialSettings,
}

impl<E, F, I> TrialOrchestrator<E, F, I>
where
    E: ContainerEngine,
    F: IpFetcher,
    I: InstanceProvisioner,
{
    /// Creates an orchestrator without a cloud-instance provisioner.
    #[must_use]
    pub const fn new(engine: E, probe: ConnectivityProbe<F>, settings: TrialSettings) -> Self {
        Self {
            engine,
            probe,
            instances: None,
            hideme: None,
            settings,
        }
    }

    /// Enables cloud-instance tunnels through `instances`.
    #[must_use]
    pub fn with_instances(mut self, instances: I) -> Self {
        self.instances = Some(instances);
        self
    }

    /// Enables `hideme` tunnels, pinned to servers chosen by `endpoints`.
    #[must_use]
    pub fn with_hideme(mut self, endpoints: HidemeEndpoints) -> Self {
        self.hideme = Some(endpoints);
        self
    }

    /// Container engine in use.
    #[must_use]
    pub const fn engine(&self) -> &E {
        &self.engine
    }

    /// Session settings.
    #[must_use]
    pub const fn settings(&self) -> &TrialSettings {
        &self.settings
    }

    /// Runs one trial of `workload_image` under `config`.
    ///
    /// Every resource started is released before this returns, whatever
    /// the outcome. Recoverable failures are reported in the returned
    /// [`TrialReport`].
    ///
    /// # Errors
    ///
    /// Returns [`FatalError`] when the workload image is missing or cannot
    /// be looked up. Nothing has been started in that case.
    pub async fn run_trial(
        &self,
        config: &TrialConfig,
        workload_image: &str,
        chaining: bool,
    ) -> Result<TrialReport, FatalError> {
        let id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "trial",
            id = %id,
            provider = config.provider().unwrap_or("unknown"),
        );
        self.run_trial_inner(id, config, workload_image, chaining)
            .instrument(span)
            .await
    }

    async fn run_trial_inner(
        &self,
        id: String,
        config: &TrialConfig,
        workload_image: &str,
        chaining: bool,
    ) -> Result<TrialReport, FatalError> {
        match self.engine.image_exists(workload_image) {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(image = workload_image, "unknown workload image");
                return Err(FatalError::UnknownImage {
                    image: workload_image.to_owned(),
                });
            }
            Err(source) => {
                return Err(FatalError::ImageCheck {
                    image: workload_image.to_owned(),
                    source,
                });
            }
        }

        let mut ledger = ResourceLedger::new();
        let mut progress = TrialProgress::default();
        let result = self
            .execute(config, workload_image, chaining, &mut ledger, &mut progress)
            .await;

        let releaser = TrialReleaser::new(&self.engine, self.instances.as_ref());
        let release = ledger.release_all(&releaser);
        for tunnel in &mut progress.tunnels {
            tunnel.mark_released();
            tracing::debug!(container = %tunnel.container, state = %tunnel.state, "tunnel released");
        }
        if let Some(workload) = &progress.workload {
            tracing::debug!(container = %workload.container, status = ?workload.status, "workload released");
        }

        let outcome = match result {
            Ok(done) => {
                tracing::info!(
                    ip = %done.ip,
                    country = %done.country,
                    chained = done.chained,
                    "trial completed"
                );
                TrialOutcome::Completed {
                    status: done.status,
                    ip: done.ip,
                    country: done.country,
                    chained: done.chained,
                }
            }
            Err(err) => {
                tracing::warn!(
                    stage = %err.stage(),
                    kind = ?err.kind(),
                    error = %err,
                    "trial abandoned"
                );
                TrialOutcome::Abandoned(err)
            }
        };
        if !release.is_clean() {
            tracing::warn!(failed = release.failed.len(), "some trial resources could not be released");
        }

        Ok(TrialReport {
            id,
            outcome,
            release,
            residual: ledger.len(),
        })
    }

    async fn execute(
        &self,
        config: &TrialConfig,
        workload_image: &str,
        chaining: bool,
        ledger: &mut ResourceLedger,
        progress: &mut TrialProgress,
    ) -> Result<Completion, TrialError> {
        let mut working = self.resolve_endpoint(config, ledger).await?;
        let network = self.trial_network(chaining, ledger)?;
        let provisioner =
            GatewayProvisioner::new(&self.engine, &self.probe, &self.settings.gateway);

        let mut primary = provisioner
            .provision(&working, &network, ledger)
            .await
            .map_err(|err| TrialError::from_tunnel(TrialStage::Gateway, err))?;

        let tunnel = if chaining {
            let chained = provisioner.chain(&mut primary, ledger).await;
            progress.tunnels.push(primary);
            let relay = chained.map_err(|err| TrialError::from_tunnel(TrialStage::Chain, err))?;
            working = working.with_overrides([
                (keys::PUBLIC_IP, relay.observed.ip.as_str()),
                (keys::PROVIDER, CHAINED_PROVIDER),
                (keys::PROTOCOL, "wireguard"),
            ]);
            relay
        } else {
            primary
                .state
                .advance(TunnelState::Ready)
                .map_err(|err| TrialError::from_tunnel(TrialStage::Gateway, err))?;
            working = primary.config.clone();
            primary
        };
        let observed = tunnel.observed.clone();
        progress.tunnels.push(tunnel);

        let spec = self.workload_spec(workload_image)?;
        let runner = WorkloadRunner::new(&self.engine, &self.settings.workload);
        let Some(ready) = progress.tunnels.last() else {
            return Err(TrialError::Unexpected {
                stage: TrialStage::Workload,
                message: String::from("no tunnel to attach to"),
            });
        };
        let handle = runner
            .run(ready, &spec, &working, ledger)
            .map_err(|err| TrialError::from_workload(TrialStage::Workload, &err))?;
        let workload = progress.workload.insert(handle);

        let status = runner
            .await_completion(workload)
            .await
            .map_err(|err| TrialError::from_workload(TrialStage::Completion, &err))?;
        tracing::info!(container = %workload.container, image = workload_image, "workload finished");

        Ok(Completion {
            status,
            ip: observed.ip,
            country: observed.country,
            chained: chaining,
        })
    }

    /// Applies the pass-through rewrite and supplies the endpoint the
    /// gateway cannot pick itself: a started cloud instance or a pinned
    /// `hideme` server.
    async fn resolve_endpoint(
        &self,
        config: &TrialConfig,
        ledger: &mut ResourceLedger,
    ) -> Result<TrialConfig, TrialError> {
        let provider = config.provider().unwrap_or_default();
        let rewritten = rewrite_pass_through(config);
        if provider == HIDEME_PROVIDER {
            return self.pin_hideme(config, &rewritten, ledger).await;
        }
        if !CLOUD_INSTANCE_PROVIDERS.contains(&provider) {
            return Ok(rewritten);
        }
        let Some(instances) = self.instances.as_ref() else {
            return Err(TrialError::Unexpected {
                stage: TrialStage::Instance,
                message: format!("provider '{provider}' needs an instance helper"),
            });
        };
        let tunnel = instances
            .start_instance_tunnel(config)
            .await
            .map_err(|err| TrialError::from_tunnel(TrialStage::Instance, err))?;
        ledger.register(ResourceId::Instance(tunnel.instance_id.clone()));
        tracing::info!(
            instance = %tunnel.instance_id,
            keys = ?tunnel.fragment.keys().collect::<Vec<_>>(),
            "instance endpoint ready"
        );
        Ok(rewritten.with_overrides(tunnel.fragment))
    }

    async fn pin_hideme(
        &self,
        config: &TrialConfig,
        rewritten: &TrialConfig,
        ledger: &mut ResourceLedger,
    ) -> Result<TrialConfig, TrialError> {
        let Some(hideme) = self.hideme.as_ref() else {
            return Err(TrialError::Unexpected {
                stage: TrialStage::Endpoint,
                message: format!("provider '{HIDEME_PROVIDER}' needs a server list"),
            });
        };
        let pinned = hideme
            .pin(config, self.probe.fetcher(), &self.settings.gateway.gateway_dir)
            .await
            .map_err(|err| TrialError::Unexpected {
                stage: TrialStage::Endpoint,
                message: err.to_string(),
            })?;
        ledger.register(ResourceId::File(pinned.profile_path));
        Ok(rewritten.with_overrides(pinned.overrides))
    }

    fn trial_network(
        &self,
        chaining: bool,
        ledger: &mut ResourceLedger,
    ) -> Result<NetworkMode, TrialError> {
        if !chaining {
            return Ok(NetworkMode::Default);
        }
        let name = format!("scanywhere-{}", Uuid::new_v4());
        self.engine
            .create_network(&name, &managed_labels(&self.settings.gateway.session))
            .map_err(|err| TrialError::from_engine(TrialStage::Network, &err))?;
        ledger.register(ResourceId::Network(name.clone()));
        Ok(NetworkMode::Named(name))
    }

    fn workload_spec(&self, image: &str) -> Result<WorkloadSpec, TrialError> {
        WorkloadSpec::from_root(&self.settings.workload_root, image).map_err(|message| {
            TrialError::Unexpected {
                stage: TrialStage::Workload,
                message,
            }
        })
    }
}

/// Rewrites providers the gateway only supports in custom-tunnel mode.
#[must_use]
pub fn rewrite_pass_through(config: &TrialConfig) -> TrialConfig {
    match config.provider() {
        Some(provider) if PASS_THROUGH_PROVIDERS.contains(&provider) => {
            config.with_overrides([(keys::PROVIDER, CUSTOM_PROVIDER)])
        }
        _ => config.clone(),
    }
}
