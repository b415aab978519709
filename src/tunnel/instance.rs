//! Cloud-instance tunnel endpoints provided by an external helper.
//!
//! Bootstrapping the remote instance (network, keys, firewalling) is the
//! helper's business. The harness only runs `<helper> start`, which must
//! print a JSON object `{"instance_id": "...", "config": {KEY: VALUE, ...}}`
//! once the instance accepts tunnel traffic, and `<helper> terminate <id>`
//! when the trial ends. A `start` that outlives its timeout is killed, so it
//! cannot go on to create an instance nobody records.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

use super::TunnelError;
use crate::command::{CommandError, CommandRunner};
use crate::config::{ConfigLayer, TrialConfig, keys};

/// A reachable cloud instance and the gateway parameters pointing at it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct InstanceTunnel {
    /// Identifier used to terminate the instance.
    pub instance_id: String,
    /// Gateway configuration fragment: peer keys, addresses, endpoint.
    #[serde(default, rename = "config")]
    pub fragment: ConfigLayer,
}

/// Future returned by [`InstanceProvisioner::start_instance_tunnel`].
pub type InstanceFuture<'a> =
    Pin<Box<dyn Future<Output = Result<InstanceTunnel, TunnelError>> + Send + 'a>>;

/// Black-box provider of cloud-instance tunnel endpoints.
pub trait InstanceProvisioner {
    /// Starts an instance and waits until it accepts tunnel traffic.
    ///
    /// Fails with [`TunnelError::ProvisionTimeout`] when the instance is not
    /// ready in time.
    fn start_instance_tunnel<'a>(&'a self, config: &'a TrialConfig) -> InstanceFuture<'a>;

    /// Terminates a previously started instance.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Instance`] when termination fails.
    fn terminate(&self, instance_id: &str) -> Result<(), TunnelError>;
}

/// [`InstanceProvisioner`] shelling out to a helper program.
#[derive(Clone, Debug)]
pub struct CommandInstanceProvisioner<R> {
    program: String,
    runner: R,
    timeout: Duration,
}

impl<R> CommandInstanceProvisioner<R>
where
    R: CommandRunner + Send + Sync,
{
    /// Creates a provisioner running `program` with an overall `timeout`.
    #[must_use]
    pub fn new(program: impl Into<String>, runner: R, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            runner,
            timeout,
        }
    }

    /// Returns the runner, mainly so tests can inspect invocations.
    #[must_use]
    pub const fn runner(&self) -> &R {
        &self.runner
    }

    fn parse_report(&self, stdout: &str) -> Result<InstanceTunnel, TunnelError> {
        let report: InstanceTunnel = serde_json::from_str(stdout.trim()).map_err(|err| {
            TunnelError::Instance(format!("{} printed invalid JSON: {err}", self.program))
        })?;
        if report.instance_id.trim().is_empty() {
            return Err(TunnelError::Instance(String::from(
                "helper reported an empty instance id",
            )));
        }
        if report
            .fragment
            .get(keys::ENDPOINT_IP)
            .is_none_or(|value| value.trim().is_empty())
        {
            return Err(TunnelError::Instance(format!(
                "helper did not report {}",
                keys::ENDPOINT_IP
            )));
        }
        Ok(report)
    }
}

impl<R> InstanceProvisioner for CommandInstanceProvisioner<R>
where
    R: CommandRunner + Send + Sync,
{
    fn start_instance_tunnel<'a>(&'a self, config: &'a TrialConfig) -> InstanceFuture<'a> {
        let mut args = vec![OsString::from("start")];
        if let Some(provider) = config.provider() {
            args.push(OsString::from("--provider"));
            args.push(OsString::from(provider));
        }
        Box::pin(async move {
            let run = self.runner.run_async(&self.program, &args);
            let Ok(result) = tokio::time::timeout(self.timeout, run).await else {
                tracing::warn!(
                    helper = %self.program,
                    "instance helper still running after timeout; killed it"
                );
                return Err(TunnelError::ProvisionTimeout {
                    waited: self.timeout,
                });
            };
            let output = result.map_err(|err| TunnelError::Instance(err.to_string()))?;
            if !output.is_success() {
                return Err(TunnelError::Instance(
                    CommandError::failure(&self.program, &output).to_string(),
                ));
            }
            let report = self.parse_report(&output.stdout)?;
            tracing::info!(instance = %report.instance_id, "instance tunnel ready");
            Ok(report)
        })
    }

    fn terminate(&self, instance_id: &str) -> Result<(), TunnelError> {
        let args = [OsString::from("terminate"), OsString::from(instance_id)];
        let output = self
            .runner
            .run(&self.program, &args)
            .map_err(|err| TunnelError::Instance(err.to_string()))?;
        if output.is_success() {
            Ok(())
        } else {
            Err(TunnelError::Instance(
                CommandError::failure(&self.program, &output).to_string(),
            ))
        }
    }
}

