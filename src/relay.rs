//! Chained-relay handshake run inside an already connected gateway.
//!
//! The primary gateway registers a relay account and generates a `WireGuard`
//! profile with the `wgcf` helper it ships in `/gluetun`. The resulting
//! `key = value` file is read back and turned into the configuration of a
//! second gateway that tunnels through the first.

use std::collections::BTreeMap;
use std::net::IpAddr;

use thiserror::Error;

use crate::config::{CUSTOM_PROVIDER, TrialConfig, TrialConfigBuilder, keys};
use crate::engine::{ContainerEngine, EngineError};

/// Handshake helper shipped in the gateway directory.
pub const HANDSHAKE_BIN: &str = "/gluetun/wgcf";

/// Scratch file holding the relay account and generated profile.
pub const ACCOUNT_FILE: &str = "/tmp/wgcf-account.toml";

/// Fixed public relay endpoint address.
pub const RELAY_ENDPOINT_IP: &str = "162.159.192.1";

/// Fixed public relay endpoint port.
pub const RELAY_ENDPOINT_PORT: &str = "2408";

/// Handshake keys the relay configuration cannot do without.
const REQUIRED_KEYS: [&str; 3] = ["PublicKey", "PrivateKey", "Address"];

/// Errors raised while performing the relay handshake.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Wraps container engine failures.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// A handshake step exited unsuccessfully.
    #[error("relay handshake step '{step}' exited with status {status}: {stderr}")]
    Step {
        /// Step that failed.
        step: &'static str,
        /// Exit status text.
        status: String,
        /// Captured stderr.
        stderr: String,
    },
    /// The generated profile lacks a required key.
    #[error("relay profile is missing '{0}'")]
    MissingKey(&'static str),
    /// The primary gateway has no address the relay could route through.
    #[error("gateway {container} has no address on the trial network")]
    NoGatewayAddress {
        /// Primary gateway container.
        container: String,
    },
}

/// Parses a line-oriented `key = value` file.
///
/// Lines without `=` are ignored, keys and values are trimmed, and repeated
/// keys accumulate their values joined with `,`.
#[must_use]
pub fn parse_handshake(raw: &str) -> BTreeMap<String, String> {
    let mut params: BTreeMap<String, String> = BTreeMap::new();
    for line in raw.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let trimmed_key = key.trim();
        let trimmed_value = value.trim();
        params
            .entry(trimmed_key.to_owned())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(trimmed_value);
            })
            .or_insert_with(|| trimmed_value.to_owned());
    }
    params
}

/// Builds the relay gateway configuration from handshake output.
///
/// Only the presence of the key material is checked; its format is left to
/// the gateway. `MTU` is optional and omitted when absent.
///
/// # Errors
///
/// Returns [`RelayError::MissingKey`] when a required key is absent.
pub fn relay_config(
    params: &BTreeMap<String, String>,
    gateway_ip: IpAddr,
) -> Result<TrialConfig, RelayError> {
    for key in REQUIRED_KEYS {
        if params.get(key).is_none_or(|value| value.is_empty()) {
            return Err(RelayError::MissingKey(key));
        }
    }
    let lookup = |key: &str| params.get(key).cloned().unwrap_or_default();

    let mut builder = TrialConfigBuilder::new()
        .set(keys::PROVIDER, CUSTOM_PROVIDER)
        .set(keys::PROTOCOL, "wireguard")
        .set(keys::WIREGUARD_PUBLIC_KEY, lookup("PublicKey"))
        .set(keys::WIREGUARD_PRIVATE_KEY, lookup("PrivateKey"))
        .set(keys::WIREGUARD_ADDRESSES, lookup("Address"))
        .set(keys::ENDPOINT_IP, RELAY_ENDPOINT_IP)
        .set(keys::ENDPOINT_PORT, RELAY_ENDPOINT_PORT)
        .set(keys::RELAY_GATEWAY_IP, gateway_ip.to_string());
    if let Some(mtu) = params.get("MTU").filter(|value| !value.is_empty()) {
        builder = builder.set(keys::WIREGUARD_MTU, mtu.clone());
    }
    Ok(builder.build())
}

fn step_argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_owned()).collect()
}

/// Runs the handshake inside a gateway container.
#[derive(Debug)]
pub struct RelayHandshake<'a, E: ContainerEngine> {
    engine: &'a E,
}

impl<'a, E: ContainerEngine> RelayHandshake<'a, E> {
    /// Creates a handshake driver over `engine`.
    #[must_use]
    pub const fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Registers, generates and reads back the relay profile in `container`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] when a step fails or the engine errors.
    pub fn perform(&self, container: &str) -> Result<BTreeMap<String, String>, RelayError> {
        self.step(
            container,
            "register",
            &[HANDSHAKE_BIN, "register", "--accept-tos", "--config", ACCOUNT_FILE],
        )?;
        self.step(
            container,
            "generate",
            &[
                HANDSHAKE_BIN,
                "generate",
                "--profile",
                ACCOUNT_FILE,
                "--config",
                ACCOUNT_FILE,
            ],
        )?;
        let profile = self.step(container, "read", &["cat", ACCOUNT_FILE])?;
        Ok(parse_handshake(&profile))
    }

    fn step(&self, container: &str, step: &'static str, args: &[&str]) -> Result<String, RelayError> {
        tracing::debug!(container, step, "relay handshake step");
        let output = self.engine.exec(container, &step_argv(args))?;
        if !output.is_success() {
            return Err(RelayError::Step {
                step,
                status: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        Ok(output.stdout)
    }
}
