//! Operator settings loaded via `ortho-config`.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::ConfigError;

/// Harness settings derived from defaults, configuration files, and
/// `SCANYWHERE_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCANYWHERE")]
pub struct HarnessConfig {
    /// Container engine CLI binary.
    #[ortho_config(default = "docker".to_owned())]
    pub docker_bin: String,
    /// Gateway image providing the VPN tunnel.
    #[ortho_config(default = "qmcgaw/gluetun:latest".to_owned())]
    pub gateway_image: String,
    /// Gateway image used for the chained relay.
    #[ortho_config(default = "gluetun-warp".to_owned())]
    pub relay_gateway_image: String,
    /// Host directory mounted into gateways at `/gluetun`.
    #[ortho_config(default = "docker/gluetun".to_owned())]
    pub gateway_dir: String,
    /// Pins the gateway control port; a free port is chosen when unset.
    pub control_port: Option<u16>,
    /// Delay between starting a gateway and checking it is still alive.
    #[ortho_config(default = 5)]
    pub settle_delay_secs: u64,
    /// Upper bound on the connectivity probe.
    #[ortho_config(default = 600)]
    pub probe_max_wait_secs: u64,
    /// Delay between connectivity probe attempts.
    #[ortho_config(default = 2)]
    pub probe_poll_interval_secs: u64,
    /// Delay between workload status polls.
    #[ortho_config(default = 1)]
    pub workload_poll_interval_secs: u64,
    /// Upper bound on workload completion; unbounded when unset.
    pub workload_max_wait_secs: Option<u64>,
    /// Server catalog published by the gateway updater.
    #[ortho_config(default = "docker/gluetun/servers.json".to_owned())]
    pub catalog_path: String,
    /// Delay before re-reading an unparsable catalog.
    #[ortho_config(default = 5)]
    pub catalog_retry_secs: u64,
    /// Provider profile file.
    #[ortho_config(default = "profiles.json".to_owned())]
    pub profiles_path: String,
    /// Directory holding one build context per workload image.
    #[ortho_config(default = "docker".to_owned())]
    pub workload_root: String,
    /// External program that provisions cloud-instance tunnels.
    pub instance_helper: Option<String>,
    /// Upper bound on cloud-instance provisioning.
    #[ortho_config(default = 900)]
    pub instance_timeout_secs: u64,
    /// `hideme` server list; downloaded here when missing.
    #[ortho_config(default = "hideme_servers.json".to_owned())]
    pub hideme_servers_path: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, key: &'static str) -> Self {
        Self {
            description,
            env_var,
            key,
        }
    }
}

impl HarnessConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to scanywhere.toml",
                metadata.description, metadata.env_var, metadata.key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        let config = Self::load_from_iter([std::ffi::OsString::from("scanywhere")])
            .map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.docker_bin,
                FieldMetadata::new("container engine binary", "SCANYWHERE_DOCKER_BIN", "docker_bin"),
            ),
            (
                &self.gateway_image,
                FieldMetadata::new("gateway image", "SCANYWHERE_GATEWAY_IMAGE", "gateway_image"),
            ),
            (
                &self.relay_gateway_image,
                FieldMetadata::new(
                    "relay gateway image",
                    "SCANYWHERE_RELAY_GATEWAY_IMAGE",
                    "relay_gateway_image",
                ),
            ),
            (
                &self.gateway_dir,
                FieldMetadata::new("gateway directory", "SCANYWHERE_GATEWAY_DIR", "gateway_dir"),
            ),
            (
                &self.catalog_path,
                FieldMetadata::new("server catalog path", "SCANYWHERE_CATALOG_PATH", "catalog_path"),
            ),
            (
                &self.profiles_path,
                FieldMetadata::new("profile file", "SCANYWHERE_PROFILES_PATH", "profiles_path"),
            ),
            (
                &self.workload_root,
                FieldMetadata::new("workload root", "SCANYWHERE_WORKLOAD_ROOT", "workload_root"),
            ),
            (
                &self.hideme_servers_path,
                FieldMetadata::new(
                    "hideme server list path",
                    "SCANYWHERE_HIDEME_SERVERS_PATH",
                    "hideme_servers_path",
                ),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        Ok(())
    }

    /// Gateway settle delay.
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Connectivity probe budget.
    #[must_use]
    pub const fn probe_max_wait(&self) -> Duration {
        Duration::from_secs(self.probe_max_wait_secs)
    }

    /// Connectivity probe retry interval.
    #[must_use]
    pub const fn probe_poll_interval(&self) -> Duration {
        Duration::from_secs(self.probe_poll_interval_secs)
    }

    /// Workload status poll interval.
    #[must_use]
    pub const fn workload_poll_interval(&self) -> Duration {
        Duration::from_secs(self.workload_poll_interval_secs)
    }

    /// Optional bound on workload completion.
    #[must_use]
    pub fn workload_max_wait(&self) -> Option<Duration> {
        self.workload_max_wait_secs.map(Duration::from_secs)
    }

    /// Catalog reload delay.
    #[must_use]
    pub const fn catalog_retry_delay(&self) -> Duration {
        Duration::from_secs(self.catalog_retry_secs)
    }

    /// Cloud-instance provisioning budget.
    #[must_use]
    pub const fn instance_timeout(&self) -> Duration {
        Duration::from_secs(self.instance_timeout_secs)
    }

    /// Gateway directory as a path.
    #[must_use]
    pub fn gateway_dir_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.gateway_dir)
    }

    /// Build context for `image` under the workload root.
    #[must_use]
    pub fn workload_dir(&self, image: &str) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.workload_root).join(image)
    }
}
