//! Configuration: per-trial gateway parameters and harness settings.
//!
//! [`TrialConfig`] is the flat key/value environment handed to the gateway
//! and workload containers. It is assembled by [`TrialConfigBuilder`] from a
//! fixed sequence of layers. [`HarnessConfig`] holds the operator settings
//! loaded through `ortho-config`, and [`ProviderProfiles`] the named
//! provider templates.

mod harness;
mod profiles;
mod trial;

use thiserror::Error;

pub use harness::HarnessConfig;
pub use profiles::ProviderProfiles;
pub use trial::{ConfigLayer, LayerKind, TrialConfig, TrialConfigBuilder, base_defaults};

/// Well-known keys of the gateway environment surface.
pub mod keys {
    /// Provider identity understood by the gateway image.
    pub const PROVIDER: &str = "VPN_SERVICE_PROVIDER";
    /// Tunnel protocol (`openvpn` or `wireguard`).
    pub const PROTOCOL: &str = "VPN_TYPE";
    /// Comma separated country pins.
    pub const SERVER_COUNTRIES: &str = "SERVER_COUNTRIES";
    /// Comma separated region pins.
    pub const SERVER_REGIONS: &str = "SERVER_REGIONS";
    /// Fixed endpoint address for custom tunnels.
    pub const ENDPOINT_IP: &str = "VPN_ENDPOINT_IP";
    /// Fixed endpoint port for custom tunnels.
    pub const ENDPOINT_PORT: &str = "VPN_ENDPOINT_PORT";
    /// Bind address of the gateway control server.
    pub const CONTROL_ADDRESS: &str = "HTTP_CONTROL_SERVER_ADDRESS";
    /// Public address observed through the confirmed tunnel. Workloads
    /// read it under this exact name.
    pub const PUBLIC_IP: &str = "GLUETUN_IP";
    /// `WireGuard` peer public key.
    pub const WIREGUARD_PUBLIC_KEY: &str = "WIREGUARD_PUBLIC_KEY";
    /// `WireGuard` private key.
    pub const WIREGUARD_PRIVATE_KEY: &str = "WIREGUARD_PRIVATE_KEY";
    /// `WireGuard` interface addresses.
    pub const WIREGUARD_ADDRESSES: &str = "WIREGUARD_ADDRESSES";
    /// `WireGuard` MTU.
    pub const WIREGUARD_MTU: &str = "WIREGUARD_MTU";
    /// Address of the primary gateway a relay gateway routes through.
    pub const RELAY_GATEWAY_IP: &str = "WARP_GATEWAY_IP";
    /// Gateway-side path of a custom `OpenVPN` client profile.
    pub const OPENVPN_CUSTOM_CONFIG: &str = "OPENVPN_CUSTOM_CONFIG";
    /// Base64 DER body of the `OpenVPN` server CA certificate.
    pub const OPENVPN_CERT: &str = "OPENVPN_CERT";
}

/// Provider identity of the gateway's generic custom-tunnel mode.
pub const CUSTOM_PROVIDER: &str = "custom";

/// Provider identity recorded for chained-relay trials.
pub const CHAINED_PROVIDER: &str = "warp";

/// Providers whose tunnel endpoint is a freshly provisioned cloud instance.
pub const CLOUD_INSTANCE_PROVIDERS: &[&str] = &["ec2"];

/// Provider whose endpoint is pinned from its published server list.
pub const HIDEME_PROVIDER: &str = "hideme";

/// Providers the gateway image only supports through custom-tunnel mode.
pub const PASS_THROUGH_PROVIDERS: &[&str] = &["ec2", HIDEME_PROVIDER];

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader or file parsers.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a configuration file cannot be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// File that could not be read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when the requested provider profile is not defined.
    #[error("unknown provider profile '{name}' (available: {available})")]
    UnknownProfile {
        /// Requested profile name.
        name: String,
        /// Comma separated list of defined profiles.
        available: String,
    },
}
