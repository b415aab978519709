//! Endpoint pinning for the `hideme` provider.
//!
//! The gateway has no server catalog for this provider and only drives it in
//! custom-tunnel mode. Each trial therefore picks a location from the
//! provider's published server list, resolves that location's first host,
//! and hands the gateway an `OpenVPN` client profile written into the
//! gateway directory. The profile is a trial resource: it is ledgered and
//! deleted when the trial ends.

use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use camino::{Utf8Path, Utf8PathBuf};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::gateway::GATEWAY_DIR_TARGET;
use crate::config::{ConfigLayer, TrialConfig, keys};
use crate::fsutil;
use crate::probe::IpFetcher;

/// Published list of paid servers, downloaded when no local copy exists.
pub const SERVER_LIST_URL: &str = "https://api.hide.me/v1/network/paid/en";

/// Port the provider's `OpenVPN` servers listen on.
pub const OPENVPN_PORT: u16 = 3000;

/// Static `tls-crypt` key the provider publishes for all its servers.
const TLS_CRYPT_KEY: &str = "\
8d25d82e75abbcdd73fb17b2ba5d1af2
2d0e026ac8608ec8e51ecb0b3b1b5dba
8ac1f6e556e4b4e3545e979dd26e2d9d
5bc28c1d75b4e37531aabf5da3cba671
1f8998eb66aa290daab6122bdfcb1aa3
b9b428e722ea6e7edd9b878a5161c555
14e6233d18b5cc34e859ecb5852b34ed
6e539d64676edf9ad79470795ae73184
05d93554de1063aec1df6420709c2dcc
79511fa9c5e82de09d560f7d92001ea2
75e4b3e9b6ce19687968b4813d6a9d61
a48311658de88d651edb4eab447d73f6
b209d144a3343a2c992b09c7501cad77
cdf5c6b3be5f9919854bb10182c86794
9df929173b8e98aeea9ffe277eddd7f7
936232e1e44c9feb7a3a2753ed05c90b";

/// Errors raised while pinning a `hideme` endpoint.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HidemeError {
    /// The server list could not be read, downloaded or parsed.
    #[error("hideme server list unavailable: {0}")]
    ServerList(String),
    /// The server list names no usable host.
    #[error("hideme server list names no hosts")]
    NoServers,
    /// The chosen host did not resolve.
    #[error("failed to resolve {host}: {message}")]
    Resolve {
        /// Host that was looked up.
        host: String,
        /// Resolver failure.
        message: String,
    },
    /// The profile lacks the CA certificate the client profile embeds.
    #[error("profile is missing {}", keys::OPENVPN_CERT)]
    MissingCertificate,
    /// The client profile could not be written.
    #[error("failed to write {path}: {message}")]
    Write {
        /// Host path of the profile.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

#[derive(Deserialize)]
struct ServerEntry {
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
}

/// Hosts of the published server list, grouped by location name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HidemeServers {
    by_location: BTreeMap<String, Vec<String>>,
}

impl HidemeServers {
    /// Parses the published JSON list.
    ///
    /// # Errors
    ///
    /// Returns [`HidemeError::ServerList`] when the document is not a list
    /// of server objects.
    pub fn parse(raw: &str) -> Result<Self, HidemeError> {
        let entries: Vec<ServerEntry> =
            serde_json::from_str(raw).map_err(|err| HidemeError::ServerList(err.to_string()))?;
        Ok(Self::from_entries(entries))
    }

    /// Builds the list from an already decoded document.
    ///
    /// # Errors
    ///
    /// Returns [`HidemeError::ServerList`] when the document is not a list
    /// of server objects.
    pub fn from_value(document: &Value) -> Result<Self, HidemeError> {
        let entries = Vec::<ServerEntry>::deserialize(document)
            .map_err(|err| HidemeError::ServerList(err.to_string()))?;
        Ok(Self::from_entries(entries))
    }

    fn from_entries(entries: Vec<ServerEntry>) -> Self {
        let mut by_location: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in entries {
            let Some(host) = entry.hostname.filter(|host| !host.trim().is_empty()) else {
                continue;
            };
            by_location
                .entry(entry.display_name.unwrap_or_default())
                .or_default()
                .push(host);
        }
        Self { by_location }
    }

    /// First host of every location, so each location is equally likely.
    #[must_use]
    pub fn candidates(&self) -> Vec<&str> {
        self.by_location
            .values()
            .filter_map(|hosts| hosts.first().map(String::as_str))
            .collect()
    }

    /// Picks one candidate host.
    #[must_use]
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
        self.candidates().choose(rng).copied()
    }
}

/// Renders the `OpenVPN` client profile for `endpoint`.
///
/// `ca_base64` is the base64 DER body of the CA certificate, as carried in
/// the provider profile under [`keys::OPENVPN_CERT`].
#[must_use]
pub fn render_profile(endpoint: IpAddr, ca_base64: &str) -> String {
    let ca = ca_base64
        .trim()
        .as_bytes()
        .chunks(64)
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "client
dev tun
proto udp
remote {endpoint} {OPENVPN_PORT}
cipher AES-256-CBC
auth SHA256
resolv-retry infinite
nobind
persist-key
persist-tun
mute-replay-warnings
verb 3
auth-user-pass
reneg-sec 900
remote-cert-tls server
verify-x509-name \"*.hide.me\" name
tls-version-min 1.2

<ca>
-----BEGIN CERTIFICATE-----
{ca}
-----END CERTIFICATE-----
</ca>

<tls-crypt>
-----BEGIN OpenVPN Static key V1-----
{TLS_CRYPT_KEY}
-----END OpenVPN Static key V1-----
</tls-crypt>
"
    )
}

/// Future returned by [`HostResolver::resolve`].
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<IpAddr, String>> + Send + 'a>>;

/// Resolves server host names.
pub trait HostResolver: std::fmt::Debug + Send + Sync {
    /// Resolves `host`, preferring an IPv4 address.
    fn resolve<'a>(&'a self, host: &'a str) -> ResolveFuture<'a>;
}

/// [`HostResolver`] using the system resolver.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve<'a>(&'a self, host: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move {
            let addresses: Vec<IpAddr> = tokio::net::lookup_host((host, OPENVPN_PORT))
                .await
                .map_err(|err| err.to_string())?
                .map(|address| address.ip())
                .collect();
            addresses
                .iter()
                .find(|address| address.is_ipv4())
                .or_else(|| addresses.first())
                .copied()
                .ok_or_else(|| String::from("no addresses returned"))
        })
    }
}

/// A pinned endpoint and the profile written for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PinnedEndpoint {
    /// Host chosen from the server list.
    pub host: String,
    /// Address the host resolved to.
    pub ip: IpAddr,
    /// Host path of the written client profile.
    pub profile_path: Utf8PathBuf,
    /// Trial-layer overrides pointing the gateway at the profile.
    pub overrides: ConfigLayer,
}

/// Pins `hideme` trials to a resolved server.
#[derive(Debug)]
pub struct HidemeEndpoints {
    servers_path: Utf8PathBuf,
    resolver: Box<dyn HostResolver>,
}

impl HidemeEndpoints {
    /// Reads the server list from `servers_path`, downloading it there
    /// first when it does not exist.
    #[must_use]
    pub fn new(servers_path: impl Into<Utf8PathBuf>, resolver: impl HostResolver + 'static) -> Self {
        Self {
            servers_path: servers_path.into(),
            resolver: Box::new(resolver),
        }
    }

    /// Loads the server list, downloading and caching it when missing.
    ///
    /// # Errors
    ///
    /// Returns [`HidemeError::ServerList`] when no usable list is available.
    pub async fn load_servers<F: IpFetcher + ?Sized>(
        &self,
        fetcher: &F,
    ) -> Result<HidemeServers, HidemeError> {
        if let Ok(raw) = fsutil::read_to_string_ambient(&self.servers_path) {
            return HidemeServers::parse(&raw);
        }
        tracing::info!(path = %self.servers_path, url = SERVER_LIST_URL, "downloading hideme server list");
        let document = fetcher
            .fetch_json(SERVER_LIST_URL, None)
            .await
            .map_err(|err| HidemeError::ServerList(err.to_string()))?;
        let servers = HidemeServers::from_value(&document)?;
        if let Err(message) = fsutil::write_ambient(&self.servers_path, &document.to_string()) {
            tracing::warn!(path = %self.servers_path, error = %message, "could not cache hideme server list");
        }
        Ok(servers)
    }

    /// Picks and resolves a server, then writes its client profile into
    /// `gateway_dir`.
    ///
    /// The caller owns the written profile and must delete it when the
    /// trial ends.
    ///
    /// # Errors
    ///
    /// Returns [`HidemeError`] when the certificate is missing, no server is
    /// available, resolution fails or the profile cannot be written.
    pub async fn pin<F: IpFetcher + ?Sized>(
        &self,
        template: &TrialConfig,
        fetcher: &F,
        gateway_dir: &Utf8Path,
    ) -> Result<PinnedEndpoint, HidemeError> {
        let ca = template
            .get(keys::OPENVPN_CERT)
            .filter(|value| !value.trim().is_empty())
            .ok_or(HidemeError::MissingCertificate)?
            .to_owned();
        let servers = self.load_servers(fetcher).await?;
        let host = servers
            .choose(&mut rand::thread_rng())
            .ok_or(HidemeError::NoServers)?
            .to_owned();

        tracing::info!(host = %host, "resolving hideme server");
        let ip = self
            .resolver
            .resolve(&host)
            .await
            .map_err(|message| HidemeError::Resolve {
                host: host.clone(),
                message,
            })?;

        let file_name = format!("scanywhere-hideme-{}.conf", Uuid::new_v4());
        let profile_path = gateway_dir.join(&file_name);
        fsutil::write_ambient(&profile_path, &render_profile(ip, &ca)).map_err(|message| {
            HidemeError::Write {
                path: profile_path.to_string(),
                message,
            }
        })?;
        tracing::info!(host = %host, endpoint = %ip, profile = %profile_path, "pinned hideme endpoint");

        let overrides = ConfigLayer::from([
            (keys::ENDPOINT_IP.to_owned(), ip.to_string()),
            (
                keys::OPENVPN_CUSTOM_CONFIG.to_owned(),
                format!("{GATEWAY_DIR_TARGET}/{file_name}"),
            ),
        ]);
        Ok(PinnedEndpoint {
            host,
            ip,
            profile_path,
            overrides,
        })
    }
}
