//! Named provider templates.
//!
//! The profile file is a JSON object mapping a profile name to the flat
//! gateway environment for that provider, for example:
//!
//! ```json
//! {
//!   "mullvad_wg": {
//!     "VPN_SERVICE_PROVIDER": "mullvad",
//!     "VPN_TYPE": "wireguard",
//!     "WIREGUARD_PRIVATE_KEY": "...",
//!     "WIREGUARD_ADDRESSES": "10.64.0.2/32"
//!   },
//!   "surfshark_germany": {
//!     "VPN_SERVICE_PROVIDER": "surfshark",
//!     "VPN_TYPE": "openvpn",
//!     "SERVER_COUNTRIES": "Germany"
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use camino::Utf8Path;

use super::{ConfigError, ConfigLayer, keys};
use crate::fsutil::read_to_string_ambient;

/// Provider profiles keyed by name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProviderProfiles {
    profiles: BTreeMap<String, ConfigLayer>,
}

impl ProviderProfiles {
    /// Parses profiles from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text is not an object of
    /// string maps, or a profile lacks a provider identity.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let profiles: BTreeMap<String, ConfigLayer> =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        for (name, layer) in &profiles {
            if layer
                .get(keys::PROVIDER)
                .is_none_or(|value| value.trim().is_empty())
            {
                return Err(ConfigError::Parse(format!(
                    "profile '{name}' does not set {}",
                    keys::PROVIDER
                )));
            }
        }
        Ok(Self { profiles })
    }

    /// Reads and parses a profile file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read and
    /// [`ConfigError::Parse`] when it is malformed.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = read_to_string_ambient(path).map_err(|message| ConfigError::Read {
            path: path.to_string(),
            message,
        })?;
        Self::parse(&raw)
    }

    /// Returns the provider layer for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownProfile`] listing the defined profiles.
    pub fn profile(&self, name: &str) -> Result<&ConfigLayer, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_owned(),
                available: self.names().join(", "),
            })
    }

    /// Profile names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const PROFILES: &str = r#"{
        "demo_wg": {"VPN_SERVICE_PROVIDER": "demo", "VPN_TYPE": "wireguard"},
        "demo_de": {"VPN_SERVICE_PROVIDER": "demo", "SERVER_COUNTRIES": "Germany"}
    }"#;

    #[rstest]
    fn profile_returns_the_named_layer() {
        let profiles = ProviderProfiles::parse(PROFILES).expect("parse");
        let layer = profiles.profile("demo_de").expect("profile");
        assert_eq!(
            layer.get(keys::SERVER_COUNTRIES).map(String::as_str),
            Some("Germany")
        );
    }

    #[rstest]
    fn unknown_profile_lists_alternatives() {
        let profiles = ProviderProfiles::parse(PROFILES).expect("parse");
        let err = profiles.profile("nope").expect_err("unknown");
        assert_eq!(
            err,
            ConfigError::UnknownProfile {
                name: String::from("nope"),
                available: String::from("demo_de, demo_wg"),
            }
        );
    }

    #[rstest]
    #[case(r#"{"x": {"VPN_TYPE": "wireguard"}}"#)]
    #[case(r#"{"x": {"VPN_SERVICE_PROVIDER": " "}}"#)]
    #[case(r#"["not", "an", "object"]"#)]
    fn parse_rejects_malformed_profiles(#[case] raw: &str) {
        assert!(matches!(
            ProviderProfiles::parse(raw),
            Err(ConfigError::Parse(_))
        ));
    }
}
