//! Layered construction of [`TrialConfig`].

use std::collections::BTreeMap;

use super::keys;

/// One layer of configuration values.
pub type ConfigLayer = BTreeMap<String, String>;

/// The layers a [`TrialConfig`] is assembled from, in application order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LayerKind {
    /// Built-in gateway defaults.
    Defaults,
    /// The provider profile.
    Provider,
    /// Per-trial overrides (selection pins, instance fragments).
    Trial,
}

impl LayerKind {
    /// Layers in the order they are applied; later layers win.
    pub const ORDER: [Self; 3] = [Self::Defaults, Self::Provider, Self::Trial];
}

/// Gateway defaults applied beneath every provider profile.
#[must_use]
pub fn base_defaults() -> ConfigLayer {
    [("OPENVPN_IPV6", "on"), ("UPDATER_PERIOD", "24h"), ("DOT", "off")]
        .into_iter()
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect()
}

/// Immutable gateway/workload environment for a single trial.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrialConfig {
    values: BTreeMap<String, String>,
}

impl TrialConfig {
    /// Builds a config directly from key/value pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Whether `key` is set to a non-blank value.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some_and(|value| !value.trim().is_empty())
    }

    /// Provider identity, if set.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        self.get(keys::PROVIDER)
    }

    /// Tunnel protocol, if set.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.get(keys::PROTOCOL)
    }

    /// Public address recorded once the tunnel was confirmed.
    #[must_use]
    pub fn public_ip(&self) -> Option<&str> {
        self.get(keys::PUBLIC_IP)
    }

    /// The full environment map.
    #[must_use]
    pub const fn as_env(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Derives a new config with `overrides` applied on top.
    #[must_use]
    pub fn with_overrides<K, V>(&self, overrides: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut values = self.values.clone();
        values.extend(
            overrides
                .into_iter()
                .map(|(key, value)| (key.into(), value.into())),
        );
        Self { values }
    }
}

/// Builder applying [`LayerKind::ORDER`] to produce a [`TrialConfig`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrialConfigBuilder {
    defaults: ConfigLayer,
    provider: ConfigLayer,
    trial: ConfigLayer,
}

impl Default for TrialConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TrialConfigBuilder {
    /// Starts from the built-in gateway defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            defaults: base_defaults(),
            provider: ConfigLayer::new(),
            trial: ConfigLayer::new(),
        }
    }

    /// Replaces the defaults layer.
    #[must_use]
    pub fn defaults(mut self, layer: ConfigLayer) -> Self {
        self.defaults = layer;
        self
    }

    /// Sets the provider profile layer.
    #[must_use]
    pub fn provider(mut self, layer: ConfigLayer) -> Self {
        self.provider = layer;
        self
    }

    /// Merges values into the per-trial layer.
    #[must_use]
    pub fn trial(mut self, layer: ConfigLayer) -> Self {
        self.trial.extend(layer);
        self
    }

    /// Sets a single per-trial value.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.trial.insert(key.into(), value.into());
        self
    }

    /// Returns the layer for `kind`.
    #[must_use]
    pub const fn layer(&self, kind: LayerKind) -> &ConfigLayer {
        match kind {
            LayerKind::Defaults => &self.defaults,
            LayerKind::Provider => &self.provider,
            LayerKind::Trial => &self.trial,
        }
    }

    /// Merges all layers in order. Blank values still override: a profile
    /// can clear a default by setting it to the empty string.
    #[must_use]
    pub fn build(&self) -> TrialConfig {
        let mut values = BTreeMap::new();
        for kind in LayerKind::ORDER {
            values.extend(
                self.layer(kind)
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        }
        TrialConfig { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn layer(pairs: &[(&str, &str)]) -> ConfigLayer {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[rstest]
    fn later_layers_win() {
        let config = TrialConfigBuilder::new()
            .provider(layer(&[("DOT", "on"), (keys::PROVIDER, "demo")]))
            .trial(layer(&[(keys::PROVIDER, "custom")]))
            .build();

        assert_eq!(config.get("DOT"), Some("on"));
        assert_eq!(config.provider(), Some("custom"));
        assert_eq!(config.get("UPDATER_PERIOD"), Some("24h"));
    }

    #[rstest]
    fn set_accumulates_trial_values() {
        let config = TrialConfigBuilder::new()
            .set(keys::SERVER_COUNTRIES, "Germany")
            .set(keys::PROTOCOL, "wireguard")
            .build();

        assert_eq!(config.get(keys::SERVER_COUNTRIES), Some("Germany"));
        assert_eq!(config.protocol(), Some("wireguard"));
    }

    #[rstest]
    fn derived_configs_leave_the_original_untouched() {
        let original = TrialConfig::from_pairs([(keys::PROVIDER, "demo")]);
        let derived = original.with_overrides([(keys::PROVIDER, "custom")]);

        assert_eq!(original.provider(), Some("demo"));
        assert_eq!(derived.provider(), Some("custom"));
    }

    #[rstest]
    #[case("", false)]
    #[case("  ", false)]
    #[case("x", true)]
    fn has_ignores_blank_values(#[case] value: &str, #[case] expected: bool) {
        let config = TrialConfig::from_pairs([("KEY", value)]);
        assert_eq!(config.has("KEY"), expected);
    }
}
