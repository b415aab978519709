//! Per-trial choice of the server location a gateway is pinned to.
//!
//! A provider template either already fixes its endpoint, lists explicit
//! candidates in `SERVER_COUNTRIES`/`SERVER_REGIONS`, or leaves the choice
//! open. In the open case [`SelectionMode::Normalized`] samples uniformly
//! over the distinct countries (or regions) the server catalog lists, so
//! locations with many servers are not over-represented.

mod catalog;

use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::{
    CUSTOM_PROVIDER, ConfigLayer, PASS_THROUGH_PROVIDERS, TrialConfig, keys,
};

pub use catalog::{
    CatalogError, CatalogSource, FileCatalog, ServerCatalog, ServerLocation, load_with_retry,
};

/// How open templates are resolved.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SelectionMode {
    /// Leave the choice to the gateway.
    Random,
    /// Sample uniformly over distinct catalog locations.
    #[default]
    Normalized,
}

/// Outcome of selection for one trial.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Selection {
    /// The template already fixes its endpoint; nothing was chosen.
    Pinned,
    /// One value picked from an explicit candidate list in the template.
    Candidate {
        /// Key the value applies to.
        key: &'static str,
        /// Chosen value.
        value: String,
    },
    /// One value picked from the server catalog.
    Catalog {
        /// Key the value applies to.
        key: &'static str,
        /// Chosen value.
        value: String,
    },
    /// No pin applied.
    Unconstrained,
}

impl Selection {
    /// Per-trial configuration layer carrying the chosen pin.
    #[must_use]
    pub fn overrides(&self) -> ConfigLayer {
        match self {
            Self::Candidate { key, value } | Self::Catalog { key, value } => {
                ConfigLayer::from([((*key).to_owned(), value.clone())])
            }
            Self::Pinned | Self::Unconstrained => ConfigLayer::new(),
        }
    }
}

/// Splits a comma separated candidate list, dropping blanks.
#[must_use]
pub fn candidates(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect()
}

/// Returns `true` when `template` leaves no location choice to make.
#[must_use]
pub fn is_pinned(template: &TrialConfig) -> bool {
    let provider = template.provider().unwrap_or_default();
    provider == CUSTOM_PROVIDER
        || PASS_THROUGH_PROVIDERS.contains(&provider)
        || template.has(keys::ENDPOINT_IP)
}

/// Chooses the location pin for each trial.
#[derive(Debug)]
pub struct SelectionPolicy<R: Rng> {
    mode: SelectionMode,
    rng: R,
}

impl<R: Rng> SelectionPolicy<R> {
    /// Creates a policy drawing from `rng`.
    #[must_use]
    pub const fn new(mode: SelectionMode, rng: R) -> Self {
        Self { mode, rng }
    }

    /// Active mode.
    #[must_use]
    pub const fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Selects a pin for `template`, loading the catalog only when needed.
    ///
    /// A catalog that cannot be loaded is retried every `retry_delay`
    /// indefinitely; this blocks the trial but never fails it.
    pub async fn select<S: CatalogSource + ?Sized>(
        &mut self,
        template: &TrialConfig,
        source: &S,
        retry_delay: Duration,
    ) -> Selection {
        if let Some(selection) = self.select_without_catalog(template) {
            return selection;
        }
        let catalog = load_with_retry(source, retry_delay).await;
        self.select_from_catalog(template, &catalog)
    }

    /// Resolves every case that does not need the catalog.
    ///
    /// Returns `None` only for open templates in normalized mode.
    pub fn select_without_catalog(&mut self, template: &TrialConfig) -> Option<Selection> {
        if is_pinned(template) {
            return Some(Selection::Pinned);
        }
        for key in [keys::SERVER_COUNTRIES, keys::SERVER_REGIONS] {
            let Some(raw) = template.get(key) else {
                continue;
            };
            if let Some(value) = candidates(raw).choose(&mut self.rng) {
                tracing::info!(key, value, "pinned from candidates");
                return Some(Selection::Candidate {
                    key,
                    value: (*value).to_owned(),
                });
            }
        }
        match self.mode {
            SelectionMode::Random => Some(Selection::Unconstrained),
            SelectionMode::Normalized => None,
        }
    }

    /// Picks a country, else a region, uniformly from `catalog`.
    pub fn select_from_catalog(
        &mut self,
        template: &TrialConfig,
        catalog: &ServerCatalog,
    ) -> Selection {
        let provider = template.provider().unwrap_or_default();
        if catalog.servers(provider).is_none() {
            tracing::warn!(provider, "provider missing from server catalog; leaving location open");
            return Selection::Unconstrained;
        }
        for (key, values) in [
            (keys::SERVER_COUNTRIES, catalog.countries(provider)),
            (keys::SERVER_REGIONS, catalog.regions(provider)),
        ] {
            if let Some(value) = values.choose(&mut self.rng) {
                tracing::info!(provider, key, value, "pinned from catalog");
                return Selection::Catalog {
                    key,
                    value: (*value).to_owned(),
                };
            }
        }
        Selection::Unconstrained
    }
}
