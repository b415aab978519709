//! Server catalog published by the gateway's updater.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;

use crate::fsutil;

/// Location fields of one catalog server.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct ServerLocation {
    /// Country name, if the provider publishes one.
    #[serde(default)]
    pub country: Option<String>,
    /// Region name, if the provider publishes one.
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProviderEntry {
    Wrapped { servers: Vec<ServerLocation> },
    Bare(Vec<ServerLocation>),
}

impl ProviderEntry {
    fn into_servers(self) -> Vec<ServerLocation> {
        match self {
            Self::Wrapped { servers } | Self::Bare(servers) => servers,
        }
    }
}

/// Errors raised while loading the catalog.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read server catalog {path}: {message}")]
    Read {
        /// Catalog path.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// The catalog is not a JSON object.
    #[error("failed to parse server catalog: {0}")]
    Parse(String),
    /// The catalog parsed but lists no providers.
    #[error("server catalog lists no providers")]
    Empty,
}

/// Read-only snapshot mapping provider to its servers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerCatalog {
    providers: BTreeMap<String, Vec<ServerLocation>>,
}

impl ServerCatalog {
    /// Parses a catalog document.
    ///
    /// Accepts `{provider: {"servers": [...]}}` and `{provider: [...]}`.
    /// Top-level entries of any other shape (such as a format version) are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] for non-object documents and
    /// [`CatalogError::Empty`] when no provider entry is usable.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        let document: BTreeMap<String, Value> =
            serde_json::from_str(raw).map_err(|err| CatalogError::Parse(err.to_string()))?;
        let providers: BTreeMap<String, Vec<ServerLocation>> = document
            .into_iter()
            .filter_map(|(provider, value)| {
                serde_json::from_value::<ProviderEntry>(value)
                    .ok()
                    .map(|entry| (provider, entry.into_servers()))
            })
            .collect();
        if providers.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { providers })
    }

    /// Servers listed for `provider`.
    #[must_use]
    pub fn servers(&self, provider: &str) -> Option<&[ServerLocation]> {
        self.providers.get(provider).map(Vec::as_slice)
    }

    /// Distinct non-empty countries for `provider`, in first-seen order.
    #[must_use]
    pub fn countries(&self, provider: &str) -> Vec<&str> {
        self.distinct(provider, |server| server.country.as_deref())
    }

    /// Distinct non-empty regions for `provider`, in first-seen order.
    #[must_use]
    pub fn regions(&self, provider: &str) -> Vec<&str> {
        self.distinct(provider, |server| server.region.as_deref())
    }

    fn distinct<'a>(
        &'a self,
        provider: &str,
        field: impl Fn(&'a ServerLocation) -> Option<&'a str>,
    ) -> Vec<&'a str> {
        let mut seen: Vec<&str> = Vec::new();
        for value in self
            .servers(provider)
            .unwrap_or_default()
            .iter()
            .filter_map(field)
        {
            if !value.trim().is_empty() && !seen.contains(&value) {
                seen.push(value);
            }
        }
        seen
    }
}

/// Something that can produce a fresh catalog snapshot.
pub trait CatalogSource {
    /// Loads the current catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the catalog is unavailable or invalid.
    fn load(&self) -> Result<ServerCatalog, CatalogError>;
}

/// Catalog read from a JSON file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileCatalog {
    path: Utf8PathBuf,
}

impl FileCatalog {
    /// Reads the catalog from `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Catalog location.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl CatalogSource for FileCatalog {
    fn load(&self) -> Result<ServerCatalog, CatalogError> {
        let raw = fsutil::read_to_string_ambient(&self.path).map_err(|message| {
            CatalogError::Read {
                path: self.path.to_string(),
                message,
            }
        })?;
        ServerCatalog::parse(&raw)
    }
}

/// Loads the catalog, retrying after `delay` until it succeeds.
///
/// The gateway updater rewrites the file in place, so a read can observe a
/// partial document; this never gives up.
pub async fn load_with_retry<S: CatalogSource + ?Sized>(source: &S, delay: Duration) -> ServerCatalog {
    loop {
        match source.load() {
            Ok(catalog) => return catalog,
            Err(err) => {
                tracing::error!(error = %err, retry_in = ?delay, "server catalog unavailable");
                sleep(delay).await;
            }
        }
    }
}
