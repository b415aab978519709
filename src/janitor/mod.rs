//! Sweeper for resources left behind by interrupted sessions.
//!
//! A trial ledger only lives as long as its process. Every container and
//! network the harness starts carries [`MANAGED_LABEL`], so a later run can
//! find whatever a killed session leaked and remove it, failing if anything
//! remains afterwards.

use thiserror::Error;

use crate::engine::{ContainerEngine, EngineError, MANAGED_LABEL, SESSION_LABEL};

/// Which labelled resources a sweep targets.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SweepScope {
    /// Everything started by any session.
    #[default]
    AllSessions,
    /// Only resources started by one session.
    Session(String),
}

impl SweepScope {
    /// Label filter passed to the engine's listing commands.
    #[must_use]
    pub fn label_filter(&self) -> String {
        match self {
            Self::AllSessions => MANAGED_LABEL.to_owned(),
            Self::Session(session) => format!("{SESSION_LABEL}={session}"),
        }
    }
}

/// Summary of janitor work.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepSummary {
    /// Containers removed during the sweep.
    pub removed_containers: usize,
    /// Networks removed during the sweep.
    pub removed_networks: usize,
}

/// Errors returned by the janitor.
#[derive(Debug, Error)]
pub enum JanitorError {
    /// Listing labelled resources failed.
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Resources remain after the sweep.
    #[error("resources remain after sweep: containers {containers:?}, networks {networks:?}")]
    NotClean {
        /// Containers still present.
        containers: Vec<String>,
        /// Networks still present.
        networks: Vec<String>,
    },
}

/// Removes labelled containers and networks through a [`ContainerEngine`].
#[derive(Debug)]
pub struct Janitor<'a, E> {
    engine: &'a E,
    scope: SweepScope,
}

impl<'a, E: ContainerEngine> Janitor<'a, E> {
    /// Creates a janitor for `scope`.
    #[must_use]
    pub const fn new(engine: &'a E, scope: SweepScope) -> Self {
        Self { engine, scope }
    }

    /// Removes every labelled container, then every labelled network.
    ///
    /// Containers go first because a network cannot be removed while a
    /// container is still attached. Individual removal failures are logged
    /// and the sweep carries on; the final listing decides the result.
    ///
    /// # Errors
    ///
    /// Returns [`JanitorError::Engine`] when listing fails and
    /// [`JanitorError::NotClean`] when labelled resources survive.
    pub fn sweep(&self) -> Result<SweepSummary, JanitorError> {
        let filter = self.scope.label_filter();
        let mut summary = SweepSummary::default();

        for container in self.engine.list_containers(&filter)? {
            match self.engine.remove_container(&container) {
                Ok(()) => summary.removed_containers += 1,
                Err(err) => tracing::warn!(container = %container, error = %err, "sweep could not remove container"),
            }
        }
        for network in self.engine.list_networks(&filter)? {
            match self.engine.remove_network(&network) {
                Ok(()) => summary.removed_networks += 1,
                Err(err) => tracing::warn!(network = %network, error = %err, "sweep could not remove network"),
            }
        }

        let containers = self.engine.list_containers(&filter)?;
        let networks = self.engine.list_networks(&filter)?;
        if !containers.is_empty() || !networks.is_empty() {
            return Err(JanitorError::NotClean {
                containers,
                networks,
            });
        }

        tracing::info!(
            containers = summary.removed_containers,
            networks = summary.removed_networks,
            filter = %filter,
            "sweep complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests;
