//! Per-trial record of resources that must be released.
//!
//! Everything a trial creates (containers, networks, cloud instances and
//! generated gateway files) is registered here the moment it exists. The
//! orchestrator drains the ledger in reverse registration order on every
//! exit path, so a trial never leaks resources regardless of where it fails.

use std::fmt;

use camino::Utf8PathBuf;
use thiserror::Error;

/// A resource created during a trial.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ResourceId {
    /// Named container.
    Container(String),
    /// Named container network.
    Network(String),
    /// Cloud compute instance identifier.
    Instance(String),
    /// File written on the host for the trial's gateway.
    File(Utf8PathBuf),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container(name) => write!(f, "container {name}"),
            Self::Network(name) => write!(f, "network {name}"),
            Self::Instance(id) => write!(f, "instance {id}"),
            Self::File(path) => write!(f, "file {path}"),
        }
    }
}

/// Failure to release a single resource.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to release {resource}: {message}")]
pub struct ReleaseError {
    /// Resource that could not be released.
    pub resource: ResourceId,
    /// Underlying failure.
    pub message: String,
}

/// Knows how to stop, remove or terminate a resource.
pub trait ResourceReleaser {
    /// Releases `resource`.
    ///
    /// # Errors
    ///
    /// Returns [`ReleaseError`] when the resource could not be released.
    fn release(&self, resource: &ResourceId) -> Result<(), ReleaseError>;
}

/// Outcome of draining a ledger.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReleaseReport {
    /// Resources released successfully, in release order.
    pub released: Vec<ResourceId>,
    /// Resources whose release failed.
    pub failed: Vec<ReleaseError>,
}

impl ReleaseReport {
    /// Returns `true` when every release succeeded.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ordered collection of resources owned by one trial.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResourceLedger {
    entries: Vec<ResourceId>,
}

impl ResourceLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records `resource`. Registering the same resource twice is a no-op.
    pub fn register(&mut self, resource: ResourceId) {
        if !self.entries.contains(&resource) {
            tracing::debug!(%resource, "registered resource");
            self.entries.push(resource);
        }
    }

    /// Returns `true` if `resource` is currently recorded.
    #[must_use]
    pub fn contains(&self, resource: &ResourceId) -> bool {
        self.entries.contains(resource)
    }

    /// Returns `true` when nothing is recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of recorded resources.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Recorded resources in registration order.
    #[must_use]
    pub fn entries(&self) -> &[ResourceId] {
        &self.entries
    }

    /// Releases every recorded resource, most recent first.
    ///
    /// Individual failures are logged and collected; they never stop the
    /// remaining releases. The ledger is empty afterwards, so a second call
    /// releases nothing.
    pub fn release_all<R: ResourceReleaser + ?Sized>(&mut self, releaser: &R) -> ReleaseReport {
        let mut report = ReleaseReport::default();
        while let Some(resource) = self.entries.pop() {
            match releaser.release(&resource) {
                Ok(()) => {
                    tracing::debug!(%resource, "released resource");
                    report.released.push(resource);
                }
                Err(err) => {
                    tracing::warn!(%resource, error = %err.message, "failed to release resource");
                    report.failed.push(err);
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use rstest::rstest;

    #[derive(Default)]
    struct RecordingReleaser {
        released: RefCell<Vec<ResourceId>>,
        failing: Vec<ResourceId>,
    }

    impl ResourceReleaser for RecordingReleaser {
        fn release(&self, resource: &ResourceId) -> Result<(), ReleaseError> {
            self.released.borrow_mut().push(resource.clone());
            if self.failing.contains(resource) {
                return Err(ReleaseError {
                    resource: resource.clone(),
                    message: String::from("simulated failure"),
                });
            }
            Ok(())
        }
    }

    fn populated() -> ResourceLedger {
        let mut ledger = ResourceLedger::new();
        ledger.register(ResourceId::Network(String::from("net")));
        ledger.register(ResourceId::Container(String::from("gateway")));
        ledger.register(ResourceId::Container(String::from("workload")));
        ledger
    }

    #[rstest]
    fn releases_in_reverse_registration_order() {
        let mut ledger = populated();
        let releaser = RecordingReleaser::default();

        let report = ledger.release_all(&releaser);

        assert!(report.is_clean());
        assert!(ledger.is_empty());
        assert_eq!(
            releaser.released.into_inner(),
            vec![
                ResourceId::Container(String::from("workload")),
                ResourceId::Container(String::from("gateway")),
                ResourceId::Network(String::from("net")),
            ]
        );
    }

    #[rstest]
    fn failures_do_not_stop_remaining_releases() {
        let mut ledger = populated();
        let releaser = RecordingReleaser {
            failing: vec![ResourceId::Container(String::from("gateway"))],
            ..RecordingReleaser::default()
        };

        let report = ledger.release_all(&releaser);

        assert_eq!(report.released.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(ledger.is_empty());
        assert_eq!(releaser.released.borrow().len(), 3);
    }

    #[rstest]
    fn second_drain_is_a_no_op() {
        let mut ledger = populated();
        let releaser = RecordingReleaser::default();
        let _first = ledger.release_all(&releaser);

        let second = ledger.release_all(&releaser);

        assert_eq!(second, ReleaseReport::default());
        assert_eq!(releaser.released.borrow().len(), 3);
    }

    #[rstest]
    fn duplicate_registration_is_ignored() {
        let mut ledger = ResourceLedger::new();
        ledger.register(ResourceId::Instance(String::from("i-1")));
        ledger.register(ResourceId::Instance(String::from("i-1")));
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains(&ResourceId::Instance(String::from("i-1"))));
    }
}
