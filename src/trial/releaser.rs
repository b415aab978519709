//! Releases the resources a trial recorded.

use crate::engine::ContainerEngine;
use crate::fsutil;
use crate::ledger::{ReleaseError, ResourceId, ResourceReleaser};
use crate::tunnel::InstanceProvisioner;

/// [`ResourceReleaser`] for everything a trial can record.
#[derive(Debug)]
pub struct TrialReleaser<'a, E, I> {
    engine: &'a E,
    instances: Option<&'a I>,
}

impl<'a, E: ContainerEngine, I: InstanceProvisioner> TrialReleaser<'a, E, I> {
    /// Creates a releaser; instances can only be released when `instances`
    /// is provided.
    #[must_use]
    pub const fn new(engine: &'a E, instances: Option<&'a I>) -> Self {
        Self { engine, instances }
    }

    fn release_container(&self, name: &str) -> Result<(), String> {
        let present = self
            .engine
            .status(name)
            .map_err(|err| err.to_string())?
            .is_some();
        if !present {
            return Ok(());
        }
        self.engine
            .remove_container(name)
            .map_err(|err| err.to_string())
    }

    fn release_instance(&self, id: &str) -> Result<(), String> {
        let Some(instances) = self.instances else {
            return Err(String::from("no instance provisioner configured"));
        };
        instances.terminate(id).map_err(|err| err.to_string())
    }
}

impl<E: ContainerEngine, I: InstanceProvisioner> ResourceReleaser for TrialReleaser<'_, E, I> {
    fn release(&self, resource: &ResourceId) -> Result<(), ReleaseError> {
        let result = match resource {
            ResourceId::Container(name) => self.release_container(name),
            ResourceId::Network(name) => self
                .engine
                .remove_network(name)
                .map_err(|err| err.to_string()),
            ResourceId::Instance(id) => self.release_instance(id),
            ResourceId::File(path) => fsutil::remove_file_ambient(path),
        };
        result.map_err(|message| ReleaseError {
            resource: resource.clone(),
            message,
        })
    }
}
