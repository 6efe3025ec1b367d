use std::sync::Arc;

use crate::config::FixtureConfig;
use crate::error::Result;
use crate::handle::{ImageSpec, PortBinding, ResourceHandle};

/// Everything a provisioner needs to bring the resource up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub image: ImageSpec,
    pub ports: Vec<PortBinding>,
    pub container_name: Option<String>,
    /// Host the published ports are reachable on; reported back in the handle.
    pub host: String,
}

impl LaunchRequest {
    pub fn new(image: ImageSpec, ports: Vec<PortBinding>) -> Self {
        Self {
            image,
            ports,
            container_name: None,
            host: crate::config::DEFAULT_HOST.to_string(),
        }
    }

    pub fn from_config(config: &FixtureConfig) -> Result<Self> {
        Ok(Self {
            image: config.image_spec()?,
            ports: config.port_bindings()?,
            container_name: config.container_name.clone(),
            host: config.host.clone(),
        })
    }

    pub fn container_name(mut self, s: impl ToString) -> Self {
        self.container_name = Some(s.to_string());
        self
    }

    pub fn host(mut self, s: impl ToString) -> Self {
        self.host = s.to_string();
        self
    }
}

/// Starts and stops the containerized resource behind a [`SharedFixture`](crate::SharedFixture).
///
/// `launch` blocks until the resource is up or fails. `stop` is not required to be
/// idempotent, the coordinator calls it at most once per handle.
pub trait Provisioner: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> Result<ResourceHandle>;

    fn stop(&self, handle: &ResourceHandle) -> Result<()>;
}

impl<P: Provisioner + ?Sized> Provisioner for Arc<P> {
    fn launch(&self, request: &LaunchRequest) -> Result<ResourceHandle> {
        (**self).launch(request)
    }

    fn stop(&self, handle: &ResourceHandle) -> Result<()> {
        (**self).stop(handle)
    }
}

impl<P: Provisioner + ?Sized> Provisioner for Box<P> {
    fn launch(&self, request: &LaunchRequest) -> Result<ResourceHandle> {
        (**self).launch(request)
    }

    fn stop(&self, handle: &ResourceHandle) -> Result<()> {
        (**self).stop(handle)
    }
}
