//! Container build collaborator
//!
//! The component-wiring engine lives behind [`ContainerBuilder`]. The manager
//! hands it everything a container needs and gets back a [`ContainerHandle`]
//! it owns until teardown.

mod managed;

pub use managed::{ContainerState, Initializer, ManagedContainer, ManagedContainerBuilder};

use crate::dispatcher::EventDispatcher;
use crate::handlers::HandlerRegistry;
use crate::module::Module;
use crate::resolver::DescriptorPathSet;
use crate::worker::WorkerPool;
use std::sync::Arc;

/// Everything a builder receives for one module.
pub struct BuildRequest<'a> {
    pub module: &'a Arc<dyn Module>,
    pub dispatcher: &'a EventDispatcher,
    pub handlers: &'a Arc<HandlerRegistry>,
    pub executor: &'a WorkerPool,
    pub paths: &'a DescriptorPathSet,
}

/// A built, possibly still initialising, container.
pub trait ContainerHandle: Send + Sync + 'static {
    /// Start asynchronous initialisation on the executor.
    fn schedule(&self) -> anyhow::Result<()>;

    /// Tear the container down. Blocks until done and must be safe to call
    /// while initialisation is still running.
    fn destroy(&self) -> anyhow::Result<()>;
}

pub trait ContainerBuilder: Send + Sync + 'static {
    fn build(&self, request: BuildRequest<'_>) -> anyhow::Result<Box<dyn ContainerHandle>>;
}

impl<F> ContainerBuilder for F
where
    F: Fn(BuildRequest<'_>) -> anyhow::Result<Box<dyn ContainerHandle>> + Send + Sync + 'static,
{
    fn build(&self, request: BuildRequest<'_>) -> anyhow::Result<Box<dyn ContainerHandle>> {
        self(request)
    }
}
