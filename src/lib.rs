//! # Trellis
//!
//! Per-module container lifecycle management for modular runtimes.
//!
//! A host runtime installs, starts and stops modules. Trellis watches those
//! transitions and gives every module that declares configuration descriptors
//! its own container: built when the module starts, destroyed when it stops.
//!
//! ## Features
//!
//! - **Descriptor Resolution**: explicit header first, conventional directory scan otherwise
//! - **One Container per Module**: a concurrent registry that never double-registers
//! - **Shared Resources**: one namespace-handler registry, worker pool and event dispatcher
//! - **Scoped Resolution Context**: builders run inside the manager's context, restored afterwards
//! - **Two Activation Strategies**: inline interceptor or event-driven extender
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let host: Arc<dyn ModuleHost> = my_runtime();
//!
//!     let builder = ManagedContainerBuilder::new(
//!         |module: &dyn Module, paths: &DescriptorPathSet, _: &HandlerRegistry| {
//!             tracing::info!("{}: {:?}", module.symbolic_name(), paths);
//!             Ok(())
//!         },
//!     );
//!
//!     let activator = Activator::bootstrap(host, Arc::new(builder), &ConfigService::from_env()).await?;
//!     let activator = Arc::new(tokio::sync::Mutex::new(activator));
//!
//!     ShutdownHandler::new(activator).wait_for_shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod container;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod module;
pub mod registry;
pub mod resolver;
pub mod worker;

// Re-export core types
pub use config::{ConfigService, ManagerConfig};
pub use container::{ContainerBuilder, ContainerHandle, ManagedContainerBuilder};
pub use error::{Result, TrellisError};
pub use lifecycle::{Activator, LifecycleManager, TransitionOutcome};
pub use module::{Module, ModuleId, ModuleState};
pub use resolver::{DescriptorPathSet, ResourcePathResolver};

pub use async_trait::async_trait;

/// Prelude module for convenient imports
///
/// ```
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ConfigService, ManagerConfig};
    pub use crate::container::{
        BuildRequest, ContainerBuilder, ContainerHandle, ContainerState, Initializer,
        ManagedContainer, ManagedContainerBuilder,
    };
    pub use crate::context::{ContextGuard, ResolutionContext, current_context, with_context};
    pub use crate::dispatcher::{ContainerEvent, ContainerEventKind, EventDispatcher};
    pub use crate::error::{Result, TrellisError};
    pub use crate::handlers::{HandlerRegistry, NamespaceHandler};
    pub use crate::lifecycle::{
        Activator, ActivatorKind, ActivatorStrategy, InterceptorService, LifecycleError,
        LifecycleInterceptor, LifecycleManager, ModuleEvent, ModuleHost, ShutdownHandler,
        ShutdownReport, TransitionOutcome, shutdown_signal,
    };
    pub use crate::module::{DirectoryModule, Module, ModuleError, ModuleId, ModuleState};
    pub use crate::resolver::{DescriptorPathSet, ResourcePathResolver};
    pub use crate::worker::WorkerPool;
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
