//! Container Lifecycle Module
//!
//! Ties module transitions to container lifetimes.
//!
//! # Transitions
//!
//! ```text
//! STARTING
//!    ↓
//! 1. Resolve descriptor paths          (header, else directory scan)
//!    ↓  empty → no container
//! 2. Build container                   ← inside the manager's resolution context
//!    ↓
//! 3. Register container                (one per module)
//!    ↓
//! 4. Schedule initialization           ← runs on the shared worker pool
//!    ↓
//! [Running...]
//!    ↓
//! STOPPING
//!    ↓
//! 5. Remove from registry
//!    ↓
//! 6. Destroy container
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis::lifecycle::{Activator, ActivatorStrategy};
//! use trellis::container::ManagedContainerBuilder;
//!
//! let builder = ManagedContainerBuilder::new(|module: &dyn Module, paths: &DescriptorPathSet, _: &HandlerRegistry| {
//!     tracing::info!("Wiring {} from {} descriptor(s)", module.symbolic_name(), paths.len());
//!     Ok(())
//! });
//!
//! let mut activator = Activator::select(host.as_ref(), Arc::new(builder), ManagerConfig::default());
//! activator.start(host).await?;
//! ```

mod activator;
mod error;
mod host;
mod manager;
mod shutdown;

pub use activator::{
    Activator, ActivatorKind, ActivatorStrategy, ExtenderActivator, InterceptorActivator,
    MARKER_SERVICE, Strategy,
};
pub use error::{LifecycleError, Result};
pub use host::{InterceptorService, LifecycleInterceptor, ModuleEvent, ModuleHost};
pub use manager::{INTERCEPTOR_NAME, LifecycleManager, ShutdownReport, TransitionOutcome};
pub use shutdown::{ShutdownHandler, shutdown_signal};
