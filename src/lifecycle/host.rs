//! Host-side collaborators
//!
//! The host runtime owns modules and delivers their state changes. It can do
//! so in two ways: by calling registered [`LifecycleInterceptor`]s inline with
//! each transition, or by publishing [`ModuleEvent`]s that an extender
//! listens to.

use super::Result;
use crate::module::{Module, ModuleState};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Hook invoked by the host for every module state transition.
pub trait LifecycleInterceptor: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn invoke(&self, state: ModuleState, module: &Arc<dyn Module>) -> Result<()>;
}

/// Host service that calls interceptors around module transitions.
pub trait InterceptorService: Send + Sync {
    fn add_interceptor(&self, interceptor: Arc<dyn LifecycleInterceptor>);

    /// Returns `false` if no interceptor with that name was registered.
    fn remove_interceptor(&self, name: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct ModuleEvent {
    pub module: Arc<dyn Module>,
    pub state: ModuleState,
}

impl ModuleEvent {
    pub fn new(module: Arc<dyn Module>, state: ModuleState) -> Self {
        Self { module, state }
    }
}

/// The module runtime the activator plugs into.
pub trait ModuleHost: Send + Sync + 'static {
    /// Publish a named marker service.
    fn register_service(&self, name: &str);

    fn unregister_service(&self, name: &str);

    /// The interceptor service, if the host offers one.
    fn interceptor_service(&self) -> Option<Arc<dyn InterceptorService>>;

    fn subscribe_module_events(&self) -> broadcast::Receiver<ModuleEvent>;

    /// Modules that are already active.
    fn active_modules(&self) -> Vec<Arc<dyn Module>>;
}
