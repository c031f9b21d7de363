//! Lifecycle Manager
//!
//! Reacts to module transitions: builds a container when a module starts and
//! it declares descriptors, destroys it when the module stops.

use super::{LifecycleError, LifecycleInterceptor, Result};
use crate::config::ManagerConfig;
use crate::container::{BuildRequest, ContainerBuilder, ContainerHandle};
use crate::context::{ContextGuard, ResolutionContext};
use crate::dispatcher::EventDispatcher;
use crate::handlers::HandlerRegistry;
use crate::module::{Module, ModuleId, ModuleState};
use crate::registry::{ContainerRegistry, RegisteredContainer};
use crate::resolver::{DescriptorPathSet, ResourcePathResolver};
use crate::worker::WorkerPool;
use chrono::Utc;
use dashmap::DashSet;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strum_macros::Display;

/// Name under which the manager registers as a lifecycle interceptor
pub const INTERCEPTOR_NAME: &str = "trellis.lifecycle";

/// What a transition did to the module's container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TransitionOutcome {
    /// A container was built, registered and scheduled
    Registered { paths: usize },
    /// The module declares no descriptors
    NoDescriptors,
    /// The module already had a live container; nothing changed
    AlreadyRegistered,
    BuildFailed,
    /// The container was registered but could not start; it has been removed
    ScheduleFailed,
    Destroyed,
    /// Teardown failed; the container is no longer registered
    DestroyFailed,
    /// The module's last activation produced no container
    NotRegistered,
    /// The module was not activated through this manager, or was already
    /// deactivated
    UnknownModule,
    /// The state is not one this manager reacts to
    Ignored,
    /// The manager has been shut down
    Stopped,
}

/// Result of [`LifecycleManager::shutdown`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub destroyed: usize,
    pub failed: usize,
    /// Whether the worker pool finished its in-flight jobs before the timeout
    pub pool_drained: bool,
}

/// Owns every module container and the resources they share.
///
/// The shared handler registry, worker pool and event dispatcher are created
/// once, in that order, and live as long as the manager. Transitions for
/// different modules may be delivered concurrently from any thread; the host
/// is expected to serialise transitions of a single module.
///
/// # Example
///
/// ```rust,ignore
/// use trellis::lifecycle::LifecycleManager;
///
/// let manager = LifecycleManager::new(Arc::new(builder), ManagerConfig::default())?;
///
/// manager.on_transition(&module, ModuleState::Starting);
/// // ... module runs ...
/// manager.on_transition(&module, ModuleState::Stopping);
///
/// manager.shutdown();
/// ```
pub struct LifecycleManager {
    registry: ContainerRegistry,
    resolver: ResourcePathResolver,
    builder: Arc<dyn ContainerBuilder>,
    handlers: Arc<HandlerRegistry>,
    pool: WorkerPool,
    dispatcher: EventDispatcher,
    context: ResolutionContext,
    config: ManagerConfig,
    /// Modules whose last activation ended without a container
    uncontained: DashSet<ModuleId>,
    stopped: AtomicBool,
}

impl LifecycleManager {
    /// Create a manager and its shared resources
    pub fn new(builder: Arc<dyn ContainerBuilder>, config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let handlers = Arc::new(HandlerRegistry::new());
        let pool = WorkerPool::new(config.effective_pool_size())?;
        let dispatcher = EventDispatcher::new(pool.clone(), config.event_capacity);

        tracing::info!(
            "Lifecycle manager started ({} workers, descriptors from '{}' or {}/{})",
            pool.size(),
            config.descriptor_header,
            config.descriptor_dir,
            config.descriptor_pattern
        );

        Ok(Self {
            registry: ContainerRegistry::new(),
            resolver: ResourcePathResolver::from_config(&config)?,
            builder,
            handlers,
            pool,
            dispatcher,
            context: ResolutionContext::new(&config.context_name),
            config,
            uncontained: DashSet::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Dispatch on the transition kind. Only `Starting` and `Stopping` matter.
    pub fn on_transition(&self, module: &Arc<dyn Module>, state: ModuleState) -> TransitionOutcome {
        match state {
            ModuleState::Starting => self.on_module_activating(module),
            ModuleState::Stopping => self.on_module_deactivating(module),
            _ => {
                tracing::trace!(module = %module.symbolic_name(), state = %state, "Ignoring transition");
                TransitionOutcome::Ignored
            }
        }
    }

    pub fn on_module_activating(&self, module: &Arc<dyn Module>) -> TransitionOutcome {
        let name = module.symbolic_name();
        if self.is_stopped() {
            tracing::debug!(module = %name, "Ignoring activation: {}", LifecycleError::Stopped);
            return TransitionOutcome::Stopped;
        }

        if self.registry.contains(module.id()) {
            let violation = LifecycleError::protocol_violation(
                name,
                "activated while its container is still live",
            );
            tracing::warn!(module = %name, "{}", violation);
            return TransitionOutcome::AlreadyRegistered;
        }

        let paths = self.resolver.resolve(module.as_ref());
        if paths.is_empty() {
            tracing::debug!(module = %name, "No descriptors, no container");
            self.uncontained.insert(module.id());
            return TransitionOutcome::NoDescriptors;
        }

        tracing::debug!(module = %name, paths = paths.len(), "Creating container");
        let handle: Arc<dyn ContainerHandle> = match self.build(module, &paths) {
            Ok(handle) => Arc::from(handle),
            Err(e) => {
                tracing::error!(module = %name, "{}", e);
                self.uncontained.insert(module.id());
                return TransitionOutcome::BuildFailed;
            }
        };

        if let Err(rejected) = self.registry.try_insert(Arc::clone(module), Arc::clone(&handle)) {
            let violation = LifecycleError::protocol_violation(
                name,
                "concurrent activation already registered a container",
            );
            tracing::warn!(module = %name, "{}", violation);
            // never registered, so nobody else can reach it
            if let Err(source) = rejected.destroy() {
                tracing::error!(module = %name, "{}", LifecycleError::destroy(name, source));
            }
            return TransitionOutcome::AlreadyRegistered;
        }

        // shutdown may have drained the registry while we were building
        if self.is_stopped() {
            if let Some(entry) = self.registry.remove_if_present(module.id()) {
                self.destroy_entry(entry);
            }
            return TransitionOutcome::Stopped;
        }

        if let Err(source) = handle.schedule() {
            tracing::error!(module = %name, "{}", LifecycleError::schedule(name, source));
            if let Some(entry) = self.registry.remove_if_present(module.id()) {
                self.destroy_entry(entry);
            }
            self.uncontained.insert(module.id());
            return TransitionOutcome::ScheduleFailed;
        }

        self.uncontained.remove(&module.id());
        TransitionOutcome::Registered { paths: paths.len() }
    }

    /// Remove and destroy the module's container.
    ///
    /// A module without a container is expected when its last activation
    /// produced none (no descriptors, or a failed build). Anything else is a
    /// protocol violation: logged, and otherwise a no-op.
    pub fn on_module_deactivating(&self, module: &Arc<dyn Module>) -> TransitionOutcome {
        let name = module.symbolic_name();
        if self.is_stopped() {
            tracing::debug!(module = %name, "Ignoring deactivation: {}", LifecycleError::Stopped);
            return TransitionOutcome::Stopped;
        }

        match self.registry.remove_if_present(module.id()) {
            Some(entry) => {
                if self.destroy_entry(entry) {
                    TransitionOutcome::Destroyed
                } else {
                    TransitionOutcome::DestroyFailed
                }
            }
            None if self.uncontained.remove(&module.id()).is_some() => {
                tracing::trace!(module = %name, "No container to destroy");
                TransitionOutcome::NotRegistered
            }
            None => {
                let violation = LifecycleError::protocol_violation(
                    name,
                    "deactivated without a matching activation",
                );
                tracing::warn!(module = %name, "{}", violation);
                TransitionOutcome::UnknownModule
            }
        }
    }

    /// Destroy every live container, then release the dispatcher and the
    /// worker pool. Only the first call does anything.
    pub fn shutdown(&self) -> ShutdownReport {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return ShutdownReport {
                pool_drained: true,
                ..Default::default()
            };
        }

        tracing::info!(
            "Shutting down lifecycle manager ({} live containers)",
            self.registry.len()
        );

        let mut report = ShutdownReport::default();
        for entry in self.registry.remove_all() {
            if self.destroy_entry(entry) {
                report.destroyed += 1;
            } else {
                report.failed += 1;
            }
        }

        self.uncontained.clear();
        self.dispatcher.close();
        report.pool_drained = self.pool.shutdown(self.config.shutdown_timeout());

        tracing::info!(
            "Lifecycle manager shut down ({} destroyed, {} failed)",
            report.destroyed,
            report.failed
        );
        report
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_registered(&self, id: ModuleId) -> bool {
        self.registry.contains(id)
    }

    pub fn registered_modules(&self) -> Vec<ModuleId> {
        self.registry.module_ids()
    }

    pub fn container_count(&self) -> usize {
        self.registry.len()
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn executor(&self) -> &WorkerPool {
        &self.pool
    }

    /// The context in effect while builders run
    pub fn context(&self) -> &ResolutionContext {
        &self.context
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn build(
        &self,
        module: &Arc<dyn Module>,
        paths: &DescriptorPathSet,
    ) -> Result<Box<dyn ContainerHandle>> {
        let _guard = ContextGuard::enter(&self.context);

        let request = BuildRequest {
            module,
            dispatcher: &self.dispatcher,
            handlers: &self.handlers,
            executor: &self.pool,
            paths,
        };

        match catch_unwind(AssertUnwindSafe(|| self.builder.build(request))) {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(source)) => Err(LifecycleError::build(module.symbolic_name(), source)),
            Err(payload) => Err(LifecycleError::build(
                module.symbolic_name(),
                anyhow::anyhow!("builder panicked: {}", panic_message(&payload)),
            )),
        }
    }

    /// Returns `false` if teardown failed. The entry is gone either way.
    fn destroy_entry(&self, entry: RegisteredContainer) -> bool {
        let lived = Utc::now() - entry.registered_at();
        let (module, handle) = entry.into_parts();
        let name = module.symbolic_name();
        tracing::debug!(
            module = %name,
            lived_ms = lived.num_milliseconds(),
            "Destroying container"
        );

        let result = catch_unwind(AssertUnwindSafe(|| handle.destroy())).unwrap_or_else(|payload| {
            Err(anyhow::anyhow!("destroy panicked: {}", panic_message(&payload)))
        });

        match result {
            Ok(()) => true,
            Err(source) => {
                tracing::error!(module = %name, "{}", LifecycleError::destroy(name, source));
                false
            }
        }
    }
}

impl LifecycleInterceptor for LifecycleManager {
    fn name(&self) -> &str {
        INTERCEPTOR_NAME
    }

    /// Failures are logged by the manager and never surface to the host.
    fn invoke(&self, state: ModuleState, module: &Arc<dyn Module>) -> Result<()> {
        self.on_transition(module, state);
        Ok(())
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        if !self.is_stopped() {
            tracing::debug!("Lifecycle manager dropped without shutdown");
            self.shutdown();
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
