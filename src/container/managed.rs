use super::{BuildRequest, ContainerBuilder, ContainerHandle};
use crate::dispatcher::{ContainerEvent, ContainerEventKind, EventDispatcher};
use crate::handlers::HandlerRegistry;
use crate::module::Module;
use crate::resolver::DescriptorPathSet;
use crate::worker::WorkerPool;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use strum_macros::Display;

/// Work a [`ManagedContainer`] performs when it starts and stops.
pub trait Initializer: Send + Sync + 'static {
    fn initialize(
        &self,
        module: &dyn Module,
        paths: &DescriptorPathSet,
        handlers: &HandlerRegistry,
    ) -> anyhow::Result<()>;

    /// Release whatever `initialize` acquired.
    fn teardown(&self, _module: &dyn Module) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<F> Initializer for F
where
    F: Fn(&dyn Module, &DescriptorPathSet, &HandlerRegistry) -> anyhow::Result<()>
        + Send
        + Sync
        + 'static,
{
    fn initialize(
        &self,
        module: &dyn Module,
        paths: &DescriptorPathSet,
        handlers: &HandlerRegistry,
    ) -> anyhow::Result<()> {
        self(module, paths, handlers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ContainerState {
    Created,
    Initializing,
    Running,
    Failed,
    Destroyed,
}

struct Inner {
    module: Arc<dyn Module>,
    paths: DescriptorPathSet,
    handlers: Arc<HandlerRegistry>,
    dispatcher: EventDispatcher,
    executor: WorkerPool,
    initializer: Arc<dyn Initializer>,
    state: Mutex<ContainerState>,
}

impl Inner {
    fn event(&self, kind: ContainerEventKind) -> ContainerEvent {
        ContainerEvent::new(kind, self.module.as_ref())
    }

    fn set_state(&self, state: ContainerState) -> ContainerState {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, state)
    }

    fn run_initializer(&self) {
        let name = self.module.symbolic_name();
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.initializer
                .initialize(self.module.as_ref(), &self.paths, &self.handlers)
        }))
        .unwrap_or_else(|_| Err(anyhow::anyhow!("initializer panicked")));

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != ContainerState::Initializing {
            // destroy() got there first
            drop(state);
            tracing::debug!(module = %name, "Container destroyed during initialization");
            if result.is_ok() {
                if let Err(e) = self.initializer.teardown(self.module.as_ref()) {
                    tracing::error!(module = %name, "Late teardown failed: {:#}", e);
                }
            }
            return;
        }

        match result {
            Ok(()) => {
                *state = ContainerState::Running;
                drop(state);
                tracing::debug!(module = %name, "Container running");
                self.dispatcher.dispatch(self.event(ContainerEventKind::Created));
            }
            Err(e) => {
                *state = ContainerState::Failed;
                drop(state);
                tracing::error!(module = %name, "Container initialization failed: {:#}", e);
                self.dispatcher
                    .dispatch(self.event(ContainerEventKind::Failure).with_cause(format!("{:#}", e)));
            }
        }
    }
}

/// Reference [`ContainerHandle`]: runs an [`Initializer`] on the executor and
/// reports progress through the dispatcher.
#[derive(Clone)]
pub struct ManagedContainer {
    inner: Arc<Inner>,
}

impl ManagedContainer {
    pub fn new(request: BuildRequest<'_>, initializer: Arc<dyn Initializer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                module: Arc::clone(request.module),
                paths: request.paths.clone(),
                handlers: Arc::clone(request.handlers),
                dispatcher: request.dispatcher.clone(),
                executor: request.executor.clone(),
                initializer,
                state: Mutex::new(ContainerState::Created),
            }),
        }
    }

    pub fn state(&self) -> ContainerState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.inner.module
    }

    pub fn paths(&self) -> &DescriptorPathSet {
        &self.inner.paths
    }
}

impl ContainerHandle for ManagedContainer {
    fn schedule(&self) -> anyhow::Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != ContainerState::Created {
                anyhow::bail!("container already scheduled (state {})", *state);
            }
            *state = ContainerState::Initializing;
        }

        self.inner
            .dispatcher
            .dispatch(self.inner.event(ContainerEventKind::Creating));

        let inner = Arc::clone(&self.inner);
        if let Err(e) = self.inner.executor.spawn(move || inner.run_initializer()) {
            self.inner.set_state(ContainerState::Failed);
            self.inner.dispatcher.dispatch(
                self.inner
                    .event(ContainerEventKind::Failure)
                    .with_cause(e.to_string()),
            );
            return Err(e.into());
        }
        Ok(())
    }

    fn destroy(&self) -> anyhow::Result<()> {
        let previous = self.inner.set_state(ContainerState::Destroyed);
        if previous == ContainerState::Destroyed {
            return Ok(());
        }

        self.inner
            .dispatcher
            .dispatch(self.inner.event(ContainerEventKind::Destroying));

        let result = if previous == ContainerState::Running {
            self.inner.initializer.teardown(self.inner.module.as_ref())
        } else {
            Ok(())
        };

        if let Err(e) = &result {
            self.inner.dispatcher.dispatch(
                self.inner
                    .event(ContainerEventKind::Failure)
                    .with_cause(format!("{:#}", e)),
            );
        }
        // the container is gone whether or not teardown succeeded
        self.inner
            .dispatcher
            .dispatch(self.inner.event(ContainerEventKind::Destroyed));
        result
    }
}

/// [`ContainerBuilder`] producing [`ManagedContainer`]s.
#[derive(Clone)]
pub struct ManagedContainerBuilder {
    initializer: Arc<dyn Initializer>,
}

impl ManagedContainerBuilder {
    pub fn new(initializer: impl Initializer) -> Self {
        Self {
            initializer: Arc::new(initializer),
        }
    }
}

impl ContainerBuilder for ManagedContainerBuilder {
    fn build(&self, request: BuildRequest<'_>) -> anyhow::Result<Box<dyn ContainerHandle>> {
        Ok(Box::new(ManagedContainer::new(
            request,
            Arc::clone(&self.initializer),
        )))
    }
}
