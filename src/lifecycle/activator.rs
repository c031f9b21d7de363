//! Activator strategies
//!
//! How the manager learns about module transitions depends on the host. When
//! the host offers an [`InterceptorService`] the manager is registered as an
//! interceptor and called inline with each transition. Otherwise an extender
//! subscribes to the host's module events and feeds them to the manager from
//! a background task. The choice is made once, in [`Activator::select`].

use super::{
    InterceptorService, LifecycleError, LifecycleInterceptor, LifecycleManager, ModuleHost,
    Result,
};
use crate::config::{ConfigService, ManagerConfig};
use crate::container::ContainerBuilder;
use async_trait::async_trait;
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Marker service published while an activator is running
pub const MARKER_SERVICE: &str = "trellis.ContainerService";

#[async_trait]
pub trait ActivatorStrategy: Send {
    async fn start(&mut self, host: Arc<dyn ModuleHost>) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;

    /// The running manager, if started
    fn manager(&self) -> Option<&Arc<LifecycleManager>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ActivatorKind {
    Interceptor,
    Extender,
}

/// Manager factory shared by both strategies
#[derive(Clone)]
struct ManagerSpec {
    builder: Arc<dyn ContainerBuilder>,
    config: ManagerConfig,
}

impl ManagerSpec {
    fn create(&self) -> Result<Arc<LifecycleManager>> {
        Ok(Arc::new(LifecycleManager::new(
            Arc::clone(&self.builder),
            self.config.clone(),
        )?))
    }
}

/// Shut a manager down off the async runtime; destroy() and the pool drain
/// both block.
async fn shutdown_manager(manager: Arc<LifecycleManager>) -> Result<()> {
    let report = tokio::task::spawn_blocking(move || manager.shutdown())
        .await
        .map_err(|e| LifecycleError::activator("stop", e.to_string()))?;
    if report.failed > 0 {
        tracing::warn!(
            "{} container(s) failed to destroy during shutdown",
            report.failed
        );
    }
    Ok(())
}

/// Registers the manager with the host's interceptor service.
pub struct InterceptorActivator {
    spec: ManagerSpec,
    manager: Option<Arc<LifecycleManager>>,
    service: Option<Arc<dyn InterceptorService>>,
}

impl InterceptorActivator {
    pub fn new(builder: Arc<dyn ContainerBuilder>, config: ManagerConfig) -> Self {
        Self {
            spec: ManagerSpec { builder, config },
            manager: None,
            service: None,
        }
    }
}

#[async_trait]
impl ActivatorStrategy for InterceptorActivator {
    async fn start(&mut self, host: Arc<dyn ModuleHost>) -> Result<()> {
        let service = host
            .interceptor_service()
            .ok_or_else(|| LifecycleError::activator("start", "host has no interceptor service"))?;

        let manager = self.spec.create()?;
        service.add_interceptor(Arc::clone(&manager) as Arc<dyn LifecycleInterceptor>);
        tracing::debug!("Registered lifecycle interceptor: {}", manager.name());

        self.manager = Some(manager);
        self.service = Some(service);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(service) = self.service.take() {
            if !service.remove_interceptor(super::INTERCEPTOR_NAME) {
                tracing::warn!("Lifecycle interceptor was not registered with the host");
            }
        }
        match self.manager.take() {
            Some(manager) => shutdown_manager(manager).await,
            None => Ok(()),
        }
    }

    fn manager(&self) -> Option<&Arc<LifecycleManager>> {
        self.manager.as_ref()
    }
}

/// Listens to the host's module events and drives the manager itself.
pub struct ExtenderActivator {
    spec: ManagerSpec,
    manager: Option<Arc<LifecycleManager>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ExtenderActivator {
    pub fn new(builder: Arc<dyn ContainerBuilder>, config: ManagerConfig) -> Self {
        Self {
            spec: ManagerSpec { builder, config },
            manager: None,
            shutdown_tx: None,
            task: None,
        }
    }
}

#[async_trait]
impl ActivatorStrategy for ExtenderActivator {
    async fn start(&mut self, host: Arc<dyn ModuleHost>) -> Result<()> {
        let manager = self.spec.create()?;

        // subscribe first so nothing slips between the scan and the listener
        let mut events = host.subscribe_module_events();
        let existing = host.active_modules();
        if !existing.is_empty() {
            tracing::debug!("Extending {} already active module(s)", existing.len());
            let m = Arc::clone(&manager);
            tokio::task::spawn_blocking(move || {
                for module in &existing {
                    m.on_module_activating(module);
                }
            })
            .await
            .map_err(|e| LifecycleError::activator("start", e.to_string()))?;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let m = Arc::clone(&manager);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            let m = Arc::clone(&m);
                            let handled = tokio::task::spawn_blocking(move || {
                                m.on_transition(&event.module, event.state)
                            })
                            .await;
                            if let Err(e) = handled {
                                tracing::error!("Module event handler failed: {}", e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            tracing::warn!("Extender missed {} module event(s)", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::debug!("Extender event loop finished");
        });

        self.manager = Some(manager);
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            // receiver gone means the loop already ended
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Extender event loop panicked: {}", e);
            }
        }
        match self.manager.take() {
            Some(manager) => shutdown_manager(manager).await,
            None => Ok(()),
        }
    }

    fn manager(&self) -> Option<&Arc<LifecycleManager>> {
        self.manager.as_ref()
    }
}

/// The strategies an [`Activator`] can run
pub enum Strategy {
    Interceptor(InterceptorActivator),
    Extender(ExtenderActivator),
}

impl Strategy {
    fn as_dyn(&mut self) -> &mut dyn ActivatorStrategy {
        match self {
            Self::Interceptor(a) => a,
            Self::Extender(a) => a,
        }
    }
}

/// Bootstrap entry point: publishes the marker service and runs the strategy
/// chosen for the host.
///
/// # Example
///
/// ```rust,ignore
/// use trellis::lifecycle::{Activator, ActivatorStrategy};
///
/// let mut activator = Activator::select(host.as_ref(), Arc::new(builder), ManagerConfig::from_env()?);
/// activator.start(Arc::clone(&host)).await?;
/// // ... modules come and go ...
/// activator.stop().await?;
/// ```
pub struct Activator {
    strategy: Strategy,
    host: Option<Arc<dyn ModuleHost>>,
}

impl Activator {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            host: None,
        }
    }

    /// Pick the interceptor strategy when the host supports it, the extender
    /// otherwise.
    pub fn select(
        host: &dyn ModuleHost,
        builder: Arc<dyn ContainerBuilder>,
        config: ManagerConfig,
    ) -> Self {
        let strategy = if host.interceptor_service().is_some() {
            Strategy::Interceptor(InterceptorActivator::new(builder, config))
        } else {
            Strategy::Extender(ExtenderActivator::new(builder, config))
        };
        Self::new(strategy)
    }

    /// Load settings from `service`, pick the strategy for `host` and start it.
    pub async fn bootstrap(
        host: Arc<dyn ModuleHost>,
        builder: Arc<dyn ContainerBuilder>,
        service: &ConfigService,
    ) -> crate::Result<Self> {
        let config = ManagerConfig::from_service(service)?;
        let mut activator = Self::select(host.as_ref(), builder, config);
        activator.start(host).await?;
        Ok(activator)
    }

    pub fn kind(&self) -> ActivatorKind {
        match &self.strategy {
            Strategy::Interceptor(_) => ActivatorKind::Interceptor,
            Strategy::Extender(_) => ActivatorKind::Extender,
        }
    }

    pub fn is_running(&self) -> bool {
        self.host.is_some()
    }
}

#[async_trait]
impl ActivatorStrategy for Activator {
    async fn start(&mut self, host: Arc<dyn ModuleHost>) -> Result<()> {
        let kind = self.kind();
        if self.is_running() {
            return Err(LifecycleError::activator("start", format!("{} activator already running", kind)));
        }

        host.register_service(MARKER_SERVICE);
        tracing::info!("Starting {} activator", kind);

        if let Err(e) = self.strategy.as_dyn().start(Arc::clone(&host)).await {
            tracing::error!("Failed to start {} activator: {}", kind, e);
            host.unregister_service(MARKER_SERVICE);
            return Err(e);
        }
        self.host = Some(host);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let kind = self.kind();
        tracing::info!("Stopping {} activator", kind);

        let result = self.strategy.as_dyn().stop().await;
        if let Err(e) = &result {
            tracing::error!("Failed to stop {} activator: {}", kind, e);
        }
        if let Some(host) = self.host.take() {
            host.unregister_service(MARKER_SERVICE);
        }
        result
    }

    fn manager(&self) -> Option<&Arc<LifecycleManager>> {
        match &self.strategy {
            Strategy::Interceptor(a) => a.manager(),
            Strategy::Extender(a) => a.manager(),
        }
    }
}
