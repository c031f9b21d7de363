use dashmap::{DashMap, DashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use trellis::lifecycle::{InterceptorService, LifecycleInterceptor, ModuleEvent, ModuleHost};
use trellis::module::{Module, ModuleState};

/// Interceptor service that calls every registered interceptor on demand.
#[derive(Default)]
pub struct FakeInterceptorService {
    interceptors: DashMap<String, Arc<dyn LifecycleInterceptor>>,
}

impl FakeInterceptorService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.interceptors.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Invoke every interceptor; returns how many reported an error.
    pub fn invoke_all(&self, state: ModuleState, module: &Arc<dyn Module>) -> usize {
        let interceptors: Vec<_> = self.interceptors.iter().map(|e| Arc::clone(e.value())).collect();
        interceptors
            .iter()
            .filter(|i| i.invoke(state, module).is_err())
            .count()
    }
}

impl InterceptorService for FakeInterceptorService {
    fn add_interceptor(&self, interceptor: Arc<dyn LifecycleInterceptor>) {
        self.interceptors
            .insert(interceptor.name().to_string(), interceptor);
    }

    fn remove_interceptor(&self, name: &str) -> bool {
        self.interceptors.remove(name).is_some()
    }
}

/// In-memory module runtime.
///
/// With an interceptor service, transitions are delivered synchronously to
/// the registered interceptors. Without one they are broadcast as
/// [`ModuleEvent`]s.
pub struct FakeHost {
    interceptors: Option<Arc<FakeInterceptorService>>,
    events: broadcast::Sender<ModuleEvent>,
    services: DashSet<String>,
    active: Mutex<Vec<Arc<dyn Module>>>,
}

impl FakeHost {
    pub fn with_interceptors() -> Arc<Self> {
        Arc::new(Self::build(Some(Arc::new(FakeInterceptorService::new()))))
    }

    pub fn events_only() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    fn build(interceptors: Option<Arc<FakeInterceptorService>>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            interceptors,
            events,
            services: DashSet::new(),
            active: Mutex::new(Vec::new()),
        }
    }

    pub fn interceptors(&self) -> Option<&Arc<FakeInterceptorService>> {
        self.interceptors.as_ref()
    }

    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains(name)
    }

    /// Mark a module active without delivering any transition.
    pub fn preactivate(&self, module: Arc<dyn Module>) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(module);
    }

    /// Deliver one transition and track the active set.
    pub fn transition(&self, module: &Arc<dyn Module>, state: ModuleState) {
        match &self.interceptors {
            Some(service) => {
                service.invoke_all(state, module);
            }
            None => {
                // no subscribers is fine
                let _ = self.events.send(ModuleEvent::new(Arc::clone(module), state));
            }
        }

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match state {
            ModuleState::Active => active.push(Arc::clone(module)),
            ModuleState::Stopping | ModuleState::Uninstalled => {
                active.retain(|m| m.id() != module.id())
            }
            _ => {}
        }
    }

    pub fn start_module(&self, module: &Arc<dyn Module>) {
        self.transition(module, ModuleState::Starting);
        self.transition(module, ModuleState::Active);
    }

    pub fn stop_module(&self, module: &Arc<dyn Module>) {
        self.transition(module, ModuleState::Stopping);
        self.transition(module, ModuleState::Installed);
    }
}

impl ModuleHost for FakeHost {
    fn register_service(&self, name: &str) {
        self.services.insert(name.to_string());
    }

    fn unregister_service(&self, name: &str) {
        self.services.remove(name);
    }

    fn interceptor_service(&self) -> Option<Arc<dyn InterceptorService>> {
        self.interceptors
            .as_ref()
            .map(|s| Arc::clone(s) as Arc<dyn InterceptorService>)
    }

    fn subscribe_module_events(&self) -> broadcast::Receiver<ModuleEvent> {
        self.events.subscribe()
    }

    fn active_modules(&self) -> Vec<Arc<dyn Module>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
