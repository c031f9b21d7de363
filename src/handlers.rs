use dashmap::DashMap;
use std::sync::Arc;

/// Pluggable descriptor-syntax extension, keyed by namespace URI.
pub trait NamespaceHandler: Send + Sync + 'static {
    fn namespace(&self) -> &str;

    /// Schema location used to validate elements of this namespace, if any.
    fn schema_location(&self) -> Option<&str> {
        None
    }
}

/// Thread-safe registry of namespace handlers shared by every container a
/// manager builds.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn NamespaceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler, replacing and returning any handler previously
    /// bound to the same namespace.
    pub fn register(&self, handler: Arc<dyn NamespaceHandler>) -> Option<Arc<dyn NamespaceHandler>> {
        let namespace = handler.namespace().to_string();
        tracing::debug!("Registering namespace handler: {}", namespace);
        self.handlers.insert(namespace, handler)
    }

    pub fn unregister(&self, namespace: &str) -> Option<Arc<dyn NamespaceHandler>> {
        self.handlers.remove(namespace).map(|(_, handler)| handler)
    }

    pub fn get(&self, namespace: &str) -> Option<Arc<dyn NamespaceHandler>> {
        self.handlers.get(namespace).map(|entry| Arc::clone(entry.value()))
    }

    /// Namespaces from `required` with no registered handler.
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        required
            .into_iter()
            .filter(|ns| !self.handlers.contains_key(*ns))
            .collect()
    }

    pub fn contains(&self, namespace: &str) -> bool {
        self.handlers.contains_key(namespace)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
