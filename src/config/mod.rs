use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Prefix of environment variables picked up by [`ConfigService::from_env`].
pub const ENV_PREFIX: &str = "TRELLIS_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    Invalid { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Key/value configuration store
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store from `TRELLIS_*` environment variables. Keys are stored
    /// lower-cased without the prefix (`TRELLIS_POOL_SIZE` -> `pool_size`).
    pub fn from_env() -> Self {
        let service = Self::default();
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                service.set(&stripped.to_ascii_lowercase(), &value);
            }
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::invalid(key, e.to_string())),
        }
    }
}

/// Tunables of a [`LifecycleManager`](crate::lifecycle::LifecycleManager).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Worker threads in the shared task pool. `0` means one per CPU.
    pub pool_size: usize,
    /// Manifest header listing descriptor paths.
    pub descriptor_header: String,
    /// Directory scanned when the header is absent.
    pub descriptor_dir: String,
    pub descriptor_pattern: String,
    /// Buffered container events per subscriber.
    pub event_capacity: usize,
    pub shutdown_timeout_ms: u64,
    /// Name of the resolution context entered around container builds.
    pub context_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            descriptor_header: "Bundle-Blueprint".to_string(),
            descriptor_dir: "OSGI-INF/blueprint".to_string(),
            descriptor_pattern: "*.xml".to_string(),
            event_capacity: 64,
            shutdown_timeout_ms: 5_000,
            context_name: "trellis".to_string(),
        }
    }
}

impl ManagerConfig {
    /// Overlay values found in `service` on top of the defaults.
    pub fn from_service(service: &ConfigService) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = service.parse::<usize>("pool_size")? {
            config.pool_size = v;
        }
        if let Some(v) = service.get("descriptor_header") {
            config.descriptor_header = v;
        }
        if let Some(v) = service.get("descriptor_dir") {
            config.descriptor_dir = v;
        }
        if let Some(v) = service.get("descriptor_pattern") {
            config.descriptor_pattern = v;
        }
        if let Some(v) = service.parse::<usize>("event_capacity")? {
            config.event_capacity = v;
        }
        if let Some(v) = service.parse::<u64>("shutdown_timeout_ms")? {
            config.shutdown_timeout_ms = v;
        }
        if let Some(v) = service.get("context_name") {
            config.context_name = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_service(&ConfigService::from_env())
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.descriptor_header.trim().is_empty() {
            return Err(ConfigError::invalid("descriptor_header", "must not be empty"));
        }
        if self.descriptor_dir.trim().is_empty() {
            return Err(ConfigError::invalid("descriptor_dir", "must not be empty"));
        }
        if self.descriptor_pattern.trim().is_empty() {
            return Err(ConfigError::invalid("descriptor_pattern", "must not be empty"));
        }
        self.descriptor_glob()?;
        if self.event_capacity == 0 {
            return Err(ConfigError::invalid("event_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// Compile `descriptor_pattern` into a glob matched against entry file names.
    pub fn descriptor_glob(&self) -> Result<glob::Pattern, ConfigError> {
        glob::Pattern::new(&self.descriptor_pattern)
            .map_err(|e| ConfigError::invalid("descriptor_pattern", e.to_string()))
    }

    /// Worker count after resolving `0` to the number of CPUs.
    pub fn effective_pool_size(&self) -> usize {
        if self.pool_size == 0 {
            num_cpus::get()
        } else {
            self.pool_size
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.descriptor_header, "Bundle-Blueprint");
        assert_eq!(config.descriptor_dir, "OSGI-INF/blueprint");
        assert_eq!(config.descriptor_pattern, "*.xml");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_service_overlay() {
        let service = ConfigService::new();
        service.set("pool_size", "5");
        service.set("descriptor_dir", "META-INF/spring");

        let config = ManagerConfig::from_service(&service).unwrap();
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.descriptor_dir, "META-INF/spring");
        assert_eq!(config.descriptor_header, "Bundle-Blueprint");
    }

    #[test]
    fn test_from_service_rejects_garbage() {
        let service = ConfigService::new();
        service.set("pool_size", "three");
        assert!(matches!(
            ManagerConfig::from_service(&service),
            Err(ConfigError::Invalid { ref key, .. }) if key == "pool_size"
        ));
    }

    #[test]
    fn test_from_json_partial() {
        let config = ManagerConfig::from_json(r#"{ "pool_size": 0, "event_capacity": 8 }"#).unwrap();
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.effective_pool_size(), num_cpus::get());
        assert!(ManagerConfig::from_json(r#"{ "event_capacity": 0 }"#).is_err());
    }

    #[test]
    fn test_invalid_descriptor_pattern_is_rejected() {
        let config = ManagerConfig {
            descriptor_pattern: "ctx-[.xml".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "descriptor_pattern"
        ));

        let config = ManagerConfig {
            descriptor_pattern: "ctx-[0-9].xml".to_string(),
            ..Default::default()
        };
        let glob = config.descriptor_glob().unwrap();
        assert!(glob.matches("ctx-1.xml"));
        assert!(!glob.matches("ctx-a.xml"));
    }
}
