//! Lifecycle-specific error types

use crate::config::ConfigError;
use crate::worker::PoolError;
use thiserror::Error;

/// Errors that can occur while managing module containers
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The build collaborator failed to construct a container
    #[error("Failed to build container for {module}: {source:#}")]
    Build {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// The container could not start its initialization
    #[error("Failed to schedule container for {module}: {source:#}")]
    Schedule {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// Teardown failed; the container is forgotten regardless
    #[error("Failed to destroy container for {module}: {source:#}")]
    Destroy {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// The host delivered a transition that does not fit the module's state
    #[error("Protocol violation for {module}: {message}")]
    ProtocolViolation { module: String, message: String },

    /// The manager has been shut down
    #[error("Lifecycle manager is stopped")]
    Stopped,

    /// Starting or stopping an activator strategy failed
    #[error("Activator failed during {phase}: {message}")]
    Activator { phase: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl LifecycleError {
    pub fn build(module: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Build {
            module: module.into(),
            source,
        }
    }

    pub fn schedule(module: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Schedule {
            module: module.into(),
            source,
        }
    }

    pub fn destroy(module: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Destroy {
            module: module.into(),
            source,
        }
    }

    pub fn protocol_violation(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            module: module.into(),
            message: message.into(),
        }
    }

    pub fn activator(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Activator {
            phase: phase.into(),
            message: message.into(),
        }
    }
}

/// A specialized Result type for lifecycle operations
pub type Result<T> = std::result::Result<T, LifecycleError>;
