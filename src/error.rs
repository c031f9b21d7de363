use thiserror::Error;

use crate::config::ConfigError;
use crate::lifecycle::LifecycleError;

pub type Result<T> = std::result::Result<T, TrellisError>;

#[derive(Debug, Error)]
pub enum TrellisError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
