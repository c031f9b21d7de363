//! Module handles
//!
//! A module is an independently lifecycled deployable unit supplied by the
//! host. The manager only needs three things from it: a stable identity, header
//! lookup and a non-recursive resource listing.

mod fs;

pub use fs::DirectoryModule;
pub use glob::Pattern;

use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// Stable, hashable identity of a module. Used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle states a module moves through on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ModuleState {
    Installed,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Failed to enumerate entries of {module} under '{dir}': {source}")]
    Enumeration {
        module: String,
        dir: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Module {0} is no longer installed")]
    Uninstalled(String),
}

/// Opaque handle to a host module.
///
/// Implementations must be cheap to query; the resolver may call
/// [`Module::header`] and [`Module::find_entries`] on the thread delivering the
/// lifecycle transition.
pub trait Module: Send + Sync + 'static {
    fn id(&self) -> ModuleId;

    fn symbolic_name(&self) -> &str;

    /// Look up a manifest header by name.
    fn header(&self, name: &str) -> Option<String>;

    /// List entries below `dir` whose file name matches `pattern`.
    /// Order follows the underlying enumeration.
    fn find_entries(
        &self,
        dir: &str,
        pattern: &Pattern,
        recurse: bool,
    ) -> Result<Vec<String>, ModuleError>;
}

impl fmt::Debug for dyn Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id())
            .field("symbolic_name", &self.symbolic_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_module_state_parse_and_display() {
        assert_eq!(ModuleState::from_str("STARTING").unwrap(), ModuleState::Starting);
        assert_eq!(ModuleState::from_str("stopping").unwrap(), ModuleState::Stopping);
        assert_eq!(ModuleState::Uninstalled.to_string(), "UNINSTALLED");
        assert!(ModuleState::from_str("RESOLVING").is_err());
    }
}
