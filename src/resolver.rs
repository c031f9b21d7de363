//! Descriptor path resolution
//!
//! Decides which descriptor resources feed a module's container:
//!
//! 1. If the module declares the descriptor header, its comma separated list
//!    is used as-is (trimmed, order preserved, empty tokens dropped).
//! 2. Otherwise the descriptor directory is scanned non-recursively for
//!    entries matching the descriptor pattern.
//!
//! An empty result means the module gets no container.

use crate::config::{ConfigError, ManagerConfig};
use crate::module::{Module, ModuleError, Pattern};
use std::ops::Deref;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("Header '{header}' of {module} lists no descriptor paths")]
    EmptyHeader { module: String, header: String },

    #[error(transparent)]
    Enumeration(#[from] ModuleError),
}

/// Ordered descriptor paths for one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorPathSet(Vec<String>);

impl DescriptorPathSet {
    pub fn new(paths: Vec<String>) -> Self {
        Self(paths)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl Deref for DescriptorPathSet {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S: Into<String>> FromIterator<S> for DescriptorPathSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Computes [`DescriptorPathSet`]s from module metadata.
#[derive(Debug, Clone)]
pub struct ResourcePathResolver {
    header: String,
    dir: String,
    pattern: Pattern,
}

impl ResourcePathResolver {
    pub fn new(
        header: impl Into<String>,
        dir: impl Into<String>,
        pattern: Pattern,
    ) -> Self {
        Self {
            header: header.into(),
            dir: dir.into().trim_matches('/').to_string(),
            pattern,
        }
    }

    /// Fails if the configured descriptor pattern is not a valid glob.
    pub fn from_config(config: &ManagerConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            &config.descriptor_header,
            &config.descriptor_dir,
            config.descriptor_glob()?,
        ))
    }

    /// Resolve paths, logging any failure and treating it as "no descriptors".
    pub fn resolve(&self, module: &dyn Module) -> DescriptorPathSet {
        match self.try_resolve(module) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(module = %module.symbolic_name(), "Descriptor resolution failed: {}", e);
                DescriptorPathSet::empty()
            }
        }
    }

    pub fn try_resolve(&self, module: &dyn Module) -> Result<DescriptorPathSet, ResolutionError> {
        if let Some(value) = module.header(&self.header) {
            let paths = split_header(&value);
            if paths.is_empty() {
                return Err(ResolutionError::EmptyHeader {
                    module: module.symbolic_name().to_string(),
                    header: self.header.clone(),
                });
            }
            tracing::trace!(module = %module.symbolic_name(), count = paths.len(), "Paths from header");
            return Ok(paths);
        }

        let entries = module.find_entries(&self.dir, &self.pattern, false)?;
        let paths: DescriptorPathSet = entries
            .into_iter()
            .map(|entry| self.normalize_entry(&entry))
            .collect();
        tracing::trace!(module = %module.symbolic_name(), count = paths.len(), "Paths from directory scan");
        Ok(paths)
    }

    /// Entries may come back as URLs (`bundle://7/OSGI-INF/blueprint/a.xml`);
    /// cut them down to start at the scan directory.
    fn normalize_entry(&self, entry: &str) -> String {
        match entry.find(self.dir.as_str()) {
            Some(index) => entry[index..].to_string(),
            None => entry.to_string(),
        }
    }
}

fn split_header(value: &str) -> DescriptorPathSet {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .collect()
}
