use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use trellis::module::{Module, ModuleError, ModuleId, Pattern};

/// Module with canned headers and resource entries.
///
/// Entries are relative paths such as `OSGI-INF/blueprint/a.xml`. Listings
/// are returned in insertion order.
pub struct FakeModule {
    id: ModuleId,
    name: String,
    headers: HashMap<String, String>,
    entries: Vec<String>,
    entry_prefix: Option<String>,
    fail_enumeration: bool,
    scans: AtomicUsize,
}

impl FakeModule {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: ModuleId(id),
            name: name.into(),
            headers: HashMap::new(),
            entries: Vec::new(),
            entry_prefix: None,
            fail_enumeration: false,
            scans: AtomicUsize::new(0),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_entry(mut self, path: impl Into<String>) -> Self {
        self.entries.push(path.into());
        self
    }

    /// Report entries as URLs under `prefix`, e.g. `bundle://7/`.
    pub fn with_entry_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.entry_prefix = Some(prefix.into());
        self
    }

    /// Make every `find_entries` call fail.
    pub fn failing_enumeration(mut self) -> Self {
        self.fail_enumeration = true;
        self
    }

    pub fn into_arc(self) -> Arc<dyn Module> {
        Arc::new(self)
    }

    /// Number of `find_entries` calls so far.
    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl Module for FakeModule {
    fn id(&self) -> ModuleId {
        self.id
    }

    fn symbolic_name(&self) -> &str {
        &self.name
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers.get(name).cloned()
    }

    fn find_entries(
        &self,
        dir: &str,
        pattern: &Pattern,
        recurse: bool,
    ) -> Result<Vec<String>, ModuleError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if self.fail_enumeration {
            return Err(ModuleError::Enumeration {
                module: self.name.clone(),
                dir: dir.to_string(),
                source: std::io::Error::other("enumeration refused"),
            });
        }

        let dir = dir.trim_matches('/');
        let found = self
            .entries
            .iter()
            .filter(|entry| {
                let (parent, file) = entry.rsplit_once('/').unwrap_or(("", entry.as_str()));
                let in_dir = if recurse {
                    parent == dir || parent.starts_with(&format!("{}/", dir))
                } else {
                    parent == dir
                };
                in_dir && pattern.matches(file)
            })
            .map(|entry| match &self.entry_prefix {
                Some(prefix) => format!("{}{}", prefix, entry),
                None => entry.clone(),
            })
            .collect();
        Ok(found)
    }
}
