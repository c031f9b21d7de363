//! Exploded module directory on the local filesystem.

use super::{Module, ModuleError, ModuleId, Pattern};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

/// A module backed by a directory tree, with headers read from
/// `META-INF/MANIFEST.MF` or supplied directly.
#[derive(Debug, Clone)]
pub struct DirectoryModule {
    id: ModuleId,
    symbolic_name: String,
    root: PathBuf,
    headers: HashMap<String, String>,
}

impl DirectoryModule {
    pub fn new(id: ModuleId, symbolic_name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id,
            symbolic_name: symbolic_name.into(),
            root: root.into(),
            headers: HashMap::new(),
        }
    }

    /// Open a module directory and load its manifest headers.
    ///
    /// A missing manifest yields a module without headers. The symbolic name
    /// comes from `Bundle-SymbolicName` when present, else the directory name.
    pub fn open(id: ModuleId, root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        let manifest = root.join(MANIFEST_PATH);
        let headers = match std::fs::read_to_string(&manifest) {
            Ok(text) => parse_manifest(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };

        let symbolic_name = headers
            .get("Bundle-SymbolicName")
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .or_else(|| {
                root.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| format!("module-{}", id.0));

        tracing::debug!(
            module = %symbolic_name,
            root = %root.display(),
            headers = headers.len(),
            "Opened module directory"
        );

        Ok(Self {
            id,
            symbolic_name,
            root,
            headers,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collect(
        &self,
        rel_dir: &str,
        pattern: &Pattern,
        recurse: bool,
        out: &mut Vec<String>,
    ) -> std::io::Result<()> {
        let dir = self.root.join(rel_dir);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if rel_dir.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel_dir.trim_end_matches('/'), name)
            };

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if recurse {
                    self.collect(&rel, pattern, recurse, out)?;
                }
            } else if pattern.matches(&name) {
                out.push(rel);
            }
        }
        Ok(())
    }
}

impl Module for DirectoryModule {
    fn id(&self) -> ModuleId {
        self.id
    }

    fn symbolic_name(&self) -> &str {
        &self.symbolic_name
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
        let mut out = Vec::new();
        self.collect(dir.trim_matches('/'), pattern, recurse, &mut out)
            .map_err(|source| ModuleError::Enumeration {
                module: self.symbolic_name.clone(),
                dir: dir.to_string(),
                source,
            })?;
        Ok(out)
    }
}

/// Parse `Name: value` manifest lines. Lines starting with a single space
/// continue the previous value.
fn parse_manifest(text: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.lines() {
        if let Some(cont) = line.strip_prefix(' ') {
            if let Some((_, value)) = current.as_mut() {
                value.push_str(cont);
            }
            continue;
        }
        if let Some((name, value)) = current.take() {
            headers.insert(name, value);
        }
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.trim().to_string(), value.trim_start().to_string()));
        }
    }
    if let Some((name, value)) = current {
        headers.insert(name, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xml() -> Pattern {
        Pattern::new("*.xml").unwrap()
    }

    #[test]
    fn test_parse_manifest_with_continuation() {
        let headers = parse_manifest(
            "Manifest-Version: 1.0\nBundle-Blueprint: a.xml,\n b.xml\nBundle-SymbolicName: demo\n",
        );
        assert_eq!(headers.get("Bundle-Blueprint").unwrap(), "a.xml,b.xml");
        assert_eq!(headers.get("Bundle-SymbolicName").unwrap(), "demo");
    }

    #[test]
    fn test_find_entries_non_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let bp = dir.path().join("OSGI-INF/blueprint");
        std::fs::create_dir_all(bp.join("nested")).unwrap();
        std::fs::write(bp.join("context.xml"), "<blueprint/>").unwrap();
        std::fs::write(bp.join("notes.txt"), "").unwrap();
        std::fs::write(bp.join("nested/inner.xml"), "<blueprint/>").unwrap();

        let module = DirectoryModule::new(ModuleId(1), "demo", dir.path());
        let flat = module
            .find_entries("OSGI-INF/blueprint", &xml(), false)
            .unwrap();
        assert_eq!(flat, vec!["OSGI-INF/blueprint/context.xml".to_string()]);

        let mut deep = module
            .find_entries("OSGI-INF/blueprint", &xml(), true)
            .unwrap();
        deep.sort();
        assert_eq!(
            deep,
            vec![
                "OSGI-INF/blueprint/context.xml".to_string(),
                "OSGI-INF/blueprint/nested/inner.xml".to_string(),
            ]
        );
    }

    #[test]
    fn test_find_entries_with_character_class() {
        let dir = tempfile::tempdir().unwrap();
        let bp = dir.path().join("OSGI-INF/blueprint");
        std::fs::create_dir_all(&bp).unwrap();
        for name in ["a.xml", "b.xml", "c.xml"] {
            std::fs::write(bp.join(name), "<blueprint/>").unwrap();
        }

        let module = DirectoryModule::new(ModuleId(4), "classes", dir.path());
        let mut found = module
            .find_entries("OSGI-INF/blueprint", &Pattern::new("[ab].xml").unwrap(), false)
            .unwrap();
        found.sort();
        assert_eq!(
            found,
            vec![
                "OSGI-INF/blueprint/a.xml".to_string(),
                "OSGI-INF/blueprint/b.xml".to_string(),
            ]
        );
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let module = DirectoryModule::new(ModuleId(2), "empty", dir.path());
        assert!(module
            .find_entries("OSGI-INF/blueprint", &xml(), false)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_open_reads_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("META-INF")).unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_PATH),
            "Bundle-SymbolicName: container-basic;singleton:=true\nBundle-Blueprint: ctx.xml\n",
        )
        .unwrap();

        let module = DirectoryModule::open(ModuleId(3), dir.path()).unwrap();
        assert_eq!(module.symbolic_name(), "container-basic");
        assert_eq!(module.header("Bundle-Blueprint").as_deref(), Some("ctx.xml"));
    }
}
