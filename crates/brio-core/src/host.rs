//! File-system abstraction consumed by the driver

use std::collections::BTreeMap;

/// Read-only view of the compile-time file system.
pub trait Host {
    /// Does `path` exist?
    fn exists(&self, path: &str) -> bool;
    /// Read the full text of `path`, if present.
    fn read(&self, path: &str) -> Option<String>;
}

/// In-memory host backed by a path → text map.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    files: BTreeMap<String, String>,
}

impl MemoryHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&mut self, path: impl Into<String>, text: impl Into<String>) {
        self.files.insert(path.into(), text.into());
    }
}

impl From<BTreeMap<String, String>> for MemoryHost {
    fn from(files: BTreeMap<String, String>) -> Self {
        Self { files }
    }
}

impl Host for MemoryHost {
    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    fn read(&self, path: &str) -> Option<String> {
        self.files.get(path).cloned()
    }
}
