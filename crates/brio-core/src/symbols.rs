//! Symbol-table contract supplied by the type checker
//!
//! The resolution service hands the backend one record per declaration:
//! name, kind, parameter list, and free-form attributes (for example the
//! `shim` attribute naming the runtime function a declaration lowers to).

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Kind of a declared symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Enum,
    Variable,
    Field,
}

/// Parameter record inside a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamInfo {
    pub name: String,
    /// Display form of the declared type.
    pub ty: String,
}

/// One declaration as reported by the resolution service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub kind: SymbolKind,
    pub parameters: Vec<ParamInfo>,
    /// Free-form attributes attached to the declaration.
    #[serde(default)]
    pub attributes: FxHashMap<String, String>,
}

impl SymbolInfo {
    /// Create a symbol with no parameters or attributes.
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Self {
            name: name.into(),
            kind,
            parameters: Vec::new(),
            attributes: FxHashMap::default(),
        }
    }

    /// Attribute lookup.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// All symbols of a checked program, keyed by qualified name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: FxHashMap<String, SymbolInfo>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a symbol, replacing any previous entry of the same name.
    pub fn insert(&mut self, symbol: SymbolInfo) {
        self.symbols.insert(symbol.name.clone(), symbol);
    }

    /// Look up a symbol by qualified name.
    pub fn get(&self, name: &str) -> Option<&SymbolInfo> {
        self.symbols.get(name)
    }

    /// Number of declarations.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
