//! Compile request and result types

use crate::ast::Program;
use crate::diagnostic::Diagnostic;
use crate::symbols::SymbolTable;
use crate::target::TargetInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One source file of a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
}

/// Everything a single `compile()` call needs.
///
/// Every path in `entry_files` must exist as a key of `file_system`; a
/// missing entry is reported as a global diagnostic, never a panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    /// Path → source text.
    pub file_system: BTreeMap<String, String>,
    /// Ordered compilation roots.
    pub entry_files: Vec<String>,
    /// Hardware/ABI descriptor, opaque outside the emitter.
    pub target: TargetInfo,
}

impl CompileRequest {
    /// Request with a single entry file.
    pub fn single(path: impl Into<String>, text: impl Into<String>, target: TargetInfo) -> Self {
        let path = path.into();
        let mut file_system = BTreeMap::new();
        file_system.insert(path.clone(), text.into());
        Self {
            file_system,
            entry_files: vec![path],
            target,
        }
    }
}

/// The product of parsing and type checking: source files, their text, and
/// the symbol table, plus the typed AST the emitter lowers. Immutable once
/// produced; one emitter pass consumes it per compile request, or the
/// language service retains it for incremental queries.
#[derive(Debug, Clone, Default)]
pub struct CheckedProgram {
    pub files: Vec<SourceFile>,
    pub symbols: SymbolTable,
    pub program: Program,
}

impl CheckedProgram {
    /// Full text of a file, if it is part of the program.
    pub fn file_text(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == path)
            .map(|f| f.text.as_str())
    }
}

/// One produced output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutFile {
    Text(String),
    Binary(Vec<u8>),
}

impl OutFile {
    /// Byte length of the payload.
    pub fn len(&self) -> usize {
        match self {
            OutFile::Text(s) => s.len(),
            OutFile::Binary(b) => b.len(),
        }
    }

    /// Is the payload empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a compile request. `success` is true iff `diagnostics` is
/// empty and emission ran to completion; callers must check it before
/// touching `outfiles`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmittedImage {
    /// Logical name → payload.
    pub outfiles: BTreeMap<String, OutFile>,
    pub diagnostics: Vec<Diagnostic>,
    pub success: bool,
}

impl EmittedImage {
    /// A failed compile carrying the given diagnostics.
    pub fn failure(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            outfiles: BTreeMap::new(),
            diagnostics,
            success: false,
        }
    }
}
