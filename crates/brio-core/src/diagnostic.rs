//! Diagnostic wire format
//!
//! Diagnostics accumulate per compile stage; the presence of any diagnostic
//! at a stage is fatal to the pipeline. The serialized shape is consumed
//! opaquely by editor tooling for inline display.

use serde::{Deserialize, Serialize};

/// Which compile stage produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticCategory {
    /// Malformed source text (stage 1).
    Syntactic,
    /// Invalid compile options or settings (stage 2).
    Option,
    /// Type or binding error (stage 3).
    Semantic,
    /// Program-global condition, e.g. a missing entry file.
    Global,
}

/// A single compiler diagnostic.
///
/// When `file` is `None` the diagnostic applies to the whole program rather
/// than a source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Source file path, if location-bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Zero-based line.
    pub line: u32,
    /// Zero-based column.
    pub character: u32,
    /// Producing stage.
    pub category: DiagnosticCategory,
    /// Stable numeric code.
    pub code: u32,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Create a location-bound diagnostic.
    pub fn at(
        file: impl Into<String>,
        line: u32,
        character: u32,
        category: DiagnosticCategory,
        code: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: Some(file.into()),
            line,
            character,
            category,
            code,
            message: message.into(),
        }
    }

    /// Create a program-global diagnostic.
    pub fn global(code: u32, message: impl Into<String>) -> Self {
        Self {
            file: None,
            line: 0,
            character: 0,
            category: DiagnosticCategory::Global,
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(
                f,
                "{}({},{}): BR{:04}: {}",
                file, self.line, self.character, self.code, self.message
            ),
            None => write!(f, "BR{:04}: {}", self.code, self.message),
        }
    }
}
