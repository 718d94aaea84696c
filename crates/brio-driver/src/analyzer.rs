//! Frontend collaborator seam
//!
//! Parsing and type checking are supplied by a resolution service behind
//! this trait; the driver only sequences its stages and consumes the
//! checked program it produces.

use brio_core::{CheckedProgram, Diagnostic};

/// A frontend over one set of (already patched) sources.
///
/// Each method reports the diagnostics of one pipeline stage. The driver
/// calls them in order and stops at the first non-empty answer, so an
/// implementation may assume earlier stages were clean when a later one
/// runs.
pub trait Analyzer {
    /// Stage 1: malformed source text.
    fn syntactic_diagnostics(&self) -> Vec<Diagnostic>;
    /// Stage 2: invalid compile options and settings.
    fn option_diagnostics(&self) -> Vec<Diagnostic>;
    /// Stage 3: binding and type errors.
    fn semantic_diagnostics(&self) -> Vec<Diagnostic>;
    /// The checked program, meaningful only after the three stages pass.
    fn checked_program(&self) -> &CheckedProgram;
}

/// An analyzer over a program that already passed every check, the common
/// case when a host embeds the backend behind its own frontend.
pub struct PrecheckedAnalyzer {
    program: CheckedProgram,
}

impl PrecheckedAnalyzer {
    pub fn new(program: CheckedProgram) -> Self {
        Self { program }
    }
}

impl Analyzer for PrecheckedAnalyzer {
    fn syntactic_diagnostics(&self) -> Vec<Diagnostic> {
        Vec::new()
    }

    fn option_diagnostics(&self) -> Vec<Diagnostic> {
        Vec::new()
    }

    fn semantic_diagnostics(&self) -> Vec<Diagnostic> {
        Vec::new()
    }

    fn checked_program(&self) -> &CheckedProgram {
        &self.program
    }
}
