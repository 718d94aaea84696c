//! The compile pipeline
//!
//! Stage order: entry-file validation, source patching, syntactic check,
//! option check, semantic check, emission. The first stage to produce one
//! or more diagnostics stops the pipeline and returns `success = false`
//! with exactly those diagnostics; later stages never run, so a semantic
//! error can never be masked by a coincidental emission error and vice
//! versa. The driver always returns a complete [`EmittedImage`]; callers
//! must check `success` before touching `outfiles`.

use crate::analyzer::Analyzer;
use brio_core::{CompileRequest, Diagnostic, EmittedImage};
use brio_emitter::{EmitError, Emitter};
use brio_patch::{PatchRule, PatchSet};
use semver::Version;
use std::collections::BTreeMap;

/// Diagnostic codes the driver itself issues.
mod codes {
    pub const FILE_NOT_FOUND: u32 = 9001;
    pub const BAD_PATCH_RULES: u32 = 9002;
    pub const ENCODING: u32 = 9100;
    pub const INTERNAL: u32 = 9199;
}

/// How to upgrade sources written against an older API before parsing.
pub struct UpgradePolicy {
    /// Version of the tool the program was last saved with.
    pub source_version: Version,
    pub rules: Vec<PatchRule>,
}

/// Run a compile request through the full pipeline. `frontend` builds the
/// collaborator analyzer from the patched sources.
pub fn compile<A, F>(
    request: &CompileRequest,
    upgrade: Option<&UpgradePolicy>,
    frontend: F,
) -> EmittedImage
where
    A: Analyzer,
    F: FnOnce(&BTreeMap<String, String>) -> A,
{
    // Entry files must exist in the request's file system; a missing one is
    // a program-global diagnostic, not a crash.
    let missing: Vec<Diagnostic> = request
        .entry_files
        .iter()
        .filter(|path| !request.file_system.contains_key(*path))
        .map(|path| {
            Diagnostic::global(codes::FILE_NOT_FOUND, format!("file not found: {}", path))
        })
        .collect();
    if !missing.is_empty() {
        return EmittedImage::failure(missing);
    }

    let sources = match upgrade {
        Some(policy) => {
            let patches = match PatchSet::compile(&policy.rules) {
                Ok(p) => p,
                Err(e) => {
                    return EmittedImage::failure(vec![Diagnostic::global(
                        codes::BAD_PATCH_RULES,
                        e.to_string(),
                    )])
                }
            };
            request
                .file_system
                .iter()
                .map(|(path, text)| {
                    (path.clone(), patches.apply(&policy.source_version, text))
                })
                .collect()
        }
        None => request.file_system.clone(),
    };

    let analyzer = frontend(&sources);

    let syntactic = analyzer.syntactic_diagnostics();
    if !syntactic.is_empty() {
        return EmittedImage::failure(syntactic);
    }
    let option = analyzer.option_diagnostics();
    if !option.is_empty() {
        return EmittedImage::failure(option);
    }
    let semantic = analyzer.semantic_diagnostics();
    if !semantic.is_empty() {
        return EmittedImage::failure(semantic);
    }

    match Emitter::emit(analyzer.checked_program(), &request.target) {
        Ok(output) => EmittedImage {
            outfiles: output.outfiles,
            diagnostics: Vec::new(),
            success: true,
        },
        Err(err) => {
            let code = match err {
                EmitError::Encoding { .. } => codes::ENCODING,
                EmitError::Internal { .. } => codes::INTERNAL,
                _ => codes::INTERNAL,
            };
            EmittedImage::failure(vec![Diagnostic::global(code, err.to_string())])
        }
    }
}
