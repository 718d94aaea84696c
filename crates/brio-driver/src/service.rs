//! Language service host
//!
//! A stateless re-projection of a fixed checked program for incremental
//! tooling queries. The host does not track edits itself: every snapshot
//! reports the literal full text with no change range. Standard-library
//! lookup is disabled because the embedded target ships its own
//! declarations.

use brio_core::CheckedProgram;

/// One file's text as the tooling sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptSnapshot {
    pub text: String,
    pub length: usize,
    /// Always `None`: the host never reports incremental edits.
    pub change_range: Option<(usize, usize)>,
}

/// Settings the tooling layer queries.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilationSettings {
    /// The embedded target supplies its own declarations.
    pub no_lib: bool,
    pub target_name: String,
}

/// Read-only tooling adapter over a [`CheckedProgram`].
pub struct LanguageServiceHost {
    program: CheckedProgram,
    target_name: String,
}

impl LanguageServiceHost {
    pub fn new(program: CheckedProgram, target_name: impl Into<String>) -> Self {
        Self {
            program,
            target_name: target_name.into(),
        }
    }

    /// Paths of every file in the program, in program order.
    pub fn script_file_names(&self) -> Vec<String> {
        self.program.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Full-text snapshot of one file.
    pub fn script_snapshot(&self, file: &str) -> Option<ScriptSnapshot> {
        self.program.file_text(file).map(|text| ScriptSnapshot {
            text: text.to_string(),
            length: text.len(),
            change_range: None,
        })
    }

    pub fn compilation_settings(&self) -> CompilationSettings {
        CompilationSettings {
            no_lib: true,
            target_name: self.target_name.clone(),
        }
    }

    /// The underlying program, for callers chaining into the emitter.
    pub fn program(&self) -> &CheckedProgram {
        &self.program
    }
}
