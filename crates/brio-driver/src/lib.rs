//! Brio Driver
//!
//! Orchestrates a compile request through its stages (entry validation,
//! source patching, syntactic/option/semantic checks, emission), stopping
//! at the first stage that reports diagnostics. Also hosts the two adapters
//! built around the same checked-program representation: the language
//! service host for incremental tooling queries and the transpiler bridge
//! for the alternate surface syntax.

pub mod analyzer;
pub mod bridge;
pub mod pipeline;
pub mod service;

pub use analyzer::{Analyzer, PrecheckedAnalyzer};
pub use bridge::{Bridge, TranspileResult};
pub use pipeline::{compile, UpgradePolicy};
pub use service::{CompilationSettings, LanguageServiceHost, ScriptSnapshot};
