//! Target descriptor
//!
//! Hardware descriptions ship as JSON alongside a board package; every
//! component except the emitter treats the descriptor as opaque.

use serde::{Deserialize, Serialize};

/// Which backend the emitter runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// 16-bit instruction words for the embedded CPU.
    Native,
    /// Portable register-based bytecode image.
    Bytecode,
}

/// Description of the compilation target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetInfo {
    /// Board or VM name, e.g. `"brio-mk1"`.
    pub name: String,
    /// Backend selection.
    pub output: OutputKind,
    /// General-purpose registers available for locals.
    pub register_count: u8,
    /// Calling convention: how many leading arguments travel in registers.
    pub arg_regs: u8,
    /// Word size in bytes.
    pub word_size: u8,
    /// Load address of the code section on the native target.
    pub code_base: u32,
}

impl TargetInfo {
    /// The portable interpreter target.
    pub fn bytecode() -> Self {
        Self {
            name: "brio-vm".into(),
            output: OutputKind::Bytecode,
            register_count: 8,
            arg_regs: 4,
            word_size: 4,
            code_base: 0,
        }
    }

    /// The reference 16-bit embedded board.
    pub fn native16() -> Self {
        Self {
            name: "brio-mk1".into(),
            output: OutputKind::Native,
            register_count: 6,
            arg_regs: 4,
            word_size: 2,
            code_base: 0x4000,
        }
    }
}
