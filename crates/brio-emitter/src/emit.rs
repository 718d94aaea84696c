//! Emitter entry point
//!
//! Lowers a checked program, statically verifies the reference-count
//! balance of every body, and serializes through the backend the target
//! selects. Any failure aborts the whole compile; there is no partial
//! output.

use crate::asm;
use crate::bytecode;
use crate::error::{EmitError, EmitResult};
use crate::ir::EmitUnit;
use crate::lower::Lowering;
use crate::rc;
use brio_core::{CheckedProgram, OutFile, OutputKind, TargetInfo};
use serde::Serialize;
use std::collections::BTreeMap;

/// Files produced by one emitter pass.
#[derive(Debug)]
pub struct EmitOutput {
    pub outfiles: BTreeMap<String, OutFile>,
}

/// Per-function entry of the metadata listing shipped next to the image.
#[derive(Serialize)]
struct FunctionMeta {
    name: String,
    params: u16,
    frame_size: u16,
    regions: usize,
}

#[derive(Serialize)]
struct ImageMeta {
    target: String,
    entry: u32,
    functions: Vec<FunctionMeta>,
    classes: Vec<String>,
    constants: usize,
    globals: u16,
}

/// The code emitter.
pub struct Emitter;

impl Emitter {
    /// Lower and verify a checked program without serializing it. The
    /// returned unit is what the backends and the test interpreter consume.
    pub fn compile_unit(checked: &CheckedProgram, target: &TargetInfo) -> EmitResult<EmitUnit> {
        let unit = Lowering::lower_program(&checked.program, target)?;
        for func in &unit.functions {
            rc::verify_balance(func)?;
        }
        Ok(unit)
    }

    /// Full emission: lowering, verification, backend serialization and the
    /// metadata listing.
    pub fn emit(checked: &CheckedProgram, target: &TargetInfo) -> EmitResult<EmitOutput> {
        let unit = Self::compile_unit(checked, target)?;
        let mut outfiles = BTreeMap::new();

        match target.output {
            OutputKind::Bytecode => {
                let image = bytecode::encode_module(&unit)?;
                outfiles.insert("binary.brio".to_string(), OutFile::Binary(image));
            }
            OutputKind::Native => {
                let image = asm::assemble(&unit, target)?;
                outfiles.insert(
                    "binary.hex".to_string(),
                    OutFile::Text(asm::hex_dump(&image)),
                );
                outfiles.insert("binary.bin".to_string(), OutFile::Binary(image));
            }
        }

        let meta = ImageMeta {
            target: target.name.clone(),
            entry: unit.entry,
            functions: unit
                .functions
                .iter()
                .map(|f| FunctionMeta {
                    name: f.name.clone(),
                    params: f.param_count,
                    frame_size: f.frame_size,
                    regions: f.regions.len(),
                })
                .collect(),
            classes: unit.classes.iter().map(|c| c.name.clone()).collect(),
            constants: unit.constants.len(),
            globals: unit.global_count,
        };
        let listing = serde_json::to_string_pretty(&meta)
            .map_err(|e| EmitError::internal(format!("metadata serialization failed: {}", e)))?;
        outfiles.insert("metadata.json".to_string(), OutFile::Text(listing));

        Ok(EmitOutput { outfiles })
    }
}
