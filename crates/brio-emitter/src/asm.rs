//! Native backend: two-pass assembly into 16-bit instruction words
//!
//! The embedded CPU executes 16-bit instruction words; wide operands occupy
//! following words. Pass 1 sizes every instruction with branches in their
//! short form (signed 8-bit word offset packed into the instruction) and
//! records label offsets. Pass 2 re-checks every branch against the now
//! known offsets and escalates out-of-range branches to the long form (an
//! extra offset word), iterating to a fixed point; escalation only grows
//! instructions, so the iteration count is bounded by the branch count. An
//! operand that does not fit even the long form is an encoding error: the
//! compile aborts rather than truncate.

use crate::bytecode::BytecodeWriter;
use crate::error::{EmitError, EmitResult};
use crate::ir::{Builtin, Constant, EmitUnit, EmittedFunction, FuncRef, Instr, Label, Loc};
use brio_core::{OwnerKind, TargetInfo};
use rustc_hash::FxHashMap;

/// First word of a native image.
pub const IMAGE_MAGIC: u16 = 0xb216;

/// Native image format version.
pub const IMAGE_VERSION: u16 = 1;

/// Function indices at or above this encode runtime builtins.
const BUILTIN_BASE: u16 = 0xff00;

/// Native opcodes (high byte of the first instruction word; the low byte
/// carries a small immediate: branch displacement, argument count, operator
/// or flags).
mod op {
    pub const LDI: u8 = 0x01;
    pub const LDC: u8 = 0x02;
    pub const MOV: u8 = 0x03;
    pub const BIN: u8 = 0x10;
    pub const UN: u8 = 0x11;
    pub const JMP_S: u8 = 0x20;
    pub const JMP_L: u8 = 0x21;
    pub const JT_S: u8 = 0x22;
    pub const JT_L: u8 = 0x23;
    pub const JF_S: u8 = 0x24;
    pub const JF_L: u8 = 0x25;
    pub const JTAB: u8 = 0x26;
    pub const CALL: u8 = 0x30;
    pub const CALLV: u8 = 0x31;
    pub const CALLI: u8 = 0x32;
    pub const CALLC: u8 = 0x33;
    pub const RET: u8 = 0x34;
    pub const NEWOBJ: u8 = 0x40;
    pub const LDF: u8 = 0x41;
    pub const STF: u8 = 0x42;
    pub const ISA: u8 = 0x43;
    pub const NEWARR: u8 = 0x50;
    pub const LDE: u8 = 0x51;
    pub const STE: u8 = 0x52;
    pub const LDG: u8 = 0x58;
    pub const STG: u8 = 0x59;
    pub const NEWCELL: u8 = 0x60;
    pub const LDCELL: u8 = 0x61;
    pub const STCELL: u8 = 0x62;
    pub const MKCLO: u8 = 0x63;
    pub const SPAWN: u8 = 0x64;
    pub const INCR: u8 = 0x70;
    pub const DECR: u8 = 0x71;
    pub const THROW: u8 = 0x78;
}

fn word(opcode: u8, aux: u8) -> u16 {
    ((opcode as u16) << 8) | aux as u16
}

/// Operand word for a location: 2-bit kind, 14-bit index.
fn loc_word(loc: Loc) -> EmitResult<u16> {
    let (kind, index) = match loc {
        Loc::Reg(r) => (0u16, r as u16),
        Loc::Frame(s) => (1, s),
        Loc::Captured(c) => (2, c),
    };
    if index >= 1 << 14 {
        return Err(EmitError::encoding(format!(
            "frame slot {} exceeds the 14-bit operand range",
            index
        )));
    }
    Ok((kind << 14) | index)
}

fn func_word(func: FuncRef) -> EmitResult<u16> {
    match func {
        FuncRef::Index(i) => {
            if i >= BUILTIN_BASE as u32 {
                return Err(EmitError::encoding(format!(
                    "function index {} exceeds the native call range",
                    i
                )));
            }
            Ok(i as u16)
        }
        FuncRef::Builtin(b) => Ok(BUILTIN_BASE
            + match b {
                Builtin::StringConcat => 0,
                Builtin::StringEquals => 1,
                Builtin::FiberYield => 2,
            }),
    }
}

fn owner_aux(why: OwnerKind) -> u8 {
    match why {
        OwnerKind::Local => 0,
        OwnerKind::Param => 1,
        OwnerKind::Field => 2,
        OwnerKind::Cell => 3,
        OwnerKind::Global => 4,
        OwnerKind::Temp => 5,
    }
}

fn call_flags(dst: Option<Loc>, counted: bool) -> u8 {
    (dst.is_some() as u8) | ((counted as u8) << 1)
}

/// One assembly item: fixed words, a branch that may still grow, a jump
/// table, or a label marker.
enum Item {
    Fixed(Vec<u16>),
    Branch {
        /// (short opcode, long opcode)
        forms: (u8, u8),
        cond: Option<u16>,
        target: Label,
        long: bool,
    },
    Table {
        scrutinee: u16,
        base: i32,
        default: Label,
        targets: Vec<Label>,
    },
    Mark(Label),
}

impl Item {
    fn size(&self) -> usize {
        match self {
            Item::Fixed(words) => words.len(),
            Item::Branch { cond, long, .. } => {
                1 + cond.is_some() as usize + *long as usize
            }
            Item::Table { targets, .. } => 4 + targets.len(),
            Item::Mark(_) => 0,
        }
    }
}

/// Encode one function into instruction words, resolving branches to their
/// final short or long form.
pub fn encode_function_words(func: &EmittedFunction) -> EmitResult<Vec<u16>> {
    encode_function_with_labels(func).map(|(words, _)| words)
}

/// As [`encode_function_words`], also returning each label's final word
/// offset (protected-region tables are keyed on them).
fn encode_function_with_labels(
    func: &EmittedFunction,
) -> EmitResult<(Vec<u16>, FxHashMap<Label, usize>)> {
    let mut items = Vec::with_capacity(func.code.len());
    for instr in &func.code {
        items.push(lower_item(instr)?);
    }

    // Fixed-point sizing: escalate until every short branch reaches.
    let mut label_at: FxHashMap<Label, usize> = FxHashMap::default();
    size_to_fixed_point(&mut items, func, &mut label_at)?;

    // Final emission with range checks.
    let mut words = Vec::new();
    let mut offset = 0usize;
    for item in &items {
        let size = item.size();
        match item {
            Item::Fixed(w) => words.extend_from_slice(w),
            Item::Branch {
                forms,
                cond,
                target,
                long,
            } => {
                let dest = label_at[target] as isize;
                let rel = dest - (offset + size) as isize;
                if *long {
                    if !(-32768..=32767).contains(&rel) {
                        return Err(EmitError::encoding(format!(
                            "branch displacement {} words exceeds the long form in {}",
                            rel, func.name
                        )));
                    }
                    words.push(word(forms.1, 0));
                    if let Some(cond) = cond {
                        words.push(*cond);
                    }
                    words.push(rel as i16 as u16);
                } else {
                    words.push(word(forms.0, rel as i8 as u8));
                    if let Some(cond) = cond {
                        words.push(*cond);
                    }
                }
            }
            Item::Table {
                scrutinee,
                base,
                default,
                targets,
            } => {
                if !(-32768..=32767).contains(base) {
                    return Err(EmitError::encoding(format!(
                        "jump table base {} exceeds 16 bits in {}",
                        base, func.name
                    )));
                }
                words.push(word(op::JTAB, targets.len() as u8));
                words.push(*scrutinee);
                words.push(*base as i16 as u16);
                words.push(table_entry(&label_at, *default, func)?);
                for target in targets {
                    words.push(table_entry(&label_at, *target, func)?);
                }
            }
            Item::Mark(_) => {}
        }
        offset += size;
    }
    Ok((words, label_at))
}

fn table_entry(
    label_at: &FxHashMap<Label, usize>,
    label: Label,
    func: &EmittedFunction,
) -> EmitResult<u16> {
    let dest = *label_at
        .get(&label)
        .ok_or_else(|| EmitError::internal(format!("unbound label {} in {}", label, func.name)))?;
    if dest > u16::MAX as usize {
        return Err(EmitError::encoding(format!(
            "jump table target {} exceeds the addressable range in {}",
            dest, func.name
        )));
    }
    Ok(dest as u16)
}

fn lower_item(instr: &Instr) -> EmitResult<Item> {
    let item = match instr {
        Instr::Label(label) => Item::Mark(*label),
        Instr::LoadTagged { dst, word: imm } => Item::Fixed(vec![
            word(op::LDI, 0),
            loc_word(*dst)?,
            (*imm & 0xffff) as u16,
            (*imm >> 16) as u16,
        ]),
        Instr::LoadConst { dst, index } => {
            Item::Fixed(vec![word(op::LDC, 0), loc_word(*dst)?, *index])
        }
        Instr::Move { dst, src } => {
            Item::Fixed(vec![word(op::MOV, 0), loc_word(*dst)?, loc_word(*src)?])
        }
        Instr::Bin { op: b, dst, lhs, rhs } => Item::Fixed(vec![
            word(op::BIN, *b as u8),
            loc_word(*dst)?,
            loc_word(*lhs)?,
            loc_word(*rhs)?,
        ]),
        Instr::Un { op: u, dst, src } => Item::Fixed(vec![
            word(op::UN, *u as u8),
            loc_word(*dst)?,
            loc_word(*src)?,
        ]),
        Instr::Jump { target } => Item::Branch {
            forms: (op::JMP_S, op::JMP_L),
            cond: None,
            target: *target,
            long: false,
        },
        Instr::JumpIf {
            cond,
            if_true,
            target,
        } => Item::Branch {
            forms: if *if_true {
                (op::JT_S, op::JT_L)
            } else {
                (op::JF_S, op::JF_L)
            },
            cond: Some(loc_word(*cond)?),
            target: *target,
            long: false,
        },
        Instr::JumpTable {
            scrutinee,
            base,
            targets,
            default,
        } => Item::Table {
            scrutinee: loc_word(*scrutinee)?,
            base: *base,
            default: *default,
            targets: targets.clone(),
        },
        Instr::Call {
            dst,
            func,
            args,
            counted_result,
        } => {
            let mut words = vec![
                word(op::CALL, args.len() as u8),
                func_word(*func)?,
                word(call_flags(*dst, *counted_result), 0),
            ];
            push_call_tail(&mut words, *dst, args)?;
            Item::Fixed(words)
        }
        Instr::CallVirtual {
            dst,
            recv,
            slot,
            args,
            counted_result,
        } => {
            let mut words = vec![
                word(op::CALLV, args.len() as u8),
                loc_word(*recv)?,
                *slot,
                word(call_flags(*dst, *counted_result), 0),
            ];
            push_call_tail(&mut words, *dst, args)?;
            Item::Fixed(words)
        }
        Instr::CallInterface {
            dst,
            recv,
            member,
            args,
            counted_result,
        } => {
            let mut words = vec![
                word(op::CALLI, args.len() as u8),
                loc_word(*recv)?,
                *member,
                word(call_flags(*dst, *counted_result), 0),
            ];
            push_call_tail(&mut words, *dst, args)?;
            Item::Fixed(words)
        }
        Instr::CallClosure {
            dst,
            closure,
            args,
            counted_result,
        } => {
            let mut words = vec![
                word(op::CALLC, args.len() as u8),
                loc_word(*closure)?,
                word(call_flags(*dst, *counted_result), 0),
            ];
            push_call_tail(&mut words, *dst, args)?;
            Item::Fixed(words)
        }
        Instr::Ret { src } => {
            let mut words = vec![word(op::RET, src.is_some() as u8)];
            if let Some(src) = src {
                words.push(loc_word(*src)?);
            }
            Item::Fixed(words)
        }
        Instr::New { dst, class } => Item::Fixed(vec![
            word(op::NEWOBJ, 0),
            loc_word(*dst)?,
            class_word(class.0)?,
        ]),
        Instr::LoadField { dst, obj, offset } => Item::Fixed(vec![
            word(op::LDF, 0),
            loc_word(*dst)?,
            loc_word(*obj)?,
            *offset,
        ]),
        Instr::StoreField { obj, offset, src } => Item::Fixed(vec![
            word(op::STF, 0),
            loc_word(*obj)?,
            *offset,
            loc_word(*src)?,
        ]),
        Instr::InstanceOf { dst, src, class } => Item::Fixed(vec![
            word(op::ISA, 0),
            loc_word(*dst)?,
            loc_word(*src)?,
            class_word(class.0)?,
        ]),
        Instr::NewArray { dst, len } => {
            Item::Fixed(vec![word(op::NEWARR, 0), loc_word(*dst)?, *len])
        }
        Instr::LoadElem { dst, array, index } => Item::Fixed(vec![
            word(op::LDE, 0),
            loc_word(*dst)?,
            loc_word(*array)?,
            loc_word(*index)?,
        ]),
        Instr::StoreElem { array, index, src } => Item::Fixed(vec![
            word(op::STE, 0),
            loc_word(*array)?,
            loc_word(*index)?,
            loc_word(*src)?,
        ]),
        Instr::LoadGlobal { dst, index } => {
            Item::Fixed(vec![word(op::LDG, 0), loc_word(*dst)?, *index])
        }
        Instr::StoreGlobal { index, src } => {
            Item::Fixed(vec![word(op::STG, 0), *index, loc_word(*src)?])
        }
        Instr::NewCell { dst } => Item::Fixed(vec![word(op::NEWCELL, 0), loc_word(*dst)?]),
        Instr::LoadCell { dst, cell } => Item::Fixed(vec![
            word(op::LDCELL, 0),
            loc_word(*dst)?,
            loc_word(*cell)?,
        ]),
        Instr::StoreCell { cell, src } => Item::Fixed(vec![
            word(op::STCELL, 0),
            loc_word(*cell)?,
            loc_word(*src)?,
        ]),
        Instr::MakeClosure { dst, func, cells } => {
            let mut words = vec![
                word(op::MKCLO, cells.len() as u8),
                loc_word(*dst)?,
                func_word(*func)?,
            ];
            for &cell in cells {
                words.push(loc_word(cell)?);
            }
            Item::Fixed(words)
        }
        Instr::Spawn { closure } => Item::Fixed(vec![word(op::SPAWN, 0), loc_word(*closure)?]),
        Instr::Incr { loc, why } => {
            Item::Fixed(vec![word(op::INCR, owner_aux(*why)), loc_word(*loc)?])
        }
        Instr::Decr { loc, why } => {
            Item::Fixed(vec![word(op::DECR, owner_aux(*why)), loc_word(*loc)?])
        }
        Instr::Throw { src } => Item::Fixed(vec![word(op::THROW, 0), loc_word(*src)?]),
    };
    Ok(item)
}

fn class_word(id: u32) -> EmitResult<u16> {
    u16::try_from(id)
        .map_err(|_| EmitError::encoding(format!("class id {} exceeds the native range", id)))
}

fn push_call_tail(words: &mut Vec<u16>, dst: Option<Loc>, args: &[Loc]) -> EmitResult<()> {
    if let Some(dst) = dst {
        words.push(loc_word(dst)?);
    }
    for &arg in args {
        words.push(loc_word(arg)?);
    }
    Ok(())
}

/// Assemble a unit into the loadable native image.
pub fn assemble(unit: &EmitUnit, target: &TargetInfo) -> EmitResult<Vec<u8>> {
    let mut codes = Vec::with_capacity(unit.functions.len());
    let mut labels = Vec::with_capacity(unit.functions.len());
    for func in &unit.functions {
        let (words, label_at) = encode_function_with_labels(func)?;
        codes.push(words);
        labels.push(label_at);
    }

    let mut w = BytecodeWriter::new();
    w.emit_u16(IMAGE_MAGIC);
    w.emit_u16(IMAGE_VERSION);
    w.emit_u32(target.code_base);
    w.emit_u16(unit.entry as u16);
    w.emit_u16(unit.functions.len() as u16);
    w.emit_u16(unit.global_count);
    w.emit_u16(unit.constants.len() as u16);

    // Function table: code offsets plus the frame description the loader
    // needs to build activation records and unwind them.
    let mut code_offset = 0u32;
    for ((func, code), label_at) in unit.functions.iter().zip(&codes).zip(&labels) {
        w.emit_u32(code_offset);
        w.emit_u32(code.len() as u32);
        w.emit_u16(func.param_count);
        w.emit_u8(func.reg_count);
        w.emit_u8(0);
        w.emit_u16(func.frame_size);
        w.emit_u16(func.temp_base);
        w.emit_u16(func.capture_count);
        w.emit_u16(func.exc_slot.unwrap_or(u16::MAX));
        let resolved = resolve_regions(func, label_at)?;
        w.emit_u16(resolved.len() as u16);
        for (start, end, handler) in resolved {
            w.emit_u16(start);
            w.emit_u16(end);
            w.emit_u16(handler);
        }
        code_offset += code.len() as u32;
    }

    for code in &codes {
        for &word in code {
            w.emit_u16(word);
        }
    }

    for constant in unit.constants.iter() {
        match constant {
            Constant::Str(s) => {
                w.emit_u8(0);
                w.emit_string(s);
            }
            Constant::Image(bytes) => {
                w.emit_u8(1);
                w.emit_u32(bytes.len() as u32);
                w.emit_bytes(bytes);
            }
        }
    }

    Ok(w.into_bytes())
}

/// Word offsets of a function's protected regions within its encoded code.
fn resolve_regions(
    func: &EmittedFunction,
    label_at: &FxHashMap<Label, usize>,
) -> EmitResult<Vec<(u16, u16, u16)>> {
    let mut out = Vec::with_capacity(func.regions.len());
    for region in &func.regions {
        let get = |label: Label| -> EmitResult<u16> {
            let at = *label_at.get(&label).ok_or_else(|| {
                EmitError::internal(format!("unbound region label {} in {}", label, func.name))
            })?;
            u16::try_from(at).map_err(|_| {
                EmitError::encoding(format!(
                    "region offset {} exceeds the addressable range in {}",
                    at, func.name
                ))
            })
        };
        out.push((get(region.start)?, get(region.end)?, get(region.handler)?));
    }
    Ok(out)
}

fn size_to_fixed_point(
    items: &mut [Item],
    func: &EmittedFunction,
    label_at: &mut FxHashMap<Label, usize>,
) -> EmitResult<()> {
    loop {
        label_at.clear();
        let mut offset = 0usize;
        for item in items.iter() {
            if let Item::Mark(label) = item {
                label_at.insert(*label, offset);
            }
            offset += item.size();
        }
        let mut changed = false;
        let mut offset = 0usize;
        for item in items.iter_mut() {
            let size = item.size();
            if let Item::Branch {
                target, long: long @ false, ..
            } = item
            {
                let dest = *label_at.get(target).ok_or_else(|| {
                    EmitError::internal(format!("unbound label {} in {}", target, func.name))
                })? as isize;
                let rel = dest - (offset + size) as isize;
                if !(-128..=127).contains(&rel) {
                    *long = true;
                    changed = true;
                }
            }
            offset += size;
        }
        if !changed {
            return Ok(());
        }
    }
}

/// Render bytes as the classic address-prefixed hex listing shipped next to
/// the raw image.
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3 + bytes.len() / 16 * 8);
    for (i, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:06x}:", i * 16));
        for byte in chunk {
            out.push_str(&format!(" {:02x}", byte));
        }
        out.push('\n');
    }
    out
}
