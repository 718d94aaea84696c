//! Portable bytecode backend
//!
//! Serializes an [`EmitUnit`] into the interpreter's container format:
//! a `BRIO` magic, format version and CRC32, followed by the constant pool,
//! function bodies with their frame descriptions and protected-region
//! tables, and the class layouts. All integers are little-endian; labels
//! are resolved to byte offsets within each function's code by patching.

use crate::error::{EmitError, EmitResult};
use crate::ir::{Builtin, Constant, EmitUnit, EmittedFunction, FuncRef, Instr, Label, Loc};
use brio_core::{BinOp, OwnerKind, UnOp};
use rustc_hash::FxHashMap;
use thiserror::Error;

/// Magic number of a Brio bytecode image.
pub const MAGIC: [u8; 4] = *b"BRIO";

/// Current container version.
pub const VERSION: u32 = 2;

/// Builtin references live above this bound in the function index space.
const BUILTIN_BASE: u32 = 0xffff_ff00;

/// Container decoding errors.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("unexpected end of image at offset {0}")]
    UnexpectedEnd(usize),

    #[error("invalid magic number {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported version {0} (current: {VERSION})")]
    UnsupportedVersion(u32),

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),
}

/// Bytecode opcodes.
///
/// Operand layouts are noted per variant; a location operand is one kind
/// byte (0 register, 1 frame slot, 2 capture cell) plus a u16 index.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// loc, u32 tagged word
    LoadTagged = 0x01,
    /// loc, u16 pool index
    LoadConst = 0x02,
    /// dst loc, src loc
    Move = 0x03,

    /// u8 op, dst, lhs, rhs
    Bin = 0x10,
    /// u8 op, dst, src
    Un = 0x11,

    /// i32 offset
    Jump = 0x20,
    /// cond loc, u8 if_true, i32 offset
    JumpIf = 0x21,
    /// loc, i32 base, i32 default, u16 count, count * i32 offsets
    JumpTable = 0x22,

    /// u32 func, u8 flags, [dst loc], u8 argc, argc * loc
    Call = 0x30,
    /// recv loc, u16 slot, u8 flags, [dst], u8 argc, args
    CallVirtual = 0x31,
    /// recv loc, u16 member, u8 flags, [dst], u8 argc, args
    CallInterface = 0x32,
    /// closure loc, u8 flags, [dst], u8 argc, args
    CallClosure = 0x33,
    /// u8 has_src, [src loc]
    Ret = 0x34,

    /// dst, u32 class
    New = 0x40,
    /// dst, obj, u16 offset
    LoadField = 0x41,
    /// obj, u16 offset, src
    StoreField = 0x42,
    /// dst, src, u32 class
    InstanceOf = 0x43,

    /// dst, u16 len
    NewArray = 0x50,
    /// dst, array, index
    LoadElem = 0x51,
    /// array, index, src
    StoreElem = 0x52,

    /// dst, u16 index
    LoadGlobal = 0x58,
    /// u16 index, src
    StoreGlobal = 0x59,

    /// dst
    NewCell = 0x60,
    /// dst, cell
    LoadCell = 0x61,
    /// cell, src
    StoreCell = 0x62,
    /// dst, u32 func, u8 count, count * loc
    MakeClosure = 0x63,
    /// closure
    Spawn = 0x64,

    /// loc, u8 owner kind
    Incr = 0x70,
    /// loc, u8 owner kind
    Decr = 0x71,

    /// src
    Throw = 0x78,
}

/// Little-endian byte sink with offset patching, used by both backends.
pub struct BytecodeWriter {
    buffer: Vec<u8>,
}

impl BytecodeWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Length-prefixed UTF-8 string.
    pub fn emit_string(&mut self, s: &str) {
        self.emit_u32(s.len() as u32);
        self.emit_bytes(s.as_bytes());
    }

    /// Reserve space for an i32 patched once the target is known.
    pub fn reserve_i32(&mut self) -> usize {
        let offset = self.offset();
        self.emit_i32(0);
        offset
    }

    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for BytecodeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Little-endian reader over an encoded image.
pub struct BytecodeReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BytecodeReader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ModuleError> {
        if self.position + count > self.buffer.len() {
            return Err(ModuleError::UnexpectedEnd(self.position));
        }
        let slice = &self.buffer[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ModuleError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ModuleError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, ModuleError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, ModuleError> {
        Ok(self.take(count)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, ModuleError> {
        let len = self.read_u32()? as usize;
        let start = self.position;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ModuleError::InvalidUtf8(start))
    }
}

/// A decoded function record.
#[derive(Debug, Clone)]
pub struct BcFunction {
    pub name: String,
    pub param_count: u16,
    pub reg_count: u8,
    pub frame_size: u16,
    pub temp_base: u16,
    pub capture_count: u16,
    pub exc_slot: Option<u16>,
    pub code: Vec<u8>,
    /// (start, end, handler) byte offsets.
    pub regions: Vec<(u32, u32, u32)>,
}

/// A decoded class record.
#[derive(Debug, Clone)]
pub struct BcClass {
    pub name: String,
    pub parent: Option<u32>,
    /// Per-field: does the slot hold a counted value?
    pub field_heap: Vec<bool>,
    pub vtable: Vec<u32>,
    pub itable: Vec<(u16, u16)>,
    pub ctor: Option<u32>,
}

/// A decoded bytecode image.
#[derive(Debug, Clone)]
pub struct Module {
    pub version: u32,
    pub constants: Vec<Constant>,
    pub global_count: u16,
    pub entry: u32,
    pub functions: Vec<BcFunction>,
    pub classes: Vec<BcClass>,
}

fn loc_kind(loc: Loc) -> (u8, u16) {
    match loc {
        Loc::Reg(r) => (0, r as u16),
        Loc::Frame(s) => (1, s),
        Loc::Captured(c) => (2, c),
    }
}

fn emit_loc(w: &mut BytecodeWriter, loc: Loc) {
    let (kind, index) = loc_kind(loc);
    w.emit_u8(kind);
    w.emit_u16(index);
}

fn func_ref_code(func: FuncRef) -> u32 {
    match func {
        FuncRef::Index(i) => i,
        FuncRef::Builtin(b) => BUILTIN_BASE + builtin_code(b) as u32,
    }
}

fn builtin_code(b: Builtin) -> u8 {
    match b {
        Builtin::StringConcat => 0,
        Builtin::StringEquals => 1,
        Builtin::FiberYield => 2,
    }
}

fn bin_code(op: BinOp) -> u8 {
    op as u8
}

fn un_code(op: UnOp) -> u8 {
    op as u8
}

fn owner_code(why: OwnerKind) -> u8 {
    match why {
        OwnerKind::Local => 0,
        OwnerKind::Param => 1,
        OwnerKind::Field => 2,
        OwnerKind::Cell => 3,
        OwnerKind::Global => 4,
        OwnerKind::Temp => 5,
    }
}

/// Flag byte for call-family instructions.
fn call_flags(dst: Option<Loc>, counted_result: bool) -> u8 {
    let mut flags = 0;
    if dst.is_some() {
        flags |= 1;
    }
    if counted_result {
        flags |= 2;
    }
    flags
}

fn emit_call_tail(w: &mut BytecodeWriter, dst: Option<Loc>, args: &[Loc]) {
    if let Some(dst) = dst {
        emit_loc(w, dst);
    }
    w.emit_u8(args.len() as u8);
    for &arg in args {
        emit_loc(w, arg);
    }
}

/// Encode one function body, resolving labels to byte offsets.
pub fn encode_function(func: &EmittedFunction) -> EmitResult<(Vec<u8>, Vec<(u32, u32, u32)>)> {
    let mut w = BytecodeWriter::new();
    let mut label_offsets: FxHashMap<Label, u32> = FxHashMap::default();
    let mut fixups: Vec<(usize, Label)> = Vec::new();

    for instr in &func.code {
        match instr {
            Instr::Label(label) => {
                label_offsets.insert(*label, w.offset() as u32);
            }
            Instr::LoadTagged { dst, word } => {
                w.emit_u8(Opcode::LoadTagged as u8);
                emit_loc(&mut w, *dst);
                w.emit_u32(*word);
            }
            Instr::LoadConst { dst, index } => {
                w.emit_u8(Opcode::LoadConst as u8);
                emit_loc(&mut w, *dst);
                w.emit_u16(*index);
            }
            Instr::Move { dst, src } => {
                w.emit_u8(Opcode::Move as u8);
                emit_loc(&mut w, *dst);
                emit_loc(&mut w, *src);
            }
            Instr::Bin { op, dst, lhs, rhs } => {
                w.emit_u8(Opcode::Bin as u8);
                w.emit_u8(bin_code(*op));
                emit_loc(&mut w, *dst);
                emit_loc(&mut w, *lhs);
                emit_loc(&mut w, *rhs);
            }
            Instr::Un { op, dst, src } => {
                w.emit_u8(Opcode::Un as u8);
                w.emit_u8(un_code(*op));
                emit_loc(&mut w, *dst);
                emit_loc(&mut w, *src);
            }
            Instr::Jump { target } => {
                w.emit_u8(Opcode::Jump as u8);
                fixups.push((w.reserve_i32(), *target));
            }
            Instr::JumpIf {
                cond,
                if_true,
                target,
            } => {
                w.emit_u8(Opcode::JumpIf as u8);
                emit_loc(&mut w, *cond);
                w.emit_u8(*if_true as u8);
                fixups.push((w.reserve_i32(), *target));
            }
            Instr::JumpTable {
                scrutinee,
                base,
                targets,
                default,
            } => {
                w.emit_u8(Opcode::JumpTable as u8);
                emit_loc(&mut w, *scrutinee);
                w.emit_i32(*base);
                fixups.push((w.reserve_i32(), *default));
                w.emit_u16(targets.len() as u16);
                for target in targets {
                    fixups.push((w.reserve_i32(), *target));
                }
            }
            Instr::Call {
                dst,
                func,
                args,
                counted_result,
            } => {
                w.emit_u8(Opcode::Call as u8);
                w.emit_u32(func_ref_code(*func));
                w.emit_u8(call_flags(*dst, *counted_result));
                emit_call_tail(&mut w, *dst, args);
            }
            Instr::CallVirtual {
                dst,
                recv,
                slot,
                args,
                counted_result,
            } => {
                w.emit_u8(Opcode::CallVirtual as u8);
                emit_loc(&mut w, *recv);
                w.emit_u16(*slot);
                w.emit_u8(call_flags(*dst, *counted_result));
                emit_call_tail(&mut w, *dst, args);
            }
            Instr::CallInterface {
                dst,
                recv,
                member,
                args,
                counted_result,
            } => {
                w.emit_u8(Opcode::CallInterface as u8);
                emit_loc(&mut w, *recv);
                w.emit_u16(*member);
                w.emit_u8(call_flags(*dst, *counted_result));
                emit_call_tail(&mut w, *dst, args);
            }
            Instr::CallClosure {
                dst,
                closure,
                args,
                counted_result,
            } => {
                w.emit_u8(Opcode::CallClosure as u8);
                emit_loc(&mut w, *closure);
                w.emit_u8(call_flags(*dst, *counted_result));
                emit_call_tail(&mut w, *dst, args);
            }
            Instr::Ret { src } => {
                w.emit_u8(Opcode::Ret as u8);
                w.emit_u8(src.is_some() as u8);
                if let Some(src) = src {
                    emit_loc(&mut w, *src);
                }
            }
            Instr::New { dst, class } => {
                w.emit_u8(Opcode::New as u8);
                emit_loc(&mut w, *dst);
                w.emit_u32(class.0);
            }
            Instr::LoadField { dst, obj, offset } => {
                w.emit_u8(Opcode::LoadField as u8);
                emit_loc(&mut w, *dst);
                emit_loc(&mut w, *obj);
                w.emit_u16(*offset);
            }
            Instr::StoreField { obj, offset, src } => {
                w.emit_u8(Opcode::StoreField as u8);
                emit_loc(&mut w, *obj);
                w.emit_u16(*offset);
                emit_loc(&mut w, *src);
            }
            Instr::InstanceOf { dst, src, class } => {
                w.emit_u8(Opcode::InstanceOf as u8);
                emit_loc(&mut w, *dst);
                emit_loc(&mut w, *src);
                w.emit_u32(class.0);
            }
            Instr::NewArray { dst, len } => {
                w.emit_u8(Opcode::NewArray as u8);
                emit_loc(&mut w, *dst);
                w.emit_u16(*len);
            }
            Instr::LoadElem { dst, array, index } => {
                w.emit_u8(Opcode::LoadElem as u8);
                emit_loc(&mut w, *dst);
                emit_loc(&mut w, *array);
                emit_loc(&mut w, *index);
            }
            Instr::StoreElem { array, index, src } => {
                w.emit_u8(Opcode::StoreElem as u8);
                emit_loc(&mut w, *array);
                emit_loc(&mut w, *index);
                emit_loc(&mut w, *src);
            }
            Instr::LoadGlobal { dst, index } => {
                w.emit_u8(Opcode::LoadGlobal as u8);
                emit_loc(&mut w, *dst);
                w.emit_u16(*index);
            }
            Instr::StoreGlobal { index, src } => {
                w.emit_u8(Opcode::StoreGlobal as u8);
                w.emit_u16(*index);
                emit_loc(&mut w, *src);
            }
            Instr::NewCell { dst } => {
                w.emit_u8(Opcode::NewCell as u8);
                emit_loc(&mut w, *dst);
            }
            Instr::LoadCell { dst, cell } => {
                w.emit_u8(Opcode::LoadCell as u8);
                emit_loc(&mut w, *dst);
                emit_loc(&mut w, *cell);
            }
            Instr::StoreCell { cell, src } => {
                w.emit_u8(Opcode::StoreCell as u8);
                emit_loc(&mut w, *cell);
                emit_loc(&mut w, *src);
            }
            Instr::MakeClosure { dst, func, cells } => {
                w.emit_u8(Opcode::MakeClosure as u8);
                emit_loc(&mut w, *dst);
                w.emit_u32(func_ref_code(*func));
                w.emit_u8(cells.len() as u8);
                for &cell in cells {
                    emit_loc(&mut w, cell);
                }
            }
            Instr::Spawn { closure } => {
                w.emit_u8(Opcode::Spawn as u8);
                emit_loc(&mut w, *closure);
            }
            Instr::Incr { loc, why } => {
                w.emit_u8(Opcode::Incr as u8);
                emit_loc(&mut w, *loc);
                w.emit_u8(owner_code(*why));
            }
            Instr::Decr { loc, why } => {
                w.emit_u8(Opcode::Decr as u8);
                emit_loc(&mut w, *loc);
                w.emit_u8(owner_code(*why));
            }
            Instr::Throw { src } => {
                w.emit_u8(Opcode::Throw as u8);
                emit_loc(&mut w, *src);
            }
        }
    }

    for (offset, label) in fixups {
        let target = label_offsets.get(&label).ok_or_else(|| {
            EmitError::internal(format!("unbound label {} in {}", label, func.name))
        })?;
        w.patch_i32(offset, *target as i32);
    }

    let mut regions = Vec::with_capacity(func.regions.len());
    for region in &func.regions {
        let resolve = |label: Label| {
            label_offsets.get(&label).copied().ok_or_else(|| {
                EmitError::internal(format!("unbound region label {} in {}", label, func.name))
            })
        };
        regions.push((
            resolve(region.start)?,
            resolve(region.end)?,
            resolve(region.handler)?,
        ));
    }

    Ok((w.into_bytes(), regions))
}

/// Encode a whole unit into the container format.
pub fn encode_module(unit: &EmitUnit) -> EmitResult<Vec<u8>> {
    let mut body = BytecodeWriter::new();

    body.emit_u16(unit.constants.len() as u16);
    for constant in unit.constants.iter() {
        match constant {
            Constant::Str(s) => {
                body.emit_u8(0);
                body.emit_string(s);
            }
            Constant::Image(bytes) => {
                body.emit_u8(1);
                body.emit_u32(bytes.len() as u32);
                body.emit_bytes(bytes);
            }
        }
    }

    body.emit_u16(unit.global_count);
    body.emit_u32(unit.entry);

    body.emit_u32(unit.functions.len() as u32);
    for func in &unit.functions {
        let (code, regions) = encode_function(func)?;
        body.emit_string(&func.name);
        body.emit_u16(func.param_count);
        body.emit_u8(func.reg_count);
        body.emit_u16(func.frame_size);
        body.emit_u16(func.temp_base);
        body.emit_u16(func.capture_count);
        body.emit_u8(func.exc_slot.is_some() as u8);
        body.emit_u16(func.exc_slot.unwrap_or(0));
        body.emit_u32(code.len() as u32);
        body.emit_bytes(&code);
        body.emit_u16(regions.len() as u16);
        for (start, end, handler) in regions {
            body.emit_u32(start);
            body.emit_u32(end);
            body.emit_u32(handler);
        }
    }

    body.emit_u16(unit.classes.len() as u16);
    for class in &unit.classes {
        body.emit_string(&class.name);
        body.emit_u8(class.parent.is_some() as u8);
        body.emit_u32(class.parent.map(|p| p.0).unwrap_or(0));
        body.emit_u16(class.fields.len() as u16);
        for field in &class.fields {
            body.emit_u8(field.ty.is_heap() as u8);
        }
        body.emit_u16(class.vtable.len() as u16);
        for slot in &class.vtable {
            body.emit_u32(func_ref_code(slot.func));
        }
        body.emit_u16(class.itable.len() as u16);
        for (member, slot) in &class.itable {
            body.emit_u16(*member);
            body.emit_u16(*slot);
        }
        body.emit_u8(class.ctor.is_some() as u8);
        body.emit_u32(class.ctor.map(func_ref_code).unwrap_or(0));
    }

    let payload = body.into_bytes();
    let mut w = BytecodeWriter::new();
    w.emit_bytes(&MAGIC);
    w.emit_u32(VERSION);
    w.emit_u32(crc32fast::hash(&payload));
    w.emit_bytes(&payload);
    Ok(w.into_bytes())
}

/// Decode and verify a container. Inverse of [`encode_module`].
pub fn decode_module(bytes: &[u8]) -> Result<Module, ModuleError> {
    let mut r = BytecodeReader::new(bytes);
    let magic = r.read_bytes(4)?;
    if magic != MAGIC {
        return Err(ModuleError::InvalidMagic([
            magic[0], magic[1], magic[2], magic[3],
        ]));
    }
    let version = r.read_u32()?;
    if version != VERSION {
        return Err(ModuleError::UnsupportedVersion(version));
    }
    let expected = r.read_u32()?;
    let actual = crc32fast::hash(&bytes[r.position()..]);
    if expected != actual {
        return Err(ModuleError::ChecksumMismatch { expected, actual });
    }

    let constant_count = r.read_u16()?;
    let mut constants = Vec::with_capacity(constant_count as usize);
    for _ in 0..constant_count {
        let tag = r.read_u8()?;
        match tag {
            0 => constants.push(Constant::Str(r.read_string()?)),
            _ => {
                let len = r.read_u32()? as usize;
                constants.push(Constant::Image(r.read_bytes(len)?));
            }
        }
    }

    let global_count = r.read_u16()?;
    let entry = r.read_u32()?;

    let function_count = r.read_u32()?;
    let mut functions = Vec::with_capacity(function_count as usize);
    for _ in 0..function_count {
        let name = r.read_string()?;
        let param_count = r.read_u16()?;
        let reg_count = r.read_u8()?;
        let frame_size = r.read_u16()?;
        let temp_base = r.read_u16()?;
        let capture_count = r.read_u16()?;
        let has_exc = r.read_u8()? != 0;
        let exc_slot_raw = r.read_u16()?;
        let code_len = r.read_u32()? as usize;
        let code = r.read_bytes(code_len)?;
        let region_count = r.read_u16()?;
        let mut regions = Vec::with_capacity(region_count as usize);
        for _ in 0..region_count {
            regions.push((r.read_u32()?, r.read_u32()?, r.read_u32()?));
        }
        functions.push(BcFunction {
            name,
            param_count,
            reg_count,
            frame_size,
            temp_base,
            capture_count,
            exc_slot: has_exc.then_some(exc_slot_raw),
            code,
            regions,
        });
    }

    let class_count = r.read_u16()?;
    let mut classes = Vec::with_capacity(class_count as usize);
    for _ in 0..class_count {
        let name = r.read_string()?;
        let has_parent = r.read_u8()? != 0;
        let parent_raw = r.read_u32()?;
        let field_count = r.read_u16()?;
        let mut field_heap = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            field_heap.push(r.read_u8()? != 0);
        }
        let vtable_count = r.read_u16()?;
        let mut vtable = Vec::with_capacity(vtable_count as usize);
        for _ in 0..vtable_count {
            vtable.push(r.read_u32()?);
        }
        let itable_count = r.read_u16()?;
        let mut itable = Vec::with_capacity(itable_count as usize);
        for _ in 0..itable_count {
            itable.push((r.read_u16()?, r.read_u16()?));
        }
        let has_ctor = r.read_u8()? != 0;
        let ctor_raw = r.read_u32()?;
        classes.push(BcClass {
            name,
            parent: has_parent.then_some(parent_raw),
            field_heap,
            vtable,
            itable,
            ctor: has_ctor.then_some(ctor_raw),
        });
    }

    Ok(Module {
        version,
        constants,
        global_count,
        entry,
        functions,
        classes,
    })
}
