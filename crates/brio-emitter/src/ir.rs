//! Emitter instruction stream
//!
//! Lowering produces one [`EmittedFunction`] per function body (top-level
//! functions, methods, constructors, lambdas, background fibers). The stream
//! is register-based with symbolic labels; protected regions and jump tables
//! live in side tables referencing labels. Backends resolve labels to byte
//! offsets: the portable bytecode writer by patching, the native assembler
//! by two-pass sizing.

use crate::error::{EmitError, EmitResult};
use brio_core::{BinOp, ClassId, OwnerKind, UnOp};
use rustc_hash::FxHashMap;

/// Symbolic jump target, resolved by the backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Storage location of a value inside a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Loc {
    /// Machine register.
    Reg(u8),
    /// Slot in the function's fixed-size frame.
    Frame(u16),
    /// The i-th capture cell of the running closure record.
    Captured(u16),
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Loc::Reg(i) => write!(f, "r{}", i),
            Loc::Frame(i) => write!(f, "s{}", i),
            Loc::Captured(i) => write!(f, "c{}", i),
        }
    }
}

/// Reference to a callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncRef {
    /// Index into [`EmitUnit::functions`].
    Index(u32),
    /// Runtime-provided helper.
    Builtin(Builtin),
}

/// Runtime helpers the emitter may call directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// Concatenate two strings into a fresh string.
    StringConcat,
    /// Structural string equality.
    StringEquals,
    /// Yield the current fiber to the cooperative scheduler.
    FiberYield,
}

/// One protected region of a function: a `try` body span and its handler.
/// On a throw inside `[start, end)` control transfers to `handler` with the
/// thrown value stored in the function's exception slot.
#[derive(Debug, Clone, Copy)]
pub struct ProtectedRegion {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
}

/// Instructions. `Label` is a pseudo-instruction occupying no code space.
#[derive(Debug, Clone)]
pub enum Instr {
    /// Position marker for jumps and region boundaries.
    Label(Label),

    /// Load a pre-encoded tagged constant word (int, bool, null).
    LoadTagged { dst: Loc, word: u32 },
    /// Load a constant-pool entry (string or packed image). The pool owns
    /// the value; the loaded reference is borrowed.
    LoadConst { dst: Loc, index: u16 },
    /// Copy a value. Ownership, if any, moves with it.
    Move { dst: Loc, src: Loc },

    /// Arithmetic, comparison and bitwise operations on immediates.
    Bin { op: BinOp, dst: Loc, lhs: Loc, rhs: Loc },
    Un { op: UnOp, dst: Loc, src: Loc },

    Jump { target: Label },
    JumpIf { cond: Loc, if_true: bool, target: Label },
    /// Dense dispatch: jump to `targets[scrutinee - base]`, or `default`
    /// when out of range.
    JumpTable {
        scrutinee: Loc,
        base: i32,
        targets: Vec<Label>,
        default: Label,
    },

    /// Direct call. Arguments transfer ownership to the callee's
    /// parameters; `counted_result` records whether the returned value
    /// carries an ownership the caller must release.
    Call {
        dst: Option<Loc>,
        func: FuncRef,
        args: Vec<Loc>,
        counted_result: bool,
    },
    /// Indirect call through the receiver's vtable slot. The receiver is
    /// passed as the callee's `this` parameter and transfers like an
    /// argument.
    CallVirtual {
        dst: Option<Loc>,
        recv: Loc,
        slot: u16,
        args: Vec<Loc>,
        counted_result: bool,
    },
    /// Indirect call through the receiver class's interface table.
    CallInterface {
        dst: Option<Loc>,
        recv: Loc,
        member: u16,
        args: Vec<Loc>,
        counted_result: bool,
    },
    /// Call through a closure record. The record itself is borrowed for the
    /// call; only the arguments transfer.
    CallClosure {
        dst: Option<Loc>,
        closure: Loc,
        args: Vec<Loc>,
        counted_result: bool,
    },
    /// Return, transferring ownership of `src` to the caller.
    Ret { src: Option<Loc> },

    /// Allocate an instance with null-initialized fields. The result is
    /// owned by `dst`.
    New { dst: Loc, class: ClassId },
    /// Borrowed field read.
    LoadField { dst: Loc, obj: Loc, offset: u16 },
    /// Store into a field, transferring ownership of `src` to the object.
    StoreField { obj: Loc, offset: u16, src: Loc },
    /// Parent-chain walk; false for any non-instance operand.
    InstanceOf { dst: Loc, src: Loc, class: ClassId },

    /// Allocate an array of nulls. Owned by `dst`.
    NewArray { dst: Loc, len: u16 },
    /// Borrowed element read.
    LoadElem { dst: Loc, array: Loc, index: Loc },
    /// Store an element, transferring ownership of `src` to the array.
    StoreElem { array: Loc, index: Loc, src: Loc },

    /// Borrowed global read.
    LoadGlobal { dst: Loc, index: u16 },
    /// Store a global, transferring ownership of `src` to the global table.
    StoreGlobal { index: u16, src: Loc },

    /// Allocate a capture cell holding null. Owned by `dst`.
    NewCell { dst: Loc },
    /// Borrowed read of a cell's content.
    LoadCell { dst: Loc, cell: Loc },
    /// Store into a cell, transferring ownership of `src` to the cell.
    StoreCell { cell: Loc, src: Loc },
    /// Build a closure record over `func` and the given cells. The record
    /// is owned by `dst`; each captured cell's count is raised separately
    /// (with `OwnerKind::Cell`) before this instruction.
    MakeClosure {
        dst: Loc,
        func: FuncRef,
        cells: Vec<Loc>,
    },
    /// Schedule a closure record as a cooperative fiber; the run-queue
    /// takes ownership of the record and releases it when the fiber
    /// completes or is cancelled.
    Spawn { closure: Loc },

    /// Raise the ownership count of the value at `loc`.
    Incr { loc: Loc, why: OwnerKind },
    /// Lower the ownership count of the value at `loc`; no-op on null or
    /// immediate words.
    Decr { loc: Loc, why: OwnerKind },

    /// Throw, transferring ownership of `src` to the unwinder.
    Throw { src: Loc },
}

/// A lowered function body.
#[derive(Debug, Clone)]
pub struct EmittedFunction {
    pub name: String,
    /// Number of leading parameter slots.
    pub param_count: u16,
    /// Registers used.
    pub reg_count: u8,
    /// Frame slots used (parameters included).
    pub frame_size: u16,
    /// First frame slot used for expression temporaries; everything below
    /// is a named local or a control slot and survives the whole function.
    pub temp_base: u16,
    /// Capture cells expected from the closure record (0 for plain calls).
    pub capture_count: u16,
    /// Frame slot the unwinder stores a caught exception into, when the
    /// function has any protected region.
    pub exc_slot: Option<u16>,
    pub code: Vec<Instr>,
    pub regions: Vec<ProtectedRegion>,
}

impl EmittedFunction {
    /// Map each label to the index of its pseudo-instruction.
    pub fn label_positions(&self) -> EmitResult<FxHashMap<Label, usize>> {
        let mut positions = FxHashMap::default();
        for (i, instr) in self.code.iter().enumerate() {
            if let Instr::Label(label) = instr {
                if positions.insert(*label, i).is_some() {
                    return Err(EmitError::internal(format!(
                        "label {} bound twice in {}",
                        label, self.name
                    )));
                }
            }
        }
        Ok(positions)
    }
}

/// A constant-pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Str(String),
    /// A packed bitmap in the image wire format.
    Image(Vec<u8>),
}

/// Interning constant pool shared by all functions of a unit.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    strings: FxHashMap<String, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its pool index.
    pub fn add_string(&mut self, s: &str) -> EmitResult<u16> {
        if let Some(&index) = self.strings.get(s) {
            return Ok(index);
        }
        let index = self.push(Constant::Str(s.to_string()))?;
        self.strings.insert(s.to_string(), index);
        Ok(index)
    }

    /// Add an encoded image payload.
    pub fn add_image(&mut self, bytes: Vec<u8>) -> EmitResult<u16> {
        self.push(Constant::Image(bytes))
    }

    fn push(&mut self, constant: Constant) -> EmitResult<u16> {
        if self.entries.len() >= u16::MAX as usize {
            return Err(EmitError::TooManyConstants);
        }
        let index = self.entries.len() as u16;
        self.entries.push(constant);
        Ok(index)
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.entries.iter()
    }
}

/// Everything lowering produces for one program; input to both backends and
/// to the balance verifier.
#[derive(Debug, Clone)]
pub struct EmitUnit {
    pub functions: Vec<EmittedFunction>,
    pub classes: Vec<crate::classes::ClassLayout>,
    pub constants: ConstantPool,
    pub global_count: u16,
    /// Index of `main`.
    pub entry: u32,
}
