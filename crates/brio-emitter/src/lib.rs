//! Brio Code Emitter
//!
//! Lowers the checked AST into a register-based instruction stream and
//! serializes it for one of two targets: a portable bytecode image for the
//! interpreter, or 16-bit instruction words for the embedded CPU. Along the
//! way it performs frame and register allocation, boxes closure-captured
//! locals into counted cells, builds class and interface dispatch tables,
//! allocates enum constants, lowers `switch` and `try`/`catch`/`finally`
//! into branch and protected-region tables, erases generics, and inserts
//! the reference-count adjustments the runtime memory model requires,
//! then proves statically that those adjustments balance.

pub mod asm;
pub mod bytecode;
pub mod classes;
pub mod enums;
pub mod error;
pub mod frame;
pub mod ir;
mod lower;
pub mod rc;

mod emit;

pub use classes::{ClassLayout, ClassTable, FieldSlot, VtableSlot};
pub use emit::{EmitOutput, Emitter};
pub use enums::{allocate_enum_value, EnumTable};
pub use error::{EmitError, EmitResult};
pub use ir::{
    Builtin, Constant, ConstantPool, EmitUnit, EmittedFunction, FuncRef, Instr, Label, Loc,
    ProtectedRegion,
};
pub use lower::Lowering;
pub use rc::verify_balance;
