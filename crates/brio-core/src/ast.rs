//! Checked AST consumed by the code emitter
//!
//! This is the canonical program representation both frontends produce: the
//! primary surface parser and the alternate-syntax transpiler bridge. By the
//! time a program reaches the emitter it has passed binding and type
//! checking, so nodes carry resolved ids and declared types rather than raw
//! names wherever dispatch or ownership depends on them.

use crate::types::{BinOp, ClassId, EnumId, InterfaceId, Ty, UnOp};
use serde::{Deserialize, Serialize};

/// A sequence of statements.
pub type Block = Vec<Stmt>;

/// Root of the checked AST.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    /// Top-level functions; `FuncId` indexes this list.
    pub functions: Vec<FunctionDecl>,
    /// Class declarations; `ClassId` indexes this list.
    pub classes: Vec<ClassDecl>,
    /// Interface declarations; `InterfaceId` indexes this list.
    pub interfaces: Vec<InterfaceDecl>,
    /// Enum declarations; `EnumId` indexes this list.
    pub enums: Vec<EnumDecl>,
    /// Program-level variables.
    pub globals: Vec<GlobalDecl>,
}

impl Program {
    /// Look up a top-level function by name.
    pub fn function(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Look up a class declaration.
    pub fn class(&self, id: ClassId) -> Option<&ClassDecl> {
        self.classes.get(id.0 as usize)
    }

    /// Look up an interface declaration.
    pub fn interface(&self, id: InterfaceId) -> Option<&InterfaceDecl> {
        self.interfaces.get(id.0 as usize)
    }

    /// Look up an enum declaration.
    pub fn enum_decl(&self, id: EnumId) -> Option<&EnumDecl> {
        self.enums.get(id.0 as usize)
    }
}

/// Function parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
}

/// A top-level function or a method body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    /// Generic type parameters; erased at emission.
    pub type_params: Vec<String>,
    pub params: Vec<Param>,
    pub ret: Ty,
    pub body: Block,
}

impl FunctionDecl {
    /// Convenience constructor for a monomorphic function.
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Ty, body: Block) -> Self {
        Self {
            name: name.into(),
            type_params: Vec::new(),
            params,
            ret,
            body,
        }
    }
}

/// Field of a class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: Ty,
}

/// A class declaration (single inheritance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    pub parent: Option<ClassId>,
    pub implements: Vec<InterfaceId>,
    /// Fields introduced by this class (parent fields are not repeated).
    pub fields: Vec<FieldDecl>,
    /// Methods, including overrides of parent methods (matched by name).
    pub methods: Vec<FunctionDecl>,
    /// Optional constructor body; `this` is in scope.
    pub ctor: Option<FunctionDecl>,
}

/// Method signature inside an interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<Ty>,
    pub ret: Ty,
}

/// An interface declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDecl {
    pub name: String,
    pub methods: Vec<MethodSig>,
}

/// A member of an enum declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    /// Explicit value; members without one are allocated at emission.
    pub value: Option<i64>,
}

/// An enum declaration.
///
/// Enum values are compile-time integer constants; no enum object exists at
/// runtime. Bit-mask enums allocate successive powers of two, plain enums
/// successive integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub is_bitmask: bool,
    /// Explicit first value for plain enums.
    pub start: Option<i64>,
    pub members: Vec<EnumMember>,
}

/// A program-level variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: Ty,
    pub init: Option<Expr>,
}

/// A compile-time bitmap literal, row-major with one byte per pixel value.
/// The literal encoder packs it column-major into the image wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageLiteral {
    pub width: u16,
    pub height: u16,
    pub bpp: u8,
    pub pixels: Vec<u8>,
}

/// Assignment target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LValue {
    Local(String),
    Global(String),
    Field { obj: Expr, field: String },
    Index { array: Expr, index: Expr },
}

/// A `switch` case discriminant. Enum member references stay symbolic
/// because member values are allocated at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CaseValue {
    Int(i64),
    Enum(EnumId, u32),
}

/// One arm of a `switch`; `value: None` is the `default` arm. Arms preserve
/// source order, and an arm whose body does not end in `break`/`return`
/// falls through into the next arm's body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    pub value: Option<CaseValue>,
    pub body: Block,
}

/// `catch` clause of a `try`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchClause {
    /// Name binding the caught value.
    pub name: String,
    pub body: Block,
}

/// Statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    /// Local declaration with declared type.
    Let {
        name: String,
        ty: Ty,
        init: Option<Expr>,
    },
    /// Assignment to a local, global, field or element.
    Assign { target: LValue, value: Expr },
    /// Expression evaluated for effect; the value is discarded.
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    While { cond: Expr, body: Block },
    Break,
    Continue,
    Return(Option<Expr>),
    Switch {
        scrutinee: Expr,
        cases: Vec<SwitchCase>,
    },
    Try {
        body: Block,
        catch: Option<CatchClause>,
        finally: Option<Block>,
    },
    Throw(Expr),
    /// Schedule the block as a cooperative background fiber. Locals it
    /// references are captured by reference, like a lambda.
    Background(Block),
    Block(Block),
}

/// Expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Int(i32),
    Bool(bool),
    Str(String),
    Null,
    Image(ImageLiteral),
    /// Reference to a local or parameter of the enclosing (or an outer,
    /// captured) function.
    Local(String),
    Global(String),
    /// `this` inside a method or constructor.
    This,
    ArrayLit { elem_ty: Ty, elems: Vec<Expr> },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
    },
    Unary { op: UnOp, operand: Box<Expr> },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Direct call of a top-level function, with any generic arguments
    /// recorded for the checker; the emitter erases them.
    Call {
        func: String,
        type_args: Vec<Ty>,
        args: Vec<Expr>,
    },
    /// Call through a closure value.
    CallValue { callee: Box<Expr>, args: Vec<Expr> },
    /// Method call; direct or vtable or interface dispatch is decided from
    /// the receiver's static type at emission.
    MethodCall {
        recv: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    New { class: ClassId, args: Vec<Expr> },
    Field { obj: Box<Expr>, field: String },
    Lambda {
        params: Vec<Param>,
        ret: Ty,
        body: Block,
    },
    InstanceOf {
        expr: Box<Expr>,
        class: ClassId,
    },
    EnumRef { enum_id: EnumId, member: u32 },
    /// Checked cast; at emission a representation-preserving no-op.
    Cast { expr: Box<Expr>, ty: Ty },
}

impl Expr {
    /// Binary helper used heavily by frontends and tests.
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Local-reference helper.
    pub fn local(name: impl Into<String>) -> Expr {
        Expr::Local(name.into())
    }
}
