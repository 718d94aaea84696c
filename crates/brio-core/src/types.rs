//! Type representation for the checked AST

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a class declaration (index into `Program::classes`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class{}", self.0)
    }
}

/// Identifier of an interface declaration (index into `Program::interfaces`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iface{}", self.0)
    }
}

/// Identifier of an enum declaration (index into `Program::enums`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumId(pub u32);

impl fmt::Display for EnumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enum{}", self.0)
    }
}

/// Identifier of a top-level function (index into `Program::functions`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

/// Static type of a checked expression.
///
/// Generic type parameters appear as [`Ty::TypeParam`] in declaration bodies
/// and erase to [`Ty::Any`] during emission; `Any` is the single uniform
/// heap-reference representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// 32-bit integer arithmetic type.
    Number,
    /// Boolean.
    Bool,
    /// Immutable heap string.
    String,
    /// No value (function returns only).
    Void,
    /// The null type.
    Null,
    /// Uniform heap reference; the erased representation of type parameters.
    Any,
    /// Growable heap array.
    Array(Box<Ty>),
    /// Instance of a class.
    Class(ClassId),
    /// Instance typed through an interface.
    Interface(InterfaceId),
    /// Enum value; a plain number at runtime.
    Enum(EnumId),
    /// Closure value.
    Function,
    /// Packed bitmap literal.
    Image,
    /// Unerased generic type parameter.
    TypeParam(String),
}

impl Ty {
    /// Does a value of this type carry an ownership count at runtime?
    ///
    /// Numbers, booleans, null and enum values flow as immediate tagged
    /// words; everything else lives on the heap.
    pub fn is_heap(&self) -> bool {
        match self {
            Ty::Number | Ty::Bool | Ty::Void | Ty::Null | Ty::Enum(_) => false,
            Ty::String
            | Ty::Any
            | Ty::Array(_)
            | Ty::Class(_)
            | Ty::Interface(_)
            | Ty::Function
            | Ty::Image => true,
            // Unerased parameters must be treated as heap references: the
            // single generic representation is the counted `Any` word.
            Ty::TypeParam(_) => true,
        }
    }

    /// Erase generic type parameters to the uniform representation.
    pub fn erased(&self) -> Ty {
        match self {
            Ty::TypeParam(_) => Ty::Any,
            Ty::Array(inner) => Ty::Array(Box::new(inner.erased())),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Number => write!(f, "number"),
            Ty::Bool => write!(f, "boolean"),
            Ty::String => write!(f, "string"),
            Ty::Void => write!(f, "void"),
            Ty::Null => write!(f, "null"),
            Ty::Any => write!(f, "any"),
            Ty::Array(inner) => write!(f, "{}[]", inner),
            Ty::Class(id) => write!(f, "{}", id),
            Ty::Interface(id) => write!(f, "{}", id),
            Ty::Enum(id) => write!(f, "{}", id),
            Ty::Function => write!(f, "function"),
            Ty::Image => write!(f, "Image"),
            Ty::TypeParam(name) => write!(f, "{}", name),
        }
    }
}

/// Binary operators of the surface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

/// Unary operators of the surface language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}
