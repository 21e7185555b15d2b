//! The runtime value type, shared by the compiler (constant folding of
//! literals) and the VM (registers, operand stack).
//!
//! Grounded on `value.h` in the original source: a tagged union of
//! int/float/bool/string/object/ptr/null. Strings are represented as
//! interned, cheaply-cloned handles rather than owned buffers, so that
//! snapshotting the whole register file on every call (see `function.rs`)
//! stays cheap.

use derive_more::Display;
use internment::Intern;

/// An opaque heap object handle. Reserved for future object support
/// (`NEW_OBJECT` / `GET_PROPERTY` / `SET_PROPERTY`); never constructed by
/// this implementation today.
pub type ObjectRef = u64;

/// An opaque raw-pointer-shaped handle, reserved by the opcode set but never
/// produced by this implementation (see the `JMP_ADR` redesign note in
/// SPEC_FULL.md: nothing in this bytecode format embeds a real pointer).
pub type PtrHandle = u64;

#[derive(Debug, Clone, Display, PartialEq)]
pub enum Value {
    #[display("{_0}")]
    Int(i64),
    #[display("{_0}")]
    Float(f64),
    #[display("{_0}")]
    Bool(bool),
    #[display("{_0}")]
    Str(Intern<String>),
    #[display("<object {_0}>")]
    Object(ObjectRef),
    #[display("<ptr {_0}>")]
    Ptr(PtrHandle),
    #[display("null")]
    Null,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Ptr(_) => "ptr",
            Value::Null => "null",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<Intern<String>> {
        match self {
            Value::Str(s) => Some(*s),
            _ => None,
        }
    }
}
