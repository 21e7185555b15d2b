//! Function records, the function registry, and the VM's call stack.
//!
//! Grounded on `functions.h`/`.c` (call frame / call stack) and `context.c`'s
//! function hash map in the original source. A `FunctionRecord` refers to
//! its body by chunk id rather than by pointer — the bytecode buffer owns
//! the chunk itself, so there is no borrow to thread through the function
//! registry or the VM (see the cyclic-ownership redesign note in
//! SPEC_FULL.md §9).

use crate::common::{Id, Map};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct FunctionRecord {
    pub name: Id,
    pub body_chunk: u64,
    pub arity: usize,
    pub arg_b: u16,
    pub arg_e: u16,
}

/// Either a user-defined function or the single built-in. Registering
/// `print` as an ordinary registry entry means `CALL`'s handler does one
/// uniform lookup-and-match instead of special-casing the literal string
/// `"print"` inline (see SPEC_FULL.md §9).
#[derive(Debug, Clone)]
pub enum Callable {
    User(FunctionRecord),
    Builtin(Id),
}

pub struct FunctionRegistry {
    entries: Map<Id, Callable>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut entries = Map::new();
        let print = internment::Intern::new("print".to_string());
        entries.insert(print, Callable::Builtin(print));
        FunctionRegistry { entries }
    }

    pub fn register(&mut self, record: FunctionRecord) {
        self.entries.insert(record.name, Callable::User(record));
    }

    pub fn get(&self, name: Id) -> Option<&Callable> {
        self.entries.get(&name)
    }

    pub fn contains(&self, name: Id) -> bool {
        self.entries.contains_key(&name)
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A saved activation: where to resume in the caller, and the caller's full
/// register-file snapshot. Snapshotting the whole file is not the tightest
/// possible representation, but it is correct and simple given that register
/// indices are never reused within a function body (see `symbol.rs`).
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub return_chunk: u64,
    pub return_ip: usize,
    pub saved_registers: Vec<Value>,
}
