//! `tigelang` as a library. See `src/bin` for the executable driver.
//!
//! Pipeline: source text -> tokens -> syntax tree -> bytecode buffer -> VM
//! execution -> result value. [`run`] drives the whole thing.

#![allow(dead_code)]

pub mod bytecode;
pub mod common;
pub mod compiler;
pub mod error;
pub mod front;
pub mod function;
pub mod symbol;
pub mod value;
pub mod vm;

pub use error::Error;
pub use value::Value;
pub use vm::VmLimits;

/// Compiles and runs `source`, returning the final value left on the
/// operand stack (or [`Value::Null`] if the program halts with an empty
/// stack).
pub fn run(source: &str) -> Result<Value, Error> {
    run_with_limits(source, VmLimits::default())
}

pub fn run_with_limits(source: &str, limits: VmLimits) -> Result<Value, Error> {
    let program = front::parse(source).map_err(|errors| {
        if errors.is_lex_error() {
            Error::Lex(errors)
        } else {
            Error::Parse(errors)
        }
    })?;
    let compiled = compiler::compile(&program, 1024).map_err(Error::Compile)?;
    let value = vm::execute(&compiled, limits).map_err(Error::Runtime)?;
    Ok(value)
}
