//! The register/stack virtual machine: dispatch loop, operand stack,
//! register file, call stack, and the chunk-hopping bytecode reader.
//!
//! Grounded on `vm.c` and `op_handlers.c` in the original source, with the
//! process-global `g_vm` singleton replaced by an explicit `Vm` value
//! threaded through every step, the "temp code to be removed" `ip`-reset
//! hack in `vm_execute` dropped in favor of proper `JMP_ADR` chunk-hopping,
//! `OP_TERNARY` actually wired into dispatch (the original's handler table
//! maps it to a null entry despite `handle_ternary` being fully
//! implemented), and a `RETURN` with an empty call stack treated as an
//! explicit, documented equivalent of `HALT` rather than the original's
//! accidental error-path success.

use internment::Intern;

use crate::bytecode::{Opcode, Reader};
use crate::compiler::CompiledProgram;
use crate::error::RuntimeError;
use crate::function::{Callable, CallFrame};
use crate::value::Value;

/// Tunable capacities, exposed to the CLI driver. Defaults match the system
/// this design is grounded on.
#[derive(Debug, Clone, Copy)]
pub struct VmLimits {
    pub stack_capacity: usize,
    pub register_count: usize,
    pub call_stack_capacity: usize,
}

impl Default for VmLimits {
    fn default() -> Self {
        VmLimits {
            stack_capacity: 2048,
            register_count: 512,
            call_stack_capacity: 1024,
        }
    }
}

enum Promote {
    Sub,
    Mul,
}

pub struct Vm<'p> {
    program: &'p CompiledProgram,
    registers: Vec<Value>,
    stack: Vec<Value>,
    call_stack: Vec<CallFrame>,
    /// A single saved stack-pointer slot, not a stack of them: `if`
    /// compiles each branch's `SAVE_SP`/`RESET_SP` pair fully nested within
    /// its own region, so one slot is always enough for this grammar.
    sp_reset: Option<usize>,
    limits: VmLimits,
    reader: Reader<'p>,
}

pub fn execute(program: &CompiledProgram, limits: VmLimits) -> Result<Value, RuntimeError> {
    Vm::new(program, limits).run()
}

impl<'p> Vm<'p> {
    fn new(program: &'p CompiledProgram, limits: VmLimits) -> Self {
        let registers = vec![Value::Null; limits.register_count];
        let reader = Reader::new(&program.buffer, program.entry_chunk, 0);
        Vm {
            program,
            registers,
            stack: Vec::new(),
            call_stack: Vec::new(),
            sp_reset: None,
            limits,
            reader,
        }
    }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.limits.stack_capacity {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn pop_bool(&mut self, context: &'static str) -> Result<bool, RuntimeError> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            other => Err(RuntimeError::TypeMismatch(
                context,
                format!("expected bool, got {}", other.type_name()),
            )),
        }
    }

    fn get_register(&self, index: u16) -> Result<Value, RuntimeError> {
        self.registers
            .get(index as usize)
            .cloned()
            .ok_or(RuntimeError::RegisterOutOfRange(index))
    }

    fn set_register(&mut self, index: u16, value: Value) -> Result<(), RuntimeError> {
        let slot = self
            .registers
            .get_mut(index as usize)
            .ok_or(RuntimeError::RegisterOutOfRange(index))?;
        *slot = value;
        Ok(())
    }

    fn pop_pair(&mut self) -> Result<(Value, Value), RuntimeError> {
        // Operands are pushed left-then-right, so the right operand is on
        // top of the stack.
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        Ok((lhs, rhs))
    }

    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            if self.reader.at_end() {
                log::trace!("reader ran off the end of chunk {} without HALT", self.reader.chunk);
                break;
            }
            let op = self.reader.read_opcode()?;
            match op {
                Opcode::Nop => {}
                Opcode::LoadConstInt => {
                    let v = self.reader.read_i64()?;
                    self.push(Value::Int(v))?;
                }
                Opcode::LoadConstFloat => {
                    let v = self.reader.read_f64()?;
                    self.push(Value::Float(v))?;
                }
                Opcode::LoadBool => {
                    let v = self.reader.read_u8()?;
                    self.push(Value::Bool(v != 0))?;
                }
                Opcode::LoadString => {
                    let idx = self.reader.read_u64()?;
                    let s = *self
                        .program
                        .strings
                        .get(idx as usize)
                        .ok_or(RuntimeError::UnterminatedInChunk)?;
                    self.push(Value::Str(s))?;
                }
                Opcode::LoadVar => {
                    let r = self.reader.read_u16()?;
                    let v = self.get_register(r)?;
                    self.push(v)?;
                }
                Opcode::StoreVar => {
                    let r = self.reader.read_u16()?;
                    let v = self.pop()?;
                    self.set_register(r, v)?;
                }
                Opcode::Add => self.op_add()?,
                Opcode::Sub => self.op_promote(Promote::Sub)?,
                Opcode::Mul => self.op_promote(Promote::Mul)?,
                Opcode::Div => self.op_div()?,
                Opcode::And => self.op_logical("and", |a, b| a && b)?,
                Opcode::Or => self.op_logical("or", |a, b| a || b)?,
                Opcode::Not => {
                    let v = self.pop_bool("not")?;
                    self.push(Value::Bool(!v))?;
                }
                Opcode::Equal => self.op_equality(true)?,
                Opcode::NotEqual => self.op_equality(false)?,
                Opcode::LessThan => self.op_order("less_than", |a, b| a < b, |a, b| a < b)?,
                Opcode::GreaterThan => self.op_order("greater_than", |a, b| a > b, |a, b| a > b)?,
                Opcode::LessEqual => self.op_order("less_equal", |a, b| a <= b, |a, b| a <= b)?,
                Opcode::GreaterEqual => self.op_order("greater_equal", |a, b| a >= b, |a, b| a >= b)?,
                Opcode::Jmp => {
                    let (chunk, offset) = self.reader.read_jump_target()?;
                    log::trace!("jmp -> chunk {chunk} offset {offset}");
                    self.reader.jump_to(chunk, offset)?;
                }
                Opcode::JmpIfTrue => {
                    let (chunk, offset) = self.reader.read_jump_target()?;
                    if self.pop_bool("jmp_if_true")? {
                        self.reader.jump_to(chunk, offset)?;
                    }
                }
                Opcode::JmpIfFalse => {
                    let (chunk, offset) = self.reader.read_jump_target()?;
                    if !self.pop_bool("jmp_if_false")? {
                        self.reader.jump_to(chunk, offset)?;
                    }
                }
                Opcode::JmpAdr => {
                    let chunk = self.reader.read_u64()?;
                    log::trace!("jmp_adr -> chunk {chunk}");
                    self.reader.jump_to(chunk, 0)?;
                }
                Opcode::Call => self.op_call()?,
                Opcode::Return => {
                    if let Some(frame) = self.call_stack.pop() {
                        log::trace!("return -> chunk {} ip {}", frame.return_chunk, frame.return_ip);
                        self.reader.jump_to(frame.return_chunk, frame.return_ip)?;
                        self.registers = frame.saved_registers;
                    } else {
                        // A top-level return: behaves exactly like HALT, and
                        // the value the return expression already pushed is
                        // the program's result.
                        break;
                    }
                }
                Opcode::Ternary => {
                    let false_val = self.pop()?;
                    let true_val = self.pop()?;
                    let cond = self.pop_bool("ternary")?;
                    self.push(if cond { true_val } else { false_val })?;
                }
                Opcode::NewObject
                | Opcode::GetProperty
                | Opcode::SetProperty
                | Opcode::AllocHeap
                | Opcode::FreeHeap
                | Opcode::Push => {
                    return Err(RuntimeError::UnimplementedOpcode(op));
                }
                Opcode::EnterScope | Opcode::ExitScope => {
                    // Never emitted by this compiler; scoping is a
                    // compile-time-only concept. Accepted as a no-op so a
                    // conforming VM doesn't choke on a stray one.
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::SaveSp => {
                    self.sp_reset = Some(self.stack.len());
                }
                Opcode::ResetSp => {
                    if let Some(sp) = self.sp_reset.take() {
                        self.stack.truncate(sp);
                    }
                }
                Opcode::IncReg => {
                    let r = self.reader.read_u16()?;
                    if let Value::Int(v) = self.get_register(r)? {
                        self.set_register(r, Value::Int(v + 1))?;
                    }
                }
                Opcode::Halt => break,
            }
        }

        Ok(self.stack.pop().unwrap_or(Value::Null))
    }

    fn op_add(&mut self) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_pair()?;
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(x + y),
            (Value::Float(x), Value::Float(y)) => Value::Float(x + y),
            (a, b) => {
                return Err(RuntimeError::TypeMismatch(
                    "add",
                    format!("{} and {}", a.type_name(), b.type_name()),
                ))
            }
        };
        self.push(result)
    }

    /// `SUB` and `MUL` promote int to float when the operands' types differ;
    /// `ADD` and `DIV` do not (see SPEC_FULL.md §3 for the asymmetric rule
    /// this implementation carries over from the original design).
    fn op_promote(&mut self, which: Promote) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_pair()?;
        let name = match which {
            Promote::Sub => "sub",
            Promote::Mul => "mul",
        };
        let apply_i = |x: i64, y: i64| match which {
            Promote::Sub => x - y,
            Promote::Mul => x * y,
        };
        let apply_f = |x: f64, y: f64| match which {
            Promote::Sub => x - y,
            Promote::Mul => x * y,
        };
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => Value::Int(apply_i(x, y)),
            (Value::Float(x), Value::Float(y)) => Value::Float(apply_f(x, y)),
            (Value::Int(x), Value::Float(y)) => Value::Float(apply_f(x as f64, y)),
            (Value::Float(x), Value::Int(y)) => Value::Float(apply_f(x, y as f64)),
            (a, b) => {
                return Err(RuntimeError::TypeMismatch(
                    name,
                    format!("{} and {}", a.type_name(), b.type_name()),
                ))
            }
        };
        self.push(result)
    }

    fn op_div(&mut self) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_pair()?;
        let result = match (a, b) {
            (Value::Int(_), Value::Int(0)) => return Err(RuntimeError::DivisionByZero),
            (Value::Int(x), Value::Int(y)) => Value::Int(x / y),
            (Value::Float(x), Value::Float(y)) => {
                if y == 0.0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                Value::Float(x / y)
            }
            (a, b) => {
                return Err(RuntimeError::TypeMismatch(
                    "div",
                    format!("{} and {}", a.type_name(), b.type_name()),
                ))
            }
        };
        self.push(result)
    }

    fn op_logical(&mut self, name: &'static str, f: impl Fn(bool, bool) -> bool) -> Result<(), RuntimeError> {
        let b = self.pop_bool(name)?;
        let a = self.pop_bool(name)?;
        self.push(Value::Bool(f(a, b)))
    }

    /// Type-sensitive equality: values of different types are never equal
    /// (this is not an error, unlike arithmetic type mismatches).
    fn op_equality(&mut self, want_equal: bool) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_pair()?;
        let equal = match (&a, &b) {
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Bool(x), Value::Bool(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Ptr(x), Value::Ptr(y)) => x == y,
            (Value::Object(x), Value::Object(y)) => x == y,
            (Value::Null, Value::Null) => true,
            _ => false,
        };
        self.push(Value::Bool(equal == want_equal))
    }

    /// Ordering comparisons require both operands to already share a type
    /// (no int/float promotion, unlike `SUB`/`MUL`).
    fn op_order(
        &mut self,
        name: &'static str,
        on_int: impl Fn(i64, i64) -> bool,
        on_float: impl Fn(f64, f64) -> bool,
    ) -> Result<(), RuntimeError> {
        let (a, b) = self.pop_pair()?;
        let result = match (a, b) {
            (Value::Int(x), Value::Int(y)) => on_int(x, y),
            (Value::Float(x), Value::Float(y)) => on_float(x, y),
            (a, b) => {
                return Err(RuntimeError::TypeMismatch(
                    name,
                    format!("{} and {}", a.type_name(), b.type_name()),
                ))
            }
        };
        self.push(Value::Bool(result))
    }

    fn op_call(&mut self) -> Result<(), RuntimeError> {
        let name = self.reader.read_cstr()?;
        let interned = Intern::new(name.clone());
        let callable = self
            .program
            .functions
            .get(interned)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownFunction(name.clone()))?;
        match callable {
            Callable::Builtin(_) => {
                let value = self.pop()?;
                let text = value.as_str().ok_or_else(|| {
                    RuntimeError::TypeMismatch(
                        "print",
                        format!("expected string, got {}", value.type_name()),
                    )
                })?;
                println!("{text}");
                // Every call is lowered as an expression yielding one value
                // (`ExpressionStmt` always emits a trailing `Pop`), so the
                // builtin path has to balance the stack the same way a user
                // function's `RETURN` does.
                self.push(Value::Null);
                Ok(())
            }
            Callable::User(record) => {
                if self.call_stack.len() >= self.limits.call_stack_capacity {
                    return Err(RuntimeError::CallStackOverflow);
                }
                let frame = CallFrame {
                    return_chunk: self.reader.chunk,
                    return_ip: self.reader.ip,
                    saved_registers: self.registers.clone(),
                };
                self.call_stack.push(frame);
                // Arguments were pushed left-to-right, so the last one is on
                // top; it belongs in the last parameter register. Registers
                // are shared across call frames (see `CallFrame`'s doc
                // comment), so this write happens after the snapshot above,
                // never before it.
                if record.arity > 0 {
                    for reg in (record.arg_b..=record.arg_e).rev() {
                        let value = self.pop()?;
                        self.set_register(reg, value)?;
                    }
                }
                log::trace!("call {} -> chunk {}", record.name, record.body_chunk);
                self.reader.jump_to(record.body_chunk, 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::front::parse::parse;

    fn run_source(src: &str) -> Value {
        let program = parse(src).expect("parse");
        let compiled = compile(&program, 1024).expect("compile");
        execute(&compiled, VmLimits::default()).expect("run")
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_source("let a = 2 + 3 * 4; return a;"), Value::Int(14));
    }

    #[test]
    fn if_else_branches() {
        assert_eq!(
            run_source("let a = 1; if (a == 1) { a = 42; } else { a = 7; } return a;"),
            Value::Int(42)
        );
        assert_eq!(
            run_source("let a = 2; if (a == 1) { a = 42; } else { a = 7; } return a;"),
            Value::Int(7)
        );
    }

    #[test]
    fn counted_loop_sums() {
        assert_eq!(
            run_source("let s = 0; for i in 0..5 { s = s + i; } return s;"),
            Value::Int(10)
        );
    }

    #[test]
    fn ternary_selects_branch() {
        assert_eq!(run_source("return (3 < 5) ? 100 : 200;"), Value::Int(100));
        assert_eq!(run_source("return (5 < 3) ? 100 : 200;"), Value::Int(200));
    }

    #[test]
    fn function_call_adds_arguments() {
        assert_eq!(
            run_source("fn add(x, y) { return x + y; } return add(2, 40);"),
            Value::Int(42)
        );
    }

    #[test]
    fn division_by_zero_is_a_runtime_error() {
        let program = parse("return 10 / 0;").unwrap();
        let compiled = compile(&program, 1024).unwrap();
        let err = execute(&compiled, VmLimits::default()).unwrap_err();
        assert_eq!(err, RuntimeError::DivisionByZero);
    }

    #[test]
    fn sub_and_mul_promote_mixed_int_float() {
        assert_eq!(run_source("return 3 - 1.5;"), Value::Float(1.5));
        assert_eq!(run_source("return 2 * 2.5;"), Value::Float(5.0));
    }

    #[test]
    fn add_does_not_promote() {
        let program = parse("return 1 + 1.0;").unwrap();
        let compiled = compile(&program, 1024).unwrap();
        let err = execute(&compiled, VmLimits::default()).unwrap_err();
        assert!(matches!(err, RuntimeError::TypeMismatch("add", _)));
    }

    #[test]
    fn cross_type_equality_is_false_not_an_error() {
        assert_eq!(run_source("return (1 == true) ? 1 : 0;"), Value::Int(0));
    }

    #[test]
    fn break_exits_the_loop_early() {
        assert_eq!(
            run_source("let s = 0; for i in 0..10 { if (i == 3) { break; } s = s + i; } return s;"),
            Value::Int(3)
        );
    }

    #[test]
    fn print_builtin_accepts_a_string() {
        // Doesn't assert on stdout; just confirms the call path doesn't error.
        assert_eq!(run_source(r#"print("hi"); return 1;"#), Value::Int(1));
    }
}
