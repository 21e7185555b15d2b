//! The compiler: a single-pass AST walker that emits bytecode, threads
//! forward jumps through the buffer's placeholder mechanism, and resolves
//! names through the symbol table.
//!
//! Grounded on `compiler.c`'s `compile_node` dispatch and per-kind
//! `compile_*` functions in the original source, with a few of that file's
//! bugs corrected rather than reproduced: unary minus is emitted in the
//! documented `LOAD_CONST_INT 0; <operand>; SUB` order (the original emits
//! the immediate before the opcode); a `let` with no initializer reserves a
//! register without emitting `STORE_VAR` (the original always emits it,
//! which would underflow the operand stack); and a function body's
//! non-linked region is closed exactly once (the original calls
//! `bc_end_non_linked_chunk` twice in a row).

use internment::Intern;

use crate::bytecode::{BytecodeBuffer, Opcode};
use crate::common::{Id, Map};
use crate::error::CompileError;
use crate::front::ast::*;
use crate::function::{FunctionRecord, FunctionRegistry};
use crate::symbol::{Symbol, SymbolTable};

/// The output of a successful compilation: everything the VM needs to run
/// the program.
pub struct CompiledProgram {
    pub buffer: BytecodeBuffer,
    pub functions: FunctionRegistry,
    pub strings: Vec<Intern<String>>,
    pub entry_chunk: u64,
}

pub fn compile(program: &Program, chunk_capacity: usize) -> Result<CompiledProgram, CompileError> {
    let mut compiler = Compiler::new(chunk_capacity);
    let entry_chunk = compiler.buffer.head_chunk_id();
    for stmt in &program.stmts {
        compiler.compile_stmt(stmt)?;
    }
    compiler.buffer.emit_op(Opcode::Halt);
    Ok(CompiledProgram {
        buffer: compiler.buffer,
        functions: compiler.functions,
        strings: compiler.strings,
        entry_chunk,
    })
}

struct Compiler {
    buffer: BytecodeBuffer,
    symbols: SymbolTable,
    functions: FunctionRegistry,
    strings: Vec<Intern<String>>,
    string_index: Map<Intern<String>, u64>,
    /// Each active `for` loop pushes a frame here to collect its `break`
    /// jump placeholders, all patched to the loop's exit label once the
    /// loop finishes compiling.
    loop_exits: Vec<Vec<crate::bytecode::JumpPlaceholder>>,
}

impl Compiler {
    fn new(chunk_capacity: usize) -> Self {
        let mut symbols = SymbolTable::new();
        let print_name = Intern::new("print".to_string());
        symbols
            .declare_function(print_name, 1, 0, 0)
            .expect("global scope starts empty");
        Compiler {
            buffer: BytecodeBuffer::new(chunk_capacity),
            symbols,
            functions: FunctionRegistry::new(),
            strings: Vec::new(),
            string_index: Map::new(),
            loop_exits: Vec::new(),
        }
    }

    fn current_position(&self) -> (u64, u64) {
        let chunk = self.buffer.current_chunk_id();
        let offset = self
            .buffer
            .get_chunk(chunk)
            .expect("current chunk always exists")
            .bytes
            .len() as u64;
        (chunk, offset)
    }

    fn intern_string(&mut self, text: &str) -> u64 {
        let interned = Intern::new(text.to_string());
        if let Some(&idx) = self.string_index.get(&interned) {
            return idx;
        }
        let idx = self.strings.len() as u64;
        self.strings.push(interned);
        self.string_index.insert(interned, idx);
        idx
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::VarDecl { name, init } => self.compile_var_decl(*name, init),
            Stmt::Assign { name, value } => self.compile_assign(*name, value),
            Stmt::ExpressionStmt(expr) => {
                self.compile_expr(expr)?;
                self.buffer.emit_op(Opcode::Pop);
                Ok(())
            }
            Stmt::FnDecl { name, params, body } => self.compile_fn_decl(*name, params, body),
            Stmt::If { cond, then_branch, else_branch } => {
                self.compile_if(cond, then_branch, else_branch.as_ref())
            }
            Stmt::For { var, start, end, body } => self.compile_for(*var, start, end, body),
            Stmt::Return(value) => self.compile_return(value.as_ref()),
            Stmt::Break => self.compile_break(),
        }
    }

    fn compile_var_decl(&mut self, name: Id, init: &Option<Expr>) -> Result<(), CompileError> {
        let register = self.symbols.declare_variable(name)?;
        if let Some(init) = init {
            self.compile_expr(init)?;
            self.buffer.emit_op_u16(Opcode::StoreVar, register);
        }
        Ok(())
    }

    fn compile_assign(&mut self, name: Id, value: &Expr) -> Result<(), CompileError> {
        let register = match self.symbols.lookup(name) {
            Some(Symbol::Variable { register, .. }) => *register,
            _ => return Err(CompileError::AssignToUndeclared(name)),
        };
        self.compile_expr(value)?;
        self.buffer.emit_op_u16(Opcode::StoreVar, register);
        Ok(())
    }

    fn compile_fn_decl(&mut self, name: Id, params: &[Id], body: &Block) -> Result<(), CompileError> {
        let arity = params.len();
        let arg_b = self.symbols.peek_next_register();
        let arg_e = if arity == 0 { arg_b } else { arg_b + arity as u16 - 1 };
        self.symbols.declare_function(name, arity, arg_b, arg_e)?;

        self.symbols.enter_scope();
        for param in params {
            self.symbols.declare_variable(*param)?;
        }

        self.buffer.begin_non_linked_region();
        let mut ends_in_return = false;
        for (i, stmt) in body.stmts.iter().enumerate() {
            ends_in_return = matches!(stmt, Stmt::Return(_)) && i == body.stmts.len() - 1;
            self.compile_stmt(stmt)?;
        }
        if !ends_in_return {
            self.buffer.emit_op_i64(Opcode::LoadConstInt, 0);
            self.buffer.emit_op(Opcode::Return);
        }
        let body_chunk = self.buffer.end_non_linked_region();

        self.symbols.exit_scope();

        self.functions.register(FunctionRecord {
            name,
            body_chunk,
            arity,
            arg_b,
            arg_e,
        });
        Ok(())
    }

    fn compile_if(
        &mut self,
        cond: &Expr,
        then_branch: &Block,
        else_branch: Option<&Block>,
    ) -> Result<(), CompileError> {
        self.symbols.enter_scope();
        self.buffer.emit_op(Opcode::SaveSp);

        self.compile_expr(cond)?;
        let false_jump = self.buffer.emit_jump_placeholder(Opcode::JmpIfFalse);

        for stmt in &then_branch.stmts {
            self.compile_stmt(stmt)?;
        }
        let exit_jump = self.buffer.emit_jump_placeholder(Opcode::Jmp);

        let (false_chunk, false_offset) = self.current_position();
        self.buffer.backpatch(false_jump, false_chunk, false_offset);

        if let Some(else_branch) = else_branch {
            for stmt in &else_branch.stmts {
                self.compile_stmt(stmt)?;
            }
        }

        let (exit_chunk, exit_offset) = self.current_position();
        self.buffer.backpatch(exit_jump, exit_chunk, exit_offset);

        self.buffer.emit_op(Opcode::ResetSp);
        self.symbols.exit_scope();
        Ok(())
    }

    fn compile_for(&mut self, var: Id, start: &Expr, end: &Expr, body: &Block) -> Result<(), CompileError> {
        self.symbols.enter_scope();
        let var_reg = self.symbols.declare_variable(var)?;
        let end_name = Intern::new("__end".to_string());
        let end_reg = self.symbols.declare_variable(end_name)?;

        self.compile_expr(start)?;
        self.buffer.emit_op_u16(Opcode::StoreVar, var_reg);
        self.compile_expr(end)?;
        self.buffer.emit_op_u16(Opcode::StoreVar, end_reg);

        let loop_head = self.current_position();
        self.buffer.emit_op_u16(Opcode::LoadVar, var_reg);
        self.buffer.emit_op_u16(Opcode::LoadVar, end_reg);
        self.buffer.emit_op(Opcode::LessThan);
        let exit_jump = self.buffer.emit_jump_placeholder(Opcode::JmpIfFalse);

        self.loop_exits.push(Vec::new());
        for stmt in &body.stmts {
            self.compile_stmt(stmt)?;
        }

        self.buffer.emit_op_u16(Opcode::IncReg, var_reg);
        self.buffer.emit_jump(Opcode::Jmp, loop_head.0, loop_head.1);

        let after_loop = self.current_position();
        self.buffer.backpatch(exit_jump, after_loop.0, after_loop.1);
        for break_jump in self.loop_exits.pop().expect("just pushed") {
            self.buffer.backpatch(break_jump, after_loop.0, after_loop.1);
        }

        self.symbols.exit_scope();
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&Expr>) -> Result<(), CompileError> {
        match value {
            Some(expr) => self.compile_expr(expr)?,
            None => self.buffer.emit_op_i64(Opcode::LoadConstInt, 0),
        }
        self.buffer.emit_op(Opcode::Return);
        Ok(())
    }

    fn compile_break(&mut self) -> Result<(), CompileError> {
        if self.loop_exits.is_empty() {
            return Err(CompileError::BreakOutsideLoop);
        }
        let placeholder = self.buffer.emit_jump_placeholder(Opcode::Jmp);
        self.loop_exits.last_mut().expect("checked above").push(placeholder);
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Int(v) => {
                self.buffer.emit_op_i64(Opcode::LoadConstInt, *v);
            }
            Expr::Float(v) => {
                self.buffer.emit_op_f64(Opcode::LoadConstFloat, *v);
            }
            Expr::Bool(v) => {
                self.buffer.emit_op_u8(Opcode::LoadBool, *v as u8);
            }
            Expr::Str(s) => {
                let idx = self.intern_string(s);
                self.buffer.emit_op_u64(Opcode::LoadString, idx);
            }
            Expr::Symbol(name) => {
                let register = match self.symbols.lookup(*name) {
                    Some(Symbol::Variable { register, .. }) => *register,
                    Some(Symbol::Function { .. }) => return Err(CompileError::NotAFunction(*name)),
                    None => return Err(CompileError::UnknownIdentifier(*name)),
                };
                self.buffer.emit_op_u16(Opcode::LoadVar, register);
            }
            Expr::Binary { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                let opcode = match op {
                    BinOp::Add => Opcode::Add,
                    BinOp::Sub => Opcode::Sub,
                    BinOp::Mul => Opcode::Mul,
                    BinOp::Div => Opcode::Div,
                    BinOp::And => Opcode::And,
                    BinOp::Or => Opcode::Or,
                };
                self.buffer.emit_op(opcode);
            }
            Expr::Unary { op, expr } => match op {
                UnaryOp::Neg => {
                    self.buffer.emit_op_i64(Opcode::LoadConstInt, 0);
                    self.compile_expr(expr)?;
                    self.buffer.emit_op(Opcode::Sub);
                }
                UnaryOp::Not => {
                    self.compile_expr(expr)?;
                    self.buffer.emit_op(Opcode::Not);
                }
            },
            Expr::Compare { op, lhs, rhs } => {
                self.compile_expr(lhs)?;
                self.compile_expr(rhs)?;
                let opcode = match op {
                    CompareOp::Eq => Opcode::Equal,
                    CompareOp::Ne => Opcode::NotEqual,
                    CompareOp::Lt => Opcode::LessThan,
                    CompareOp::Gt => Opcode::GreaterThan,
                    CompareOp::Le => Opcode::LessEqual,
                    CompareOp::Ge => Opcode::GreaterEqual,
                };
                self.buffer.emit_op(opcode);
            }
            Expr::Ternary { cond, t, f } => {
                self.compile_expr(cond)?;
                let false_jump = self.buffer.emit_jump_placeholder(Opcode::JmpIfFalse);
                self.compile_expr(t)?;
                let exit_jump = self.buffer.emit_jump_placeholder(Opcode::Jmp);
                let (fc, fo) = self.current_position();
                self.buffer.backpatch(false_jump, fc, fo);
                self.compile_expr(f)?;
                let (ec, eo) = self.current_position();
                self.buffer.backpatch(exit_jump, ec, eo);
            }
            Expr::Call { callee, args } => self.compile_call(*callee, args)?,
        }
        Ok(())
    }

    /// Argument values are simply pushed left-to-right; `CALL`'s VM handler
    /// is the one place that knows a user function's parameter registers
    /// (from its [`crate::function::FunctionRecord`]) and pops them into
    /// place, after snapshotting the caller's registers but before jumping
    /// into the body. Emitting `STORE_VAR`s here instead would mutate the
    /// caller's live registers before that snapshot is taken, corrupting
    /// whatever the caller had stored in the callee's parameter slots.
    fn compile_call(&mut self, callee: Id, args: &[Expr]) -> Result<(), CompileError> {
        let arity = match self.symbols.lookup(callee) {
            Some(Symbol::Function { arity, .. }) => *arity,
            Some(Symbol::Variable { .. }) => return Err(CompileError::NotAFunction(callee)),
            None => return Err(CompileError::UnknownIdentifier(callee)),
        };
        if args.len() != arity {
            return Err(CompileError::ArityMismatch(callee, arity, args.len()));
        }

        for arg in args {
            self.compile_expr(arg)?;
        }
        self.buffer.emit_op_cstr(Opcode::Call, callee.as_str());
        Ok(())
    }
}
