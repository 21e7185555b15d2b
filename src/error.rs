//! Error types for every phase of the pipeline: lexing, parsing, compiling,
//! and execution. Each phase has its own error type; [`Error`] unifies them
//! for the driver-level `Result`.

use derive_more::{Display, Error, From};

use crate::common::Id;

/// A lexical error at a specific source position.
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum LexError {
    #[display("{_0}:{_1}: unexpected character {_2:?}")]
    UnexpectedChar(usize, usize, #[error(not(source))] char),
    #[display("{_0}:{_1}: unterminated string literal")]
    UnterminatedString(usize, usize),
    #[display("{_0}:{_1}: unterminated block comment")]
    UnterminatedComment(usize, usize),
    #[display("{_0}:{_1}: malformed number literal {_2:?}")]
    MalformedNumber(usize, usize, #[error(not(source))] String),
    #[display("{_0}:{_1}: invalid escape sequence \\{_2}")]
    InvalidEscape(usize, usize, #[error(not(source))] char),
}

/// A syntactic error. The original design's `ParseError(String)` is kept as
/// the shape (a single message), since a recursive-descent parser's errors
/// don't need much more structure than "what we expected, here".
#[derive(Debug, Display, Error, Clone, PartialEq)]
#[display("{_0}")]
pub struct ParseError(#[error(not(source))] pub String);

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        ParseError(message.into())
    }
}

/// Collects every lex/parse diagnostic produced by a single front-end run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ErrorList {
    pub lex: Vec<LexError>,
    pub parse: Vec<ParseError>,
}

impl ErrorList {
    pub fn is_empty(&self) -> bool {
        self.lex.is_empty() && self.parse.is_empty()
    }

    /// Whether this batch should surface as `Error::Lex` or `Error::Parse`.
    /// `front::parse` never mixes the two in one `ErrorList` -- it returns
    /// as soon as lexing fails, before the parser ever runs -- so checking
    /// `lex` is enough to tell them apart.
    pub fn is_lex_error(&self) -> bool {
        !self.lex.is_empty()
    }
}

impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for e in &self.lex {
            writeln!(f, "{e}")?;
        }
        for e in &self.parse {
            writeln!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

/// An error that aborts compilation (AST-to-bytecode lowering).
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum CompileError {
    #[display("unknown identifier '{_0}'")]
    UnknownIdentifier(#[error(not(source))] Id),
    #[display("'{_0}' is already declared in this scope")]
    DuplicateDeclaration(#[error(not(source))] Id),
    #[display("'{_0}' expects {_1} argument(s), got {_2}")]
    ArityMismatch(Id, usize, #[error(not(source))] usize),
    #[display("cannot assign to undeclared name '{_0}'")]
    AssignToUndeclared(#[error(not(source))] Id),
    #[display("'break' used outside of a loop")]
    BreakOutsideLoop,
    #[display("'{_0}' is not a function")]
    NotAFunction(#[error(not(source))] Id),
}

/// An error raised while executing bytecode.
#[derive(Debug, Display, Error, Clone, PartialEq)]
pub enum RuntimeError {
    #[display("type mismatch in '{_0}': {_1}")]
    TypeMismatch(&'static str, #[error(not(source))] String),
    #[display("division by zero")]
    DivisionByZero,
    #[display("operand stack underflow")]
    StackUnderflow,
    #[display("operand stack overflow")]
    StackOverflow,
    #[display("call stack overflow (recursion too deep)")]
    CallStackOverflow,
    #[display("call to unknown function '{_0}'")]
    UnknownFunction(#[error(not(source))] String),
    #[display("jump to unknown chunk {_0}")]
    UnknownChunk(#[error(not(source))] u64),
    #[display("string literal is not null-terminated within its chunk")]
    UnterminatedInChunk,
    #[display("opcode {_0:?} is reserved and not implemented")]
    UnimplementedOpcode(#[error(not(source))] crate::bytecode::Opcode),
    #[display("register index {_0} out of range")]
    RegisterOutOfRange(#[error(not(source))] u16),
}

/// The top-level error returned by [`crate::run`]. Lex and parse are kept
/// distinct (SPEC_FULL.md §7) even though both originate from the same
/// front-end pass and share the `ErrorList` carrier: [`ErrorList::kind`]
/// decides which one a given front-end failure gets mapped to.
#[derive(Debug, Display, Error, From)]
pub enum Error {
    #[display("{_0}")]
    Lex(#[error(not(source))] ErrorList),
    #[display("{_0}")]
    Parse(#[error(not(source))] ErrorList),
    #[display("{_0}")]
    Compile(CompileError),
    #[display("{_0}")]
    Runtime(RuntimeError),
}
