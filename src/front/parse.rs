//! Recursive-descent parser with standard precedence climbing: ternary
//! binds loosest, then `||`, `&&`, equality, relational, additive,
//! multiplicative, unary, then primary.

use internment::Intern;

use crate::common::Id;
use crate::error::{ErrorList, LexError, ParseError};

use super::ast::*;
use super::lex::{Lexer, Token, TokenKind};

fn tokenize_all(input: &str) -> (Vec<Token<'_>>, Vec<LexError>) {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    loop {
        match lexer.next() {
            Ok(Some(tok)) => tokens.push(tok),
            Ok(None) => break,
            Err(e) => {
                errors.push(e);
                if !lexer.skip_one() {
                    break;
                }
            }
        }
    }
    (tokens, errors)
}

pub fn parse(input: &str) -> Result<Program, ErrorList> {
    let (tokens, lex_errors) = tokenize_all(input);
    if !lex_errors.is_empty() {
        return Err(ErrorList {
            lex: lex_errors,
            parse: vec![],
        });
    }

    let mut parser = Parser { tokens, pos: 0 };
    match parser.parse_program() {
        Ok(program) => Ok(program),
        Err(e) => Err(ErrorList {
            lex: vec![],
            parse: vec![e],
        }),
    }
}

struct Parser<'src> {
    tokens: Vec<Token<'src>>,
    pos: usize,
}

type PResult<T> = Result<T, ParseError>;

impl<'src> Parser<'src> {
    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn advance(&mut self) -> Option<Token<'src>> {
        let tok = self.tokens.get(self.pos).copied();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> PResult<Token<'src>> {
        match self.peek_kind() {
            Some(k) if k == kind => Ok(self.advance().unwrap()),
            Some(k) => Err(ParseError::new(format!("expected {kind}, found {k}"))),
            None => Err(ParseError::new(format!("expected {kind}, found end of input"))),
        }
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_program(&mut self) -> PResult<Program> {
        let mut stmts = Vec::new();
        while self.peek().is_some() {
            stmts.push(self.parse_stmt()?);
        }
        Ok(Program { stmts })
    }

    fn parse_block(&mut self) -> PResult<Block> {
        self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while self.peek_kind() != Some(TokenKind::RBrace) {
            if self.peek().is_none() {
                return Err(ParseError::new("unterminated block, expected '}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Block { stmts })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.peek_kind() {
            Some(TokenKind::Let) => self.parse_var_decl(),
            Some(TokenKind::Fn) => self.parse_fn_decl(),
            Some(TokenKind::If) => self.parse_if(),
            Some(TokenKind::For) => self.parse_for(),
            Some(TokenKind::Return) => self.parse_return(),
            Some(TokenKind::Break) => {
                self.advance();
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Break)
            }
            Some(TokenKind::Id) if self.peek_assign_ahead() => self.parse_assign(),
            _ => {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::ExpressionStmt(expr))
            }
        }
    }

    /// Looks ahead for `id '='` (not `id ==`) to disambiguate an assignment
    /// statement from an expression statement that merely starts with an
    /// identifier (e.g. a bare call `print(x);`).
    fn peek_assign_ahead(&self) -> bool {
        matches!(self.tokens.get(self.pos + 1).map(|t| t.kind), Some(TokenKind::Eq))
    }

    fn parse_var_decl(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::Let)?;
        let name = self.parse_ident()?;
        let init = if self.matches(TokenKind::Eq) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::VarDecl { name, init })
    }

    fn parse_assign(&mut self) -> PResult<Stmt> {
        let name = self.parse_ident()?;
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::Assign { name, value })
    }

    fn parse_fn_decl(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::Fn)?;
        let name = self.parse_ident()?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if self.peek_kind() != Some(TokenKind::RParen) {
            params.push(self.parse_ident()?);
            while self.matches(TokenKind::Comma) {
                params.push(self.parse_ident()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::FnDecl { name, params, body })
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RParen)?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.matches(TokenKind::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Stmt::If { cond, then_branch, else_branch })
    }

    fn parse_for(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::For)?;
        let var = self.parse_ident()?;
        self.expect(TokenKind::In)?;
        let start = self.parse_additive()?;
        self.expect(TokenKind::DotDot)?;
        let end = self.parse_additive()?;
        let body = self.parse_block()?;
        Ok(Stmt::For { var, start, end, body })
    }

    fn parse_return(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::Return)?;
        let value = if self.peek_kind() == Some(TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::Return(value))
    }

    fn parse_ident(&mut self) -> PResult<Id> {
        let tok = self.expect(TokenKind::Id)?;
        Ok(Intern::new(tok.text.to_string()))
    }

    // --- expressions, loosest to tightest ---

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> PResult<Expr> {
        let cond = self.parse_or()?;
        if self.matches(TokenKind::Question) {
            let t = self.parse_expr()?;
            self.expect(TokenKind::Colon)?;
            let f = self.parse_expr()?;
            Ok(Expr::Ternary { cond: Box::new(cond), t: Box::new(t), f: Box::new(f) })
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.matches(TokenKind::OrOr) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.matches(TokenKind::AndAnd) {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::EqEq) => CompareOp::Eq,
                Some(TokenKind::NotEq) => CompareOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::Compare { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => CompareOp::Lt,
                Some(TokenKind::Gt) => CompareOp::Gt,
                Some(TokenKind::Le) => CompareOp::Le,
                Some(TokenKind::Ge) => CompareOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Compare { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.advance();
                Ok(Expr::Unary { op: UnaryOp::Neg, expr: Box::new(self.parse_unary()?) })
            }
            Some(TokenKind::Bang) => {
                self.advance();
                Ok(Expr::Unary { op: UnaryOp::Not, expr: Box::new(self.parse_unary()?) })
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let tok = self
            .peek()
            .copied()
            .ok_or_else(|| ParseError::new("unexpected end of input"))?;
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                let value: i64 = tok
                    .text
                    .parse()
                    .map_err(|_| ParseError::new(format!("malformed integer literal {:?}", tok.text)))?;
                Ok(Expr::Int(value))
            }
            TokenKind::Float => {
                self.advance();
                let value: f64 = tok
                    .text
                    .parse()
                    .map_err(|_| ParseError::new(format!("malformed float literal {:?}", tok.text)))?;
                Ok(Expr::Float(value))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr::Str(unescape_string(tok.text)))
            }
            TokenKind::Id => {
                let name = self.parse_ident()?;
                if self.matches(TokenKind::LParen) {
                    let mut args = Vec::new();
                    if self.peek_kind() != Some(TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        while self.matches(TokenKind::Comma) {
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(TokenKind::RParen)?;
                    Ok(Expr::Call { callee: name, args })
                } else {
                    Ok(Expr::Symbol(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            other => Err(ParseError::new(format!("unexpected token {other}"))),
        }
    }
}

/// Strips the surrounding quotes and resolves `\n \t \r \\ \" \0` escapes --
/// the same set the lexer validates in `lex_string`, so `Some(other)` below
/// is unreachable for any literal that made it past the lexer.
fn unescape_string(literal: &str) -> String {
    let inner = &literal[1..literal.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('0') => out.push('\0'),
                Some('\\') => out.push('\\'),
                Some('"') => out.push('"'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_var_decl_and_return() {
        let prog = parse("let a = 2 + 3 * 4; return a;").unwrap();
        assert_eq!(prog.stmts.len(), 2);
        assert!(matches!(prog.stmts[0], Stmt::VarDecl { .. }));
        assert!(matches!(prog.stmts[1], Stmt::Return(Some(_))));
    }

    #[test]
    fn parses_if_else() {
        let prog = parse("let a = 1; if (a == 1) { a = 42; } else { a = 7; } return a;").unwrap();
        assert_eq!(prog.stmts.len(), 3);
        assert!(matches!(prog.stmts[1], Stmt::If { else_branch: Some(_), .. }));
    }

    #[test]
    fn parses_for_loop() {
        let prog = parse("let s = 0; for i in 0..5 { s = s + i; } return s;").unwrap();
        assert!(matches!(prog.stmts[1], Stmt::For { .. }));
    }

    #[test]
    fn parses_ternary() {
        let prog = parse("return (3 < 5) ? 100 : 200;").unwrap();
        match &prog.stmts[0] {
            Stmt::Return(Some(Expr::Ternary { .. })) => {}
            other => panic!("expected ternary return, got {other:?}"),
        }
    }

    #[test]
    fn parses_function_and_call() {
        let prog = parse("fn add(x, y) { return x + y; } return add(2, 40);").unwrap();
        assert!(matches!(prog.stmts[0], Stmt::FnDecl { .. }));
        assert!(matches!(prog.stmts[1], Stmt::Return(Some(Expr::Call { .. }))));
    }

    #[test]
    fn rejects_unterminated_block() {
        let err = parse("if (true) { return 1;").unwrap_err();
        assert!(!err.parse.is_empty());
    }

    #[test]
    fn assignment_is_not_confused_with_equality() {
        let prog = parse("let a = 1; a = a == 1;").unwrap();
        assert!(matches!(prog.stmts[1], Stmt::Assign { .. }));
    }
}
