mod lexer;

pub use lexer::{Lexer, Token, TokenKind};

use lorikeet_syntax::{Block, Expr, Ident, InfixOp, PrefixOp, Program, Stmt};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("parse error on line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: usize,
    },
    #[error("parse error on line {line}: illegal character `{literal}`")]
    IllegalCharacter { literal: String, line: usize },
    #[error("parse error on line {line}: unterminated string")]
    UnterminatedString { line: usize },
    #[error("parse error on line {line}: invalid number `{literal}`")]
    InvalidNumber { literal: String, line: usize },
    #[error("parse error on line {line}: right side of `|>` must be a call, found {found}")]
    InvalidPipeTarget { found: String, line: usize },
    #[error("parse error on line {line}: expression nested deeper than {limit} levels")]
    TooDeeplyNested { limit: usize, line: usize },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { line, .. }
            | ParseError::IllegalCharacter { line, .. }
            | ParseError::UnterminatedString { line }
            | ParseError::InvalidNumber { line, .. }
            | ParseError::InvalidPipeTarget { line, .. }
            | ParseError::TooDeeplyNested { line, .. } => *line,
        }
    }
}

/// Parses a whole program, failing with every error found.
pub fn parse_program(source: &str) -> Result<Program, Vec<ParseError>> {
    let (program, errors) = parse_program_with_errors(source);
    if errors.is_empty() {
        Ok(program)
    } else {
        Err(errors)
    }
}

/// Parses a whole program, recovering at statement boundaries. The
/// returned program holds every statement that parsed cleanly.
pub fn parse_program_with_errors(source: &str) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(Lexer::new(source));
    parser.parse_program_with_errors()
}

/// Deepest expression nesting accepted before parsing gives up.
pub const MAX_NESTING: usize = 128;

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(mut lexer: Lexer<'a>) -> Self {
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            depth: 0,
        }
    }

    fn parse_program_with_errors(&mut self) -> (Program, Vec<ParseError>) {
        let mut statements = Vec::new();
        let mut errors = Vec::new();
        while self.current.kind != TokenKind::Eof {
            match self.parse_stmt() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    errors.push(err);
                    self.recover_to_stmt_boundary();
                }
            }
        }
        (Program { statements }, errors)
    }

    fn recover_to_stmt_boundary(&mut self) {
        if self.current.kind != TokenKind::Eof {
            self.advance();
        }
        loop {
            match self.current.kind {
                TokenKind::Semicolon | TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Let | TokenKind::Return | TokenKind::Eof => break,
                _ => self.advance(),
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.current.kind {
            TokenKind::Let => self.parse_let_stmt(),
            TokenKind::Return => self.parse_return_stmt(),
            TokenKind::Ident if self.peek_kind() == TokenKind::Assign => self.parse_assign_stmt(),
            _ => {
                let line = self.current.line;
                let expr = self.parse_expr()?;
                self.eat(TokenKind::Semicolon);
                Ok(Stmt::Expr { line, expr })
            }
        }
    }

    fn parse_let_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.current.line;
        self.advance();
        let mutable = self.eat(TokenKind::Mut);
        let name = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;
        let mut value = self.parse_expr()?;
        if let Expr::Function { name: fn_name, .. } = &mut value {
            if fn_name.is_none() {
                *fn_name = Some(name.name.clone());
            }
        }
        self.eat(TokenKind::Semicolon);
        Ok(Stmt::Let {
            line,
            name,
            mutable,
            value,
        })
    }

    fn parse_assign_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.current.line;
        let name = self.expect_ident()?;
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expr()?;
        self.eat(TokenKind::Semicolon);
        Ok(Stmt::Assign { line, name, value })
    }

    fn parse_return_stmt(&mut self) -> Result<Stmt, ParseError> {
        let line = self.current.line;
        self.advance();
        let value = match self.current.kind {
            TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof => None,
            _ => Some(self.parse_expr()?),
        };
        self.eat(TokenKind::Semicolon);
        Ok(Stmt::Return { line, value })
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let line = self.current.line;
        self.expect(TokenKind::LBrace)?;
        let mut statements = Vec::new();
        while !matches!(self.current.kind, TokenKind::RBrace | TokenKind::Eof) {
            statements.push(self.parse_stmt()?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Block { line, statements })
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_pipe)
    }

    /// Runs `parse` one nesting level deeper, failing past `MAX_NESTING`.
    fn nested(
        &mut self,
        parse: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::TooDeeplyNested {
                limit: MAX_NESTING,
                line: self.current.line,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_pipe(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_equality()?;
        while self.current.kind == TokenKind::Pipe {
            let line = self.current.line;
            self.advance();
            let target_line = self.current.line;
            let call = self.parse_equality()?;
            if !matches!(call, Expr::Call { .. } | Expr::SelfCall { .. }) {
                return Err(ParseError::InvalidPipeTarget {
                    found: call.to_string(),
                    line: target_line,
                });
            }
            expr = Expr::Pipe {
                line,
                value: Box::new(expr),
                call: Box::new(call),
            };
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.current.kind {
                TokenKind::EqualEqual => InfixOp::Eq,
                TokenKind::BangEqual => InfixOp::Neq,
                _ => break,
            };
            expr = self.finish_infix(expr, op, Self::parse_comparison)?;
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Less => InfixOp::Lt,
                TokenKind::Greater => InfixOp::Gt,
                _ => break,
            };
            expr = self.finish_infix(expr, op, Self::parse_term)?;
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => InfixOp::Add,
                TokenKind::Minus => InfixOp::Sub,
                _ => break,
            };
            expr = self.finish_infix(expr, op, Self::parse_factor)?;
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => InfixOp::Mul,
                TokenKind::Slash => InfixOp::Div,
                _ => break,
            };
            expr = self.finish_infix(expr, op, Self::parse_unary)?;
        }
        Ok(expr)
    }

    fn finish_infix(
        &mut self,
        left: Expr,
        op: InfixOp,
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let line = self.current.line;
        self.advance();
        let right = next(self)?;
        Ok(Expr::Infix {
            line,
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.current.kind {
            TokenKind::Minus => PrefixOp::Neg,
            TokenKind::Bang => PrefixOp::Not,
            _ => return self.parse_postfix(),
        };
        let line = self.current.line;
        self.advance();
        let right = self.nested(Self::parse_unary)?;
        Ok(Expr::Prefix {
            line,
            op,
            right: Box::new(right),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            let line = self.current.line;
            match self.current.kind {
                TokenKind::LParen => {
                    self.advance();
                    let args = self.parse_expr_list(TokenKind::RParen)?;
                    expr = Expr::Call {
                        line,
                        callee: Box::new(expr),
                        args,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(TokenKind::RBracket)?;
                    expr = Expr::Index {
                        line,
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let line = self.current.line;
        match self.current.kind {
            TokenKind::Int => {
                let value = self.current.literal.parse::<i64>().map_err(|_| {
                    ParseError::InvalidNumber {
                        literal: self.current.literal.clone(),
                        line,
                    }
                })?;
                self.advance();
                Ok(Expr::Int(value, line))
            }
            TokenKind::Float => {
                let value = self.current.literal.parse::<f64>().map_err(|_| {
                    ParseError::InvalidNumber {
                        literal: self.current.literal.clone(),
                        line,
                    }
                })?;
                self.advance();
                Ok(Expr::Float(value, line))
            }
            TokenKind::String => {
                let value = std::mem::take(&mut self.current.literal);
                self.advance();
                Ok(Expr::String(value, line))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true, line))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false, line))
            }
            TokenKind::Ident => Ok(Expr::Ident(self.expect_ident()?)),
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => {
                self.advance();
                let elements = self.parse_expr_list(TokenKind::RBracket)?;
                Ok(Expr::Array { line, elements })
            }
            TokenKind::LBrace => self.parse_hash_literal(),
            TokenKind::If => self.parse_if_expr(),
            TokenKind::Fn => {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                Ok(Expr::Function {
                    line,
                    name: None,
                    params,
                    body,
                })
            }
            TokenKind::Macro => {
                self.advance();
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                Ok(Expr::Macro { line, params, body })
            }
            TokenKind::Dollar => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(TokenKind::LParen)?;
                let args = self.parse_expr_list(TokenKind::RParen)?;
                Ok(Expr::SelfCall { line, name, args })
            }
            TokenKind::Illegal => Err(ParseError::IllegalCharacter {
                literal: self.current.literal.clone(),
                line,
            }),
            TokenKind::UnterminatedString => Err(ParseError::UnterminatedString { line }),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_hash_literal(&mut self) -> Result<Expr, ParseError> {
        let line = self.current.line;
        self.expect(TokenKind::LBrace)?;
        let mut pairs = Vec::new();
        while self.current.kind != TokenKind::RBrace {
            let key = self.parse_expr()?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            pairs.push((key, value));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::Hash { line, pairs })
    }

    fn parse_if_expr(&mut self) -> Result<Expr, ParseError> {
        let line = self.current.line;
        self.expect(TokenKind::If)?;
        let condition = self.parse_expr()?;
        let consequence = self.parse_block()?;
        let alternative = if self.eat(TokenKind::Else) {
            if self.current.kind == TokenKind::If {
                let nested_line = self.current.line;
                let nested = self.parse_if_expr()?;
                Some(Block {
                    line: nested_line,
                    statements: vec![Stmt::Expr {
                        line: nested_line,
                        expr: nested,
                    }],
                })
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(Expr::If {
            line,
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Ident>, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        while self.current.kind != TokenKind::RParen {
            params.push(self.expect_ident()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    /// Comma-separated expressions up to `end`; a trailing comma is allowed.
    /// The opening delimiter must already be consumed.
    fn parse_expr_list(&mut self, end: TokenKind) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        while self.current.kind != end {
            items.push(self.parse_expr()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(end)?;
        Ok(items)
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        if self.current.kind != TokenKind::Ident {
            return Err(self.unexpected("identifier"));
        }
        let ident = Ident::new(std::mem::take(&mut self.current.literal), self.current.line);
        self.advance();
        Ok(ident)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.current.kind == kind {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.current.kind == kind {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.current.kind {
            TokenKind::Illegal => ParseError::IllegalCharacter {
                literal: self.current.literal.clone(),
                line: self.current.line,
            },
            TokenKind::UnterminatedString => ParseError::UnterminatedString {
                line: self.current.line,
            },
            _ => ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: self.current.describe(),
                line: self.current.line,
            },
        }
    }

    fn advance(&mut self) {
        self.current = self.lexer.next_token();
    }

    fn peek_kind(&self) -> TokenKind {
        self.lexer.clone().next_token().kind
    }
}
