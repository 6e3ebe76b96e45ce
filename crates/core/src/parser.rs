//! Recursive-descent expression parser.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr       := additive (cmp_op additive)?
//! additive   := term (('+' | '-') term)*
//! term       := power (('*' | '/' | '%') power)*
//! power      := unary ('**' power)?
//! unary      := '-' unary | primary
//! primary    := number | string | true | false | null
//!             | ident ('(' (expr (',' expr)*)? ')')?
//!             | '(' expr ')'
//! ```
//!
//! Unary minus binds tighter than `**`, so `-2 ** 2` is `(-2) ** 2`.
//! `**` is right-associative. Comparisons do not chain.

use crate::ast::{BinaryOp, CompareOp, Expr, UnaryOp};
use crate::error::ParseError;
use crate::lexer::{lex, Spanned, Token};

/// Tokenize and parse one expression.
pub fn parse_expression(src: &str) -> Result<Expr, ParseError> {
    let tokens = lex(src)?;
    let mut p = Parser::new(&tokens);
    if p.peek() == &Token::Eof {
        return Err(p.err("empty expression"));
    }
    let e = p.parse_expr()?;
    if p.peek() != &Token::Eof {
        return Err(p.err(format!("unexpected {}", describe(p.peek()))));
    }
    Ok(e)
}

/// Parse the right-hand side of a subject-relative shorthand such as
/// `">= 80"`. Returns `None` when the text does not start with a
/// relational operator.
pub fn parse_subject_comparison(src: &str) -> Result<Option<(CompareOp, Expr)>, ParseError> {
    let tokens = lex(src)?;
    let mut p = Parser::new(&tokens);
    let op = match compare_op(p.peek()) {
        Some(op) => op,
        None => return Ok(None),
    };
    p.advance();
    let rhs = p.parse_additive()?;
    if p.peek() != &Token::Eof {
        return Err(p.err(format!("unexpected {}", describe(p.peek()))));
    }
    Ok(Some((op, rhs)))
}

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned]) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn advance(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn err(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(self.cur().offset, msg)
    }

    fn expect_rparen(&mut self) -> Result<(), ParseError> {
        if self.peek() == &Token::RParen {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected ')', got {}", describe(self.peek()))))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        if let Some(op) = compare_op(self.peek()) {
            self.advance();
            let rhs = self.parse_additive()?;
            if compare_op(self.peek()).is_some() {
                return Err(self.err("comparison operators cannot be chained"));
            }
            return Ok(Expr::Binary {
                op: BinaryOp::Compare(op),
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_power()?;
            left = Expr::Binary {
                op,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_unary()?;
        if self.peek() == &Token::StarStar {
            self.advance();
            // Right-associative: the exponent is itself a power expression.
            let exponent = self.parse_power()?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == &Token::Minus {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Token::Ident(w) if w == "true" => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            Token::Ident(w) if w == "false" => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            Token::Ident(w) if w == "null" => {
                self.advance();
                Ok(Expr::Null)
            }
            Token::Ident(name) => {
                let offset = self.cur().offset;
                self.advance();
                if self.peek() == &Token::LParen {
                    if name.starts_with('$') {
                        return Err(ParseError::new(
                            offset,
                            format!("'{}' is a variable and cannot be called", name),
                        ));
                    }
                    self.advance();
                    let args = self.parse_args()?;
                    return Ok(Expr::Call { name, args });
                }
                Ok(Expr::var(&name))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(Expr::Group(Box::new(inner)))
            }
            other => Err(self.err(format!("expected operand, got {}", describe(&other)))),
        }
    }

    /// Arguments after the opening parenthesis, consuming the closing one.
    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek() == &Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.peek() {
                Token::Comma => {
                    self.advance();
                }
                Token::RParen => {
                    self.advance();
                    return Ok(args);
                }
                other => {
                    return Err(self.err(format!(
                        "expected ',' or ')' in argument list, got {}",
                        describe(other)
                    )))
                }
            }
        }
    }
}

fn compare_op(t: &Token) -> Option<CompareOp> {
    match t {
        Token::EqEq => Some(CompareOp::Eq),
        Token::Neq => Some(CompareOp::Ne),
        Token::Lt => Some(CompareOp::Lt),
        Token::Lte => Some(CompareOp::Lte),
        Token::Gt => Some(CompareOp::Gt),
        Token::Gte => Some(CompareOp::Gte),
        _ => None,
    }
}

fn describe(t: &Token) -> String {
    match t {
        Token::Ident(w) => format!("identifier '{}'", w),
        Token::Str(s) => format!("string \"{}\"", s),
        Token::Number(n) => format!("number {}", n),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Comma => "','".into(),
        Token::Plus => "'+'".into(),
        Token::Minus => "'-'".into(),
        Token::Star => "'*'".into(),
        Token::StarStar => "'**'".into(),
        Token::Slash => "'/'".into(),
        Token::Percent => "'%'".into(),
        Token::EqEq => "'=='".into(),
        Token::Neq => "'!='".into(),
        Token::Lt => "'<'".into(),
        Token::Lte => "'<='".into(),
        Token::Gt => "'>'".into(),
        Token::Gte => "'>='".into(),
        Token::Eof => "end of expression".into(),
    }
}
