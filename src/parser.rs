// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::ast::*;
use crate::lexer::*;
use crate::number::Number;

use core::str::FromStr;
use std::rc::Rc;

use anyhow::Result;

#[derive(Clone)]
pub struct Parser<'source> {
    source: Source,
    lexer: Lexer<'source>,
    tok: Token,
}

impl<'source> Parser<'source> {
    pub fn new(source: &'source Source) -> Result<Self> {
        let mut lexer = Lexer::new(source);
        let tok = lexer.next_token()?;
        Ok(Self {
            source: source.clone(),
            lexer,
            tok,
        })
    }

    pub fn token_text(&self) -> &str {
        match self.tok.0 {
            TokenKind::Symbol | TokenKind::Number | TokenKind::Ident | TokenKind::Eof => {
                self.tok.1.text()
            }
            TokenKind::String => "",
        }
    }

    fn next_token(&mut self) -> Result<()> {
        self.tok = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, text: &str, context: &str) -> Result<()> {
        if self.token_text() == text {
            self.next_token()
        } else {
            let msg = format!("expecting `{text}` {context}");
            Err(self.source.error(self.tok.1.line, self.tok.1.col, &msg))
        }
    }

    // Lambda heads are disambiguated from parenthesized expressions by
    // attempting the head with bounded lookahead and restoring the
    // lexer on failure.
    fn save_state(&self) -> (Lexer<'source>, Token) {
        (self.lexer.clone(), self.tok.clone())
    }

    fn restore_state(&mut self, state: (Lexer<'source>, Token)) {
        (self.lexer, self.tok) = state;
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub fn parse(&mut self) -> Result<Expr> {
        let expr = self.parse_expr()?;
        if self.tok.0 != TokenKind::Eof {
            return Err(self.tok.1.error("unexpected trailing characters"));
        }
        Ok(expr)
    }

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr> {
        let cond = self.parse_or()?;
        if self.token_text() != "?" {
            return Ok(cond);
        }
        let span = self.tok.1.clone();
        self.next_token()?;
        let then = self.parse_expr()?;
        self.expect(":", "in ternary expression")?;
        let els = self.parse_ternary()?;
        Ok(Expr::Ternary {
            span,
            cond: Box::new(cond),
            then: Box::new(then),
            els: Box::new(els),
        })
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;
        while matches!(self.token_text(), "or" | "||") {
            let span = self.tok.1.clone();
            self.next_token()?;
            let rhs = self.parse_and()?;
            expr = Expr::Binary {
                span,
                op: BinOp::Or,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_coalesce()?;
        while matches!(self.token_text(), "and" | "&&") {
            let span = self.tok.1.clone();
            self.next_token()?;
            let rhs = self.parse_coalesce()?;
            expr = Expr::Binary {
                span,
                op: BinOp::And,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_coalesce(&mut self) -> Result<Expr> {
        let mut expr = self.parse_equality()?;
        while self.token_text() == "??" {
            let span = self.tok.1.clone();
            self.next_token()?;
            let rhs = self.parse_equality()?;
            expr = Expr::Binary {
                span,
                op: BinOp::NullCoalesce,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> Result<Expr> {
        let mut expr = self.parse_relational()?;
        loop {
            let op = match self.token_text() {
                "==" => BinOp::Eq,
                "!=" => BinOp::Ne,
                _ => break,
            };
            let span = self.tok.1.clone();
            self.next_token()?;
            let rhs = self.parse_relational()?;
            expr = Expr::Binary {
                span,
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_relational(&mut self) -> Result<Expr> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.token_text() {
                "<" => BinOp::Lt,
                "<=" => BinOp::Le,
                ">" => BinOp::Gt,
                ">=" => BinOp::Ge,
                _ => break,
            };
            let span = self.tok.1.clone();
            self.next_token()?;
            let rhs = self.parse_additive()?;
            expr = Expr::Binary {
                span,
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.token_text() {
                "+" => BinOp::Add,
                "-" => BinOp::Sub,
                _ => break,
            };
            let span = self.tok.1.clone();
            self.next_token()?;
            let rhs = self.parse_multiplicative()?;
            expr = Expr::Binary {
                span,
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut expr = self.parse_power()?;
        loop {
            let op = match self.token_text() {
                "*" => BinOp::Mul,
                "/" => BinOp::Div,
                "%" => BinOp::Mod,
                _ => break,
            };
            let span = self.tok.1.clone();
            self.next_token()?;
            let rhs = self.parse_power()?;
            expr = Expr::Binary {
                span,
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        Ok(expr)
    }

    // `**` is right-associative: a ** b ** c == a ** (b ** c).
    fn parse_power(&mut self) -> Result<Expr> {
        let lhs = self.parse_unary()?;
        if self.token_text() != "**" {
            return Ok(lhs);
        }
        let span = self.tok.1.clone();
        self.next_token()?;
        let rhs = self.parse_power()?;
        Ok(Expr::Binary {
            span,
            op: BinOp::Pow,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.token_text() {
            "+" => UnaryOp::Plus,
            "-" => UnaryOp::Minus,
            "!" | "not" => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let span = self.tok.1.clone();
        self.next_token()?;
        let expr = self.parse_unary()?;
        Ok(Expr::Unary {
            span,
            op,
            expr: Box::new(expr),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.token_text() {
                "." => {
                    let span = self.tok.1.clone();
                    self.next_token()?;
                    if self.tok.0 != TokenKind::Ident {
                        return Err(self.tok.1.error("expecting identifier after `.`"));
                    }
                    let field: Rc<str> = self.tok.1.text().into();
                    self.next_token()?;
                    expr = Expr::Member {
                        span,
                        recv: Box::new(expr),
                        field,
                    };
                }
                "[" => {
                    let span = self.tok.1.clone();
                    self.next_token()?;
                    let index = self.parse_expr()?;
                    self.expect("]", "to close index expression")?;
                    expr = Expr::IndexAccess {
                        span,
                        recv: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                "(" => {
                    let span = self.tok.1.clone();
                    self.next_token()?;
                    let mut args = vec![];
                    if self.token_text() != ")" {
                        loop {
                            args.push(self.parse_expr()?);
                            if self.token_text() != "," {
                                break;
                            }
                            self.next_token()?;
                        }
                    }
                    self.expect(")", "to close call arguments")?;
                    expr = Expr::Call {
                        span,
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    // `(p1, p2) => body`. Returns None, with parser state restored,
    // when the tokens do not form a lambda head.
    fn try_parse_lambda(&mut self) -> Result<Option<Expr>> {
        let state = self.save_state();
        let span = self.tok.1.clone();
        self.next_token()?; // (

        let mut params: Vec<Rc<str>> = vec![];
        if self.token_text() != ")" {
            loop {
                if self.tok.0 != TokenKind::Ident {
                    self.restore_state(state);
                    return Ok(None);
                }
                params.push(self.tok.1.text().into());
                self.next_token()?;
                match self.token_text() {
                    "," => self.next_token()?,
                    _ => break,
                }
            }
        }
        if self.token_text() != ")" {
            self.restore_state(state);
            return Ok(None);
        }
        self.next_token()?;
        if self.token_text() != "=>" {
            self.restore_state(state);
            return Ok(None);
        }
        self.next_token()?;
        let body = self.parse_expr()?;
        Ok(Some(Expr::Lambda {
            span,
            params,
            body: Rc::new(body),
        }))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let span = self.tok.1.clone();
        match self.tok.0 {
            TokenKind::Number => {
                let value = Number::from_str(span.text())
                    .map_err(|_| span.error("invalid number"))?;
                self.next_token()?;
                Ok(Expr::Number(span, value))
            }
            TokenKind::String => {
                let value: Rc<str> = unescape_string(span.text())?.into();
                self.next_token()?;
                Ok(Expr::String(span, value))
            }
            TokenKind::Ident => {
                let text = span.text();
                match text {
                    "true" | "false" => {
                        let value = text == "true";
                        self.next_token()?;
                        Ok(Expr::Bool(span, value))
                    }
                    "null" => {
                        self.next_token()?;
                        Ok(Expr::Null(span))
                    }
                    _ => {
                        let name: Rc<str> = text.into();
                        self.next_token()?;
                        // `x => body` is a single-parameter lambda.
                        if self.token_text() == "=>" {
                            self.next_token()?;
                            let body = self.parse_expr()?;
                            return Ok(Expr::Lambda {
                                span,
                                params: vec![name],
                                body: Rc::new(body),
                            });
                        }
                        Ok(Expr::Ident(span, name))
                    }
                }
            }
            TokenKind::Symbol => match span.text() {
                "(" => {
                    if let Some(lambda) = self.try_parse_lambda()? {
                        return Ok(lambda);
                    }
                    self.next_token()?;
                    let expr = self.parse_expr()?;
                    self.expect(")", "to close parenthesized expression")?;
                    Ok(expr)
                }
                "[" => {
                    self.next_token()?;
                    let mut items = vec![];
                    if self.token_text() != "]" {
                        loop {
                            items.push(self.parse_expr()?);
                            if self.token_text() != "," {
                                break;
                            }
                            self.next_token()?;
                        }
                    }
                    self.expect("]", "to close array literal")?;
                    Ok(Expr::Array { span, items })
                }
                "{" => {
                    self.next_token()?;
                    let mut fields = vec![];
                    if self.token_text() != "}" {
                        loop {
                            let key: Rc<str> = match self.tok.0 {
                                TokenKind::Ident => self.tok.1.text().into(),
                                TokenKind::String => unescape_string(self.tok.1.text())?.into(),
                                _ => return Err(self.tok.1.error("expecting object key")),
                            };
                            self.next_token()?;
                            self.expect(":", "after object key")?;
                            fields.push((key, self.parse_expr()?));
                            if self.token_text() != "," {
                                break;
                            }
                            self.next_token()?;
                        }
                    }
                    self.expect("}", "to close object literal")?;
                    Ok(Expr::Object { span, fields })
                }
                _ => Err(span.error("unexpected token")),
            },
            TokenKind::Eof => Err(span.error("unexpected end of expression")),
        }
    }
}

/// Parse an expression snippet taken from a document property.
pub fn parse_expression(property: &str, text: &str) -> Result<Expr> {
    let source = Source::from_expression(property, text)?;
    let mut parser = Parser::new(&source)?;
    parser.parse()
}
