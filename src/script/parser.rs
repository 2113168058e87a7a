//! Script parser - recursive descent over the token stream

use serde_json::Value;

use super::lexer::{Spanned, Tok};
use crate::error::{Result, TesseraError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Value),
    Var(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let(String, Expr),
    Assign(Expr, Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    Return(Option<Expr>),
    Expr(Expr),
}

const PRECEDENCE_LEVELS: usize = 6;

fn binary_op(level: usize, tok: &Tok) -> Option<BinOp> {
    Some(match (level, tok) {
        (0, Tok::Or) => BinOp::Or,
        (1, Tok::And) => BinOp::And,
        (2, Tok::Eq) => BinOp::Eq,
        (2, Tok::Ne) => BinOp::Ne,
        (3, Tok::Lt) => BinOp::Lt,
        (3, Tok::Le) => BinOp::Le,
        (3, Tok::Gt) => BinOp::Gt,
        (3, Tok::Ge) => BinOp::Ge,
        (4, Tok::Plus) => BinOp::Add,
        (4, Tok::Minus) => BinOp::Sub,
        (5, Tok::Star) => BinOp::Mul,
        (5, Tok::Slash) => BinOp::Div,
        (5, Tok::Percent) => BinOp::Rem,
        _ => return None,
    })
}

pub fn parse(name: &str, tokens: &[Spanned], source_len: usize) -> Result<Vec<Stmt>> {
    let mut parser = Parser {
        name,
        tokens,
        pos: 0,
        source_len,
    };
    let mut body = Vec::new();
    while !parser.at_end() {
        body.push(parser.statement()?);
    }
    Ok(body)
}

struct Parser<'a> {
    name: &'a str,
    tokens: &'a [Spanned],
    pos: usize,
    source_len: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn next(&mut self) -> Option<&Tok> {
        let tok = self.tokens.get(self.pos).map(|t| &t.tok);
        self.pos += 1;
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, details: impl Into<String>) -> TesseraError {
        TesseraError::ScriptParse {
            name: self.name.to_string(),
            position: self
                .tokens
                .get(self.pos)
                .map_or(self.source_len, |t| t.pos),
            details: details.into(),
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Tok::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    // ═══════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════

    fn statement(&mut self) -> Result<Stmt> {
        let stmt = match self.peek() {
            Some(Tok::Let) => {
                self.pos += 1;
                let name = self.ident()?;
                self.expect(&Tok::Assign, "'=' after let binding")?;
                Stmt::Let(name, self.expr()?)
            }
            Some(Tok::If) => return self.if_statement(),
            Some(Tok::Return) => {
                self.pos += 1;
                match self.peek() {
                    None | Some(Tok::Semi) | Some(Tok::RBrace) => Stmt::Return(None),
                    Some(_) => Stmt::Return(Some(self.expr()?)),
                }
            }
            _ => {
                let target = self.expr()?;
                if self.eat(&Tok::Assign) {
                    if !matches!(target, Expr::Var(_) | Expr::Member(..) | Expr::Index(..)) {
                        return Err(self.error("invalid assignment target"));
                    }
                    Stmt::Assign(target, self.expr()?)
                } else {
                    Stmt::Expr(target)
                }
            }
        };
        self.eat(&Tok::Semi);
        Ok(stmt)
    }

    fn if_statement(&mut self) -> Result<Stmt> {
        self.expect(&Tok::If, "'if'")?;
        self.expect(&Tok::LParen, "'(' after if")?;
        let cond = self.expr()?;
        self.expect(&Tok::RParen, "')' after condition")?;
        let then = self.block()?;
        let otherwise = if self.eat(&Tok::Else) {
            if self.peek() == Some(&Tok::If) {
                vec![self.if_statement()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If(cond, then, otherwise))
    }

    fn block(&mut self) -> Result<Vec<Stmt>> {
        if !self.eat(&Tok::LBrace) {
            return Ok(vec![self.statement()?]);
        }
        let mut body = Vec::new();
        while !self.eat(&Tok::RBrace) {
            if self.at_end() {
                return Err(self.error("expected '}'"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    // ═══════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════

    fn expr(&mut self) -> Result<Expr> {
        self.binary(0)
    }

    /// Precedence climbing; level 0 binds loosest
    fn binary(&mut self, level: usize) -> Result<Expr> {
        if level == PRECEDENCE_LEVELS {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        while let Some(op) = self.peek().and_then(|tok| binary_op(level, tok)) {
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat(&Tok::Not) {
            return Ok(Expr::Unary(UnOp::Not, Box::new(self.unary()?)));
        }
        if self.eat(&Tok::Minus) {
            return Ok(Expr::Unary(UnOp::Neg, Box::new(self.unary()?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Tok::Dot) {
                expr = Expr::Member(Box::new(expr), self.ident()?);
            } else if self.eat(&Tok::LBracket) {
                let index = self.expr()?;
                self.expect(&Tok::RBracket, "']'")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat(&Tok::LParen) {
                let args = self.list(&Tok::RParen)?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to `close`
    fn list(&mut self, close: &Tok) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expr()?);
            if !self.eat(&Tok::Comma) {
                self.expect(close, "closing delimiter")?;
                break;
            }
        }
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr> {
        let expr = match self.next().cloned() {
            Some(Tok::Number(n)) => Expr::Lit(super::eval::number(n)),
            Some(Tok::Str(s)) => Expr::Lit(Value::String(s)),
            Some(Tok::True) => Expr::Lit(Value::Bool(true)),
            Some(Tok::False) => Expr::Lit(Value::Bool(false)),
            Some(Tok::Null) => Expr::Lit(Value::Null),
            Some(Tok::Ident(name)) => Expr::Var(name),
            Some(Tok::LParen) => {
                let inner = self.expr()?;
                self.expect(&Tok::RParen, "')'")?;
                inner
            }
            Some(Tok::LBracket) => Expr::Array(self.list(&Tok::RBracket)?),
            Some(Tok::LBrace) => {
                let mut fields = Vec::new();
                while !self.eat(&Tok::RBrace) {
                    let key = match self.next().cloned() {
                        Some(Tok::Ident(k)) | Some(Tok::Str(k)) => k,
                        _ => {
                            self.pos -= 1;
                            return Err(self.error("expected object key"));
                        }
                    };
                    self.expect(&Tok::Colon, "':' after object key")?;
                    fields.push((key, self.expr()?));
                    if !self.eat(&Tok::Comma) {
                        self.expect(&Tok::RBrace, "'}'")?;
                        break;
                    }
                }
                Expr::Object(fields)
            }
            _ => {
                self.pos -= 1;
                return Err(self.error("expected expression"));
            }
        };
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::lexer::tokenize;

    fn parse_src(src: &str) -> Result<Vec<Stmt>> {
        parse("t", &tokenize("t", src)?, src.len())
    }

    #[test]
    fn precedence() {
        let body = parse_src("1 + 2 * 3 == 7 && !false").unwrap();
        let Stmt::Expr(Expr::Binary(BinOp::And, lhs, _)) = &body[0] else {
            panic!("expected &&, got {body:?}");
        };
        assert!(matches!(**lhs, Expr::Binary(BinOp::Eq, ..)));
    }

    #[test]
    fn assignment_and_calls() {
        let body = parse_src("label.textContent = str(data.n); self.update()").unwrap();
        assert_eq!(body.len(), 2);
        assert!(matches!(&body[0], Stmt::Assign(Expr::Member(_, prop), _) if prop == "textContent"));
        assert!(matches!(&body[1], Stmt::Expr(Expr::Call(_, args)) if args.is_empty()));
    }

    #[test]
    fn if_else_chain() {
        let body =
            parse_src("if (data.x > 1) { state.big = true } else if (data.x < 0) state.neg = true; else { return }")
                .unwrap();
        let Stmt::If(_, then, otherwise) = &body[0] else {
            panic!("expected if");
        };
        assert_eq!(then.len(), 1);
        assert!(matches!(&otherwise[0], Stmt::If(_, _, e) if e.len() == 1));
    }

    #[test]
    fn literals() {
        let body = parse_src("let o = {a: [1, 'two'], \"b\": null}").unwrap();
        assert!(matches!(&body[0], Stmt::Let(name, Expr::Object(fields)) if name == "o" && fields.len() == 2));
    }

    #[test]
    fn rejects_bad_target() {
        let err = parse_src("1 + 2 = 3").unwrap_err();
        assert!(err.to_string().contains("invalid assignment target"));
    }

    #[test]
    fn reports_position() {
        let err = parse_src("let = 3").unwrap_err();
        match err {
            TesseraError::ScriptParse { position, .. } => assert_eq!(position, 4),
            other => panic!("unexpected: {other}"),
        }
    }
}
