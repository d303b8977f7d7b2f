use vm86::Diagnostic;

use crate::ast::{Ast, BinOp, Expr, PrintArg, Stmt, StmtKind, UnaryOp};
use crate::token::{Token, TokenKind};

/// Recursive-descent parser with statement-level error recovery: a
/// statement that fails to parse is skipped up to the next `NEWLINE` and
/// parsing continues, per the source language's error policy.
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    diagnostics: Vec<Diagnostic>,
}

type PResult<T> = Result<T, ()>;

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Parser<'a> {
        Parser {
            tokens,
            pos: 0,
            diagnostics: Vec::new(),
        }
    }

    pub fn parse(mut self) -> (Ast, Vec<Diagnostic>) {
        self.skip_newlines();
        let name = if self.current().is_keyword("program") {
            self.advance();
            let name = if self.current().kind == TokenKind::Identifier {
                let n = self.current().text.clone();
                self.advance();
                Some(n)
            } else {
                self.error("expected program name after 'program'");
                None
            };
            self.skip_newlines();
            name
        } else {
            None
        };

        let statements = self.parse_block(&[]);
        (Ast { name, statements }, self.diagnostics)
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let t = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn skip_newlines(&mut self) {
        while self.current().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn skip_to_newline(&mut self) {
        while self.current().kind != TokenKind::Newline && !self.at_end() {
            self.advance();
        }
        if self.current().kind == TokenKind::Newline {
            self.advance();
        }
    }

    fn error(&mut self, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::error(self.current().line, message.into()));
    }

    fn expect_operator(&mut self, op: &str) -> PResult<()> {
        if self.current().is_operator(op) {
            self.advance();
            Ok(())
        } else {
            self.error(format!("expected '{}'", op));
            Err(())
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> PResult<()> {
        if self.current().is_keyword(kw) {
            self.advance();
            Ok(())
        } else {
            self.error(format!("expected '{}'", kw));
            Err(())
        }
    }

    fn expect_identifier(&mut self) -> PResult<String> {
        if self.current().kind == TokenKind::Identifier {
            Ok(self.advance().text)
        } else {
            self.error("expected identifier");
            Err(())
        }
    }

    /// Parses statements until EOF or a keyword in `stop_keywords` is seen
    /// (without consuming the stop keyword).
    fn parse_block(&mut self, stop_keywords: &[&str]) -> Vec<Stmt> {
        let mut statements = Vec::new();
        loop {
            self.skip_newlines();
            if self.at_end() {
                break;
            }
            if stop_keywords
                .iter()
                .any(|kw| self.current().is_keyword(kw))
            {
                break;
            }
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(()) => self.skip_to_newline(),
            }
        }
        statements
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let line = self.current().line;
        let kind = if self.current().is_keyword("var") {
            self.parse_var_decl()?
        } else if self.current().is_keyword("if") {
            self.parse_if()?
        } else if self.current().is_keyword("while") {
            self.parse_while()?
        } else if self.current().is_keyword("for") {
            self.parse_for()?
        } else if self.current().is_keyword("print") {
            self.parse_print()?
        } else if self.current().is_keyword("input") {
            self.parse_input()?
        } else if self.current().kind == TokenKind::Identifier {
            self.parse_assignment()?
        } else {
            self.error("expected statement");
            return Err(());
        };
        Ok(Stmt { line, kind })
    }

    fn parse_assignment(&mut self) -> PResult<StmtKind> {
        let name = self.expect_identifier()?;
        self.expect_operator("=")?;
        let expr = self.parse_expr()?;
        Ok(StmtKind::Assign { name, expr })
    }

    fn parse_var_decl(&mut self) -> PResult<StmtKind> {
        self.advance();
        let name = self.expect_identifier()?;
        let expr = if self.current().is_operator("=") {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(StmtKind::VarDecl { name, expr })
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        self.advance();
        let cond = self.parse_expr()?;
        if self.current().is_keyword("then") {
            self.advance();
        }
        let then_branch = self.parse_block(&["else", "end"]);
        let else_branch = if self.current().is_keyword("else") {
            self.advance();
            self.parse_block(&["end"])
        } else {
            Vec::new()
        };
        if self.current().is_keyword("end") {
            self.advance();
        } else {
            self.error("expected 'end' to close 'if'");
        }
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_while(&mut self) -> PResult<StmtKind> {
        self.advance();
        let cond = self.parse_expr()?;
        if self.current().is_keyword("do") {
            self.advance();
        }
        let body = self.parse_block(&["end"]);
        if self.current().is_keyword("end") {
            self.advance();
        } else {
            self.error("expected 'end' to close 'while'");
        }
        Ok(StmtKind::While { cond, body })
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.advance();
        let var = self.expect_identifier()?;
        self.expect_operator("=")?;
        let from = self.parse_expr()?;
        self.expect_keyword("to")?;
        let to = self.parse_expr()?;
        let step = if self.current().is_keyword("step") {
            self.advance();
            Some(self.parse_expr()?)
        } else {
            None
        };
        let body = self.parse_block(&["end"]);
        if self.current().is_keyword("end") {
            self.advance();
        } else {
            self.error("expected 'end' to close 'for'");
        }
        Ok(StmtKind::For {
            var,
            from,
            to,
            step,
            body,
        })
    }

    fn parse_print(&mut self) -> PResult<StmtKind> {
        self.advance();
        if self.current().kind == TokenKind::String {
            let text = self.advance().text;
            Ok(StmtKind::Print(PrintArg::Str(text)))
        } else {
            Ok(StmtKind::Print(PrintArg::Expr(self.parse_expr()?)))
        }
    }

    fn parse_input(&mut self) -> PResult<StmtKind> {
        self.advance();
        let name = self.expect_identifier()?;
        Ok(StmtKind::Input(name))
    }

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.current().is_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_cmp()?;
        while self.current().is_keyword("and") {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_add()?;
        loop {
            let op = match self.current().text.as_str() {
                "==" if self.current().kind == TokenKind::Operator => BinOp::Eq,
                "!=" if self.current().kind == TokenKind::Operator => BinOp::Ne,
                "<=" if self.current().kind == TokenKind::Operator => BinOp::Le,
                ">=" if self.current().kind == TokenKind::Operator => BinOp::Ge,
                "<" if self.current().kind == TokenKind::Operator => BinOp::Lt,
                ">" if self.current().kind == TokenKind::Operator => BinOp::Gt,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_add()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_add(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.current().text.as_str() {
                "+" if self.current().kind == TokenKind::Operator => BinOp::Add,
                "-" if self.current().kind == TokenKind::Operator => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.current().text.as_str() {
                "*" if self.current().kind == TokenKind::Operator => BinOp::Mul,
                "/" if self.current().kind == TokenKind::Operator => BinOp::Div,
                "%" if self.current().kind == TokenKind::Operator => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        if self.current().is_operator("-") {
            self.advance();
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        if self.current().is_keyword("not") {
            self.advance();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Number => {
                self.advance();
                match vm86::numbers::parse_immediate(&token.text) {
                    Some(v) => Ok(Expr::Number(v)),
                    None => {
                        self.error(format!("invalid number literal '{}'", token.text));
                        Err(())
                    }
                }
            }
            TokenKind::String => {
                self.advance();
                Ok(Expr::Str(token.text))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Ident(token.text))
            }
            TokenKind::Keyword if token.text == "true" => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::Keyword if token.text == "false" => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Operator if token.text == "(" => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_operator(")")?;
                Ok(inner)
            }
            _ => {
                self.error("expected expression");
                Err(())
            }
        }
    }
}

pub fn parse(tokens: &[Token]) -> (Ast, Vec<Diagnostic>) {
    Parser::new(tokens).parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(src: &str) -> (Ast, Vec<Diagnostic>) {
        let (tokens, lex_diags) = tokenize(src);
        assert!(lex_diags.is_empty(), "{:?}", lex_diags);
        parse(&tokens)
    }

    #[test]
    fn parses_countdown_program() {
        let (ast, diags) = parse_source(
            "x = 10\nwhile x > 0\n  print x\n  x = x - 1\nend\nprint 0\n",
        );
        assert!(diags.is_empty(), "{:?}", diags);
        assert_eq!(ast.statements.len(), 3);
        match &ast.statements[1].kind {
            StmtKind::While { body, .. } => assert_eq!(body.len(), 2),
            other => panic!("expected while, got {:?}", other),
        }
    }

    #[test]
    fn unclosed_if_reports_diagnostic_but_still_parses() {
        let (ast, diags) = parse_source("if x > 0\nprint x\n");
        assert!(!diags.is_empty());
        assert_eq!(ast.statements.len(), 1);
    }

    #[test]
    fn precedence_is_left_associative_and_climbs_correctly() {
        let (ast, diags) = parse_source("y = 1 + 2 * 3 == 7 and true\n");
        assert!(diags.is_empty(), "{:?}", diags);
        match &ast.statements[0].kind {
            StmtKind::Assign { expr, .. } => {
                assert!(matches!(expr, Expr::Binary(BinOp::And, _, _)));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn bad_statement_is_skipped_and_parsing_continues() {
        let (ast, diags) = parse_source("42\nx = 1\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(ast.statements.len(), 1);
    }
}
