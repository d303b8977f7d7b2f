use std::collections::HashMap;

use vm86::Diagnostic;

use crate::ast::{Ast, BinOp, Expr, PrintArg, Stmt, StmtKind, UnaryOp};

const INPUT_PORT: u16 = 0;

/// Walks the AST and emits assembly text. Variables are backed by one RAM
/// word each, allocated lazily in first-use order starting at `0x0100`;
/// structured constructs claim a monotonically increasing id used to build
/// their labels.
pub struct Codegen {
    out: Vec<String>,
    vars: HashMap<String, u16>,
    next_addr: u32,
    counter: u32,
    diagnostics: Vec<Diagnostic>,
    exhausted: bool,
    src_line_counts: HashMap<u32, u32>,
}

type CResult = Result<(), ()>;

impl Codegen {
    fn new() -> Codegen {
        Codegen {
            out: Vec::new(),
            vars: HashMap::new(),
            next_addr: vm86::constants::VAR_BASE as u32,
            counter: 0,
            diagnostics: Vec::new(),
            exhausted: false,
            src_line_counts: HashMap::new(),
        }
    }

    fn emit(&mut self, line: impl Into<String>) {
        self.out.push(line.into());
    }

    fn emit_label(&mut self, label: &str) {
        self.out.push(format!("{}:", label));
    }

    fn next_id(&mut self) -> u32 {
        self.counter += 1;
        self.counter
    }

    fn src_label(&mut self, line: u32) -> String {
        let count = self.src_line_counts.entry(line).or_insert(0);
        *count += 1;
        if *count == 1 {
            format!("_SRC_{}", line)
        } else {
            format!("_SRC_{}_{}", line, count)
        }
    }

    fn var_addr(&mut self, name: &str, line: u32) -> Result<u32, ()> {
        if let Some(&addr) = self.vars.get(name) {
            return Ok(addr as u32);
        }
        if self.next_addr + 2 >= 4095 {
            if !self.exhausted {
                self.exhausted = true;
                self.diagnostics
                    .push(Diagnostic::error(line, "variable memory exhausted"));
            }
            return Err(());
        }
        let addr = self.next_addr as u16;
        self.vars.insert(name.to_string(), addr);
        self.next_addr += 2;
        Ok(addr as u32)
    }

    fn generate_expr(&mut self, line: u32, expr: &Expr) -> CResult {
        match expr {
            Expr::Number(n) => {
                self.emit(format!("MOV AX, {}", *n as i32));
                Ok(())
            }
            Expr::Bool(b) => {
                self.emit(format!("MOV AX, {}", if *b { 1 } else { 0 }));
                Ok(())
            }
            Expr::Str(_) => {
                self.diagnostics
                    .push(Diagnostic::error(line, "string literal not valid in this context"));
                Err(())
            }
            Expr::Ident(name) => {
                let addr = self.var_addr(name, line)?;
                self.emit(format!("MOV AX, [{:#06x}]", addr));
                Ok(())
            }
            Expr::Unary(UnaryOp::Neg, inner) => {
                self.generate_expr(line, inner)?;
                self.emit("NEG AX");
                Ok(())
            }
            Expr::Unary(UnaryOp::Not, inner) => {
                self.generate_expr(line, inner)?;
                let id = self.next_id();
                let true_label = format!("_nottrue_{}", id);
                let end_label = format!("_notend_{}", id);
                self.emit("CMP AX, 0");
                self.emit("MOV AX, 0");
                self.emit(format!("JNE {}", true_label));
                self.emit(format!("JMP {}", end_label));
                self.emit_label(&true_label);
                self.emit("MOV AX, 1");
                self.emit_label(&end_label);
                Ok(())
            }
            Expr::Binary(op, lhs, rhs) if op.is_comparison() => {
                self.generate_comparison(line, *op, lhs, rhs)
            }
            Expr::Binary(op @ (BinOp::And | BinOp::Or), lhs, rhs) => {
                self.generate_expr(line, lhs)?;
                self.emit("PUSH AX");
                self.generate_expr(line, rhs)?;
                self.emit("MOV BX, AX");
                self.emit("POP AX");
                self.emit(if *op == BinOp::And { "AND AX, BX" } else { "OR AX, BX" });
                Ok(())
            }
            Expr::Binary(op, lhs, rhs) => {
                self.generate_expr(line, lhs)?;
                self.emit("PUSH AX");
                self.generate_expr(line, rhs)?;
                self.emit("MOV BX, AX");
                self.emit("POP AX");
                match op {
                    BinOp::Add => self.emit("ADD AX, BX"),
                    BinOp::Sub => self.emit("SUB AX, BX"),
                    BinOp::Mul => self.emit("MUL BX"),
                    BinOp::Div => {
                        self.emit("MOV DX, 0");
                        self.emit("DIV BX");
                    }
                    BinOp::Mod => self.emit("MOD BX"),
                    _ => unreachable!("comparisons and and/or handled above"),
                }
                Ok(())
            }
        }
    }

    fn generate_comparison(&mut self, line: u32, op: BinOp, lhs: &Expr, rhs: &Expr) -> CResult {
        self.generate_expr(line, lhs)?;
        self.emit("PUSH AX");
        self.generate_expr(line, rhs)?;
        self.emit("MOV BX, AX");
        self.emit("POP AX");
        self.emit("CMP AX, BX");
        let id = self.next_id();
        let true_label = format!("_cmptrue_{}", id);
        let end_label = format!("_cmpend_{}", id);
        self.emit("MOV AX, 0");
        self.emit(format!("{} {}", jcc_mnemonic(op), true_label));
        self.emit(format!("JMP {}", end_label));
        self.emit_label(&true_label);
        self.emit("MOV AX, 1");
        self.emit_label(&end_label);
        Ok(())
    }

    /// Compiles `expr` as a branch condition: jumps to `on_true` or
    /// `on_false`, short-circuiting `and`/`or` rather than fully evaluating
    /// both sides the way expression context does.
    fn generate_condition(&mut self, line: u32, expr: &Expr, on_true: &str, on_false: &str) -> CResult {
        match expr {
            Expr::Binary(BinOp::And, lhs, rhs) => {
                let id = self.next_id();
                let mid = format!("_condmid_{}", id);
                self.generate_condition(line, lhs, &mid, on_false)?;
                self.emit_label(&mid);
                self.generate_condition(line, rhs, on_true, on_false)
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                let id = self.next_id();
                let mid = format!("_condmid_{}", id);
                self.generate_condition(line, lhs, on_true, &mid)?;
                self.emit_label(&mid);
                self.generate_condition(line, rhs, on_true, on_false)
            }
            Expr::Unary(UnaryOp::Not, inner) => self.generate_condition(line, inner, on_false, on_true),
            Expr::Binary(op, lhs, rhs) if op.is_comparison() => {
                self.generate_expr(line, lhs)?;
                self.emit("PUSH AX");
                self.generate_expr(line, rhs)?;
                self.emit("MOV BX, AX");
                self.emit("POP AX");
                self.emit("CMP AX, BX");
                self.emit(format!("{} {}", jcc_mnemonic(*op), on_true));
                self.emit(format!("JMP {}", on_false));
                Ok(())
            }
            _ => {
                self.generate_expr(line, expr)?;
                self.emit("CMP AX, 0");
                self.emit(format!("JNE {}", on_true));
                self.emit(format!("JMP {}", on_false));
                Ok(())
            }
        }
    }

    fn generate_step_value(&mut self, line: u32, step: &Option<Expr>) -> CResult {
        match step {
            Some(expr) => self.generate_expr(line, expr),
            None => {
                self.emit("MOV AX, 1");
                Ok(())
            }
        }
    }

    fn generate_stmt(&mut self, stmt: &Stmt) -> CResult {
        let label = self.src_label(stmt.line);
        self.emit_label(&label);
        match &stmt.kind {
            StmtKind::Assign { name, expr } => {
                self.generate_expr(stmt.line, expr)?;
                let addr = self.var_addr(name, stmt.line)?;
                self.emit(format!("MOV [{:#06x}], AX", addr));
                Ok(())
            }
            StmtKind::VarDecl { name, expr } => {
                let addr = self.var_addr(name, stmt.line)?;
                if let Some(expr) = expr {
                    self.generate_expr(stmt.line, expr)?;
                    self.emit(format!("MOV [{:#06x}], AX", addr));
                }
                Ok(())
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let id = self.next_id();
                let then_label = format!("_then_{}", id);
                let else_label = format!("_else_{}", id);
                let endif_label = format!("_endif_{}", id);
                let false_target = if else_branch.is_empty() {
                    endif_label.clone()
                } else {
                    else_label.clone()
                };
                self.generate_condition(stmt.line, cond, &then_label, &false_target)?;
                self.emit_label(&then_label);
                for s in then_branch {
                    self.generate_stmt(s)?;
                }
                if !else_branch.is_empty() {
                    self.emit(format!("JMP {}", endif_label));
                    self.emit_label(&else_label);
                    for s in else_branch {
                        self.generate_stmt(s)?;
                    }
                }
                self.emit_label(&endif_label);
                self.emit("NOP");
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let id = self.next_id();
                let while_label = format!("_while_{}", id);
                let body_label = format!("_whilebody_{}", id);
                let endwhile_label = format!("_endwhile_{}", id);
                self.emit_label(&while_label);
                self.generate_condition(stmt.line, cond, &body_label, &endwhile_label)?;
                self.emit_label(&body_label);
                for s in body {
                    self.generate_stmt(s)?;
                }
                self.emit(format!("JMP {}", while_label));
                self.emit_label(&endwhile_label);
                self.emit("NOP");
                Ok(())
            }
            StmtKind::For {
                var,
                from,
                to,
                step,
                body,
            } => {
                let id = self.next_id();
                let for_label = format!("_for_{}", id);
                let endfor_label = format!("_endfor_{}", id);

                self.generate_expr(stmt.line, from)?;
                let addr = self.var_addr(var, stmt.line)?;
                self.emit(format!("MOV [{:#06x}], AX", addr));

                let ascending = step.is_none() || matches!(step, Some(Expr::Number(n)) if *n >= 0);

                self.emit_label(&for_label);
                self.generate_expr(stmt.line, to)?;
                self.emit(format!("MOV BX, [{:#06x}]", addr));
                self.emit("CMP BX, AX");
                self.emit(format!(
                    "{} {}",
                    if ascending { "JG" } else { "JL" },
                    endfor_label
                ));

                for s in body {
                    self.generate_stmt(s)?;
                }

                self.generate_step_value(stmt.line, step)?;
                self.emit("MOV BX, AX");
                self.emit(format!("MOV AX, [{:#06x}]", addr));
                self.emit("ADD AX, BX");
                self.emit(format!("MOV [{:#06x}], AX", addr));
                self.emit(format!("JMP {}", for_label));
                self.emit_label(&endfor_label);
                self.emit("NOP");
                Ok(())
            }
            StmtKind::Print(PrintArg::Str(text)) => {
                for ch in text.chars() {
                    self.emit(format!("MOV AX, {}", ch as u32));
                    self.emit("OUTC AX");
                }
                Ok(())
            }
            StmtKind::Print(PrintArg::Expr(expr)) => {
                self.generate_expr(stmt.line, expr)?;
                self.emit("OUT AX");
                Ok(())
            }
            StmtKind::Input(name) => {
                let addr = self.var_addr(name, stmt.line)?;
                self.emit(format!("IN AX, {}", INPUT_PORT));
                self.emit(format!("MOV [{:#06x}], AX", addr));
                Ok(())
            }
        }
    }
}

fn jcc_mnemonic(op: BinOp) -> &'static str {
    match op {
        BinOp::Eq => "JE",
        BinOp::Ne => "JNE",
        BinOp::Lt => "JL",
        BinOp::Gt => "JG",
        BinOp::Le => "JLE",
        BinOp::Ge => "JGE",
        _ => unreachable!("not a comparison operator"),
    }
}

pub fn generate(ast: &Ast) -> (String, Vec<Diagnostic>) {
    let mut cg = Codegen::new();
    for stmt in &ast.statements {
        let _ = cg.generate_stmt(stmt);
    }
    cg.emit("HLT");
    (cg.out.join("\n"), cg.diagnostics)
}
