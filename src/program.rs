use std::collections::HashMap;

use crate::isa::{OpCode, Operand};

/// One assembled instruction slot. `opcode` is `None` when the mnemonic was
/// not recognized; the slot still exists so that label offsets collected in
/// the assembler's first pass stay valid (§4.4).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Instruction {
    pub mnemonic: String,
    pub opcode: Option<OpCode>,
    pub operands: Vec<Operand>,
    pub source_address: u16,
    pub raw_text: String,
}

impl Instruction {
    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    pub line: u32,
    pub message: String,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(line: u32, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            line,
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(line: u32, message: impl Into<String>) -> Diagnostic {
        Diagnostic {
            line,
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

/// The assembler's output: a flat, immutable instruction sequence addressed
/// by index (not by byte), a case-insensitive label table, and the ordered
/// diagnostics produced while assembling. `bytecode` is reserved for a future
/// binary encoding and is always empty.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub labels: HashMap<String, u16>,
    pub diagnostics: Vec<Diagnostic>,
    pub bytecode: Vec<u8>,
}

impl Program {
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn resolve_label(&self, name: &str) -> Option<u16> {
        self.labels.get(&name.to_ascii_uppercase()).copied()
    }

    pub fn instruction_at(&self, index: u16) -> Option<&Instruction> {
        self.instructions.get(index as usize)
    }
}
