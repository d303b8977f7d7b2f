//! Two-pass assembler: turns assembly text into a [`vm86::Program`].
//!
//! Pass 1 walks the text collecting labels and counting instruction slots.
//! Pass 2 walks it again, this time actually parsing each instruction's
//! opcode and operands against the label table built in pass 1.

use std::collections::HashMap;

use util::EnumFromStr;
use vm86::{Diagnostic, Instruction, MemRef, OpCode, Operand, Program, RegisterId};

pub fn assemble(text: &str) -> Program {
    let lines: Vec<&str> = text.lines().collect();
    let mut labels: HashMap<String, u16> = HashMap::new();
    let mut diagnostics = Vec::new();
    let mut index: u16 = 0;

    for (i, raw_line) in lines.iter().enumerate() {
        let line_no = (i + 1) as u32;
        let trimmed = strip_comment(raw_line).trim();
        if trimmed.is_empty() {
            continue;
        }
        let (label, rest) = split_label(trimmed);
        if let Some(label) = label {
            let upper = label.to_ascii_uppercase();
            if let std::collections::hash_map::Entry::Vacant(e) = labels.entry(upper) {
                e.insert(index);
            } else {
                diagnostics.push(Diagnostic::error(
                    line_no,
                    format!("duplicate label '{}'", label),
                ));
            }
            if !rest.trim().is_empty() {
                index += 1;
            }
        } else {
            index += 1;
        }
    }

    let mut instructions = Vec::new();
    for (i, raw_line) in lines.iter().enumerate() {
        let line_no = (i + 1) as u32;
        let trimmed = strip_comment(raw_line).trim();
        if trimmed.is_empty() {
            continue;
        }
        let (label, rest) = split_label(trimmed);
        let instr_text = match label {
            Some(_) => rest.trim(),
            None => trimmed,
        };
        if instr_text.is_empty() {
            continue;
        }
        let source_address = instructions.len() as u16;
        let instruction = parse_instruction(instr_text, line_no, raw_line, &mut diagnostics, source_address);
        instructions.push(instruction);
    }

    let needs_hlt = !matches!(instructions.last(), Some(i) if i.opcode == Some(OpCode::Hlt));
    if needs_hlt {
        let source_address = instructions.len() as u16;
        instructions.push(Instruction {
            mnemonic: "HLT".to_string(),
            opcode: Some(OpCode::Hlt),
            operands: Vec::new(),
            source_address,
            raw_text: String::new(),
        });
    }

    Program {
        instructions,
        labels,
        diagnostics,
        bytecode: Vec::new(),
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn is_valid_label_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn split_label(line: &str) -> (Option<&str>, &str) {
    if let Some(idx) = line.find(':') {
        let candidate = line[..idx].trim();
        if is_valid_label_ident(candidate) {
            return (Some(candidate), &line[idx + 1..]);
        }
    }
    (None, line)
}

fn parse_register(text: &str) -> Option<RegisterId> {
    RegisterId::from_str(&text.trim().to_ascii_uppercase()).ok()
}

fn parse_operand(piece: &str) -> Result<Operand, String> {
    let piece = piece.trim();
    if let Some(inner) = piece.strip_prefix('[') {
        let inner = inner
            .strip_suffix(']')
            .ok_or_else(|| format!("unterminated memory operand '{}'", piece))?;
        return parse_memory(inner.trim());
    }
    if let Some(reg) = parse_register(piece) {
        return Ok(Operand::Reg(reg));
    }
    if let Some(value) = vm86::numbers::parse_immediate(piece) {
        return Ok(Operand::Imm(value as i16));
    }
    if is_valid_label_ident(piece) {
        return Ok(Operand::Label(piece.to_string()));
    }
    Err(format!("invalid operand '{}'", piece))
}

fn parse_memory(inner: &str) -> Result<Operand, String> {
    if inner.is_empty() {
        return Err("empty memory operand".to_string());
    }
    if let Some(reg) = parse_register(inner) {
        return Ok(Operand::Mem(MemRef::Based { base: reg, disp: 0 }));
    }
    for (sep, sign) in [('+', 1i32), ('-', -1i32)] {
        if let Some(pos) = inner.find(sep) {
            let (reg_part, off_part) = inner.split_at(pos);
            let off_part = &off_part[1..];
            if let Some(reg) = parse_register(reg_part.trim()) {
                if let Some(off) = vm86::numbers::parse_immediate(off_part.trim()) {
                    return Ok(Operand::Mem(MemRef::Based {
                        base: reg,
                        disp: (sign * off as i32) as i16,
                    }));
                }
            }
        }
    }
    if let Some(value) = vm86::numbers::parse_immediate(inner) {
        return Ok(Operand::Mem(MemRef::Absolute(value as u16)));
    }
    Err(format!("invalid memory operand '[{}]'", inner))
}

/// Validates operand count and classes against the per-opcode table.
fn validate(opcode: OpCode, operands: &[Operand]) -> Result<(), String> {
    use Operand::*;

    let arity_error = |expected: &str| {
        Err(format!(
            "{} expects {} operand(s), got {}",
            opcode_name(opcode),
            expected,
            operands.len()
        ))
    };

    match opcode {
        OpCode::Mov => {
            if operands.len() != 2 {
                return arity_error("2");
            }
            let dst_ok = matches!(operands[0], Reg(_) | Mem(_));
            let src_ok = matches!(operands[1], Reg(_) | Mem(_) | Imm(_) | Label(_));
            if !dst_ok || !src_ok || matches!((&operands[0], &operands[1]), (Mem(_), Mem(_))) {
                return Err("MOV requires dst in {reg,mem}, src in {reg,mem,imm,label}, not mem,mem".to_string());
            }
            Ok(())
        }
        OpCode::Add | OpCode::Adc | OpCode::Sub | OpCode::Sbb | OpCode::Cmp | OpCode::And
        | OpCode::Or | OpCode::Xor => {
            if operands.len() != 2 {
                return arity_error("2");
            }
            if !matches!(operands[0], Reg(_)) {
                return Err(format!("{} requires a register destination", opcode_name(opcode)));
            }
            if !matches!(operands[1], Reg(_) | Mem(_) | Imm(_)) {
                return Err(format!("{} has an invalid source operand", opcode_name(opcode)));
            }
            Ok(())
        }
        OpCode::Mul | OpCode::Div | OpCode::Mod => {
            if operands.len() != 1 {
                return arity_error("1");
            }
            if !matches!(operands[0], Reg(_) | Mem(_) | Imm(_)) {
                return Err(format!("{} has an invalid operand", opcode_name(opcode)));
            }
            Ok(())
        }
        OpCode::Neg | OpCode::Not | OpCode::Inc | OpCode::Dec | OpCode::Out | OpCode::Outc => {
            if operands.len() != 1 {
                return arity_error("1");
            }
            if !matches!(operands[0], Reg(_)) {
                return Err(format!("{} requires a register operand", opcode_name(opcode)));
            }
            Ok(())
        }
        OpCode::Shl | OpCode::Shr | OpCode::Sar => {
            if operands.is_empty() || operands.len() > 2 {
                return arity_error("1 or 2");
            }
            if !matches!(operands[0], Reg(_)) {
                return Err(format!("{} requires a register destination", opcode_name(opcode)));
            }
            if let Some(count) = operands.get(1) {
                if !matches!(count, Reg(_) | Imm(_)) {
                    return Err(format!("{} has an invalid shift count", opcode_name(opcode)));
                }
            }
            Ok(())
        }
        OpCode::Push | OpCode::Pop => {
            if operands.len() != 1 {
                return arity_error("1");
            }
            if !matches!(operands[0], Reg(_) | Mem(_)) {
                return Err(format!("{} has an invalid operand", opcode_name(opcode)));
            }
            Ok(())
        }
        OpCode::Jmp | OpCode::Jcc(_) | OpCode::Call => {
            if operands.len() != 1 {
                return arity_error("1");
            }
            if !matches!(operands[0], Label(_) | Imm(_)) {
                return Err(format!("{} requires a label or immediate target", opcode_name(opcode)));
            }
            Ok(())
        }
        OpCode::Ret | OpCode::Iret | OpCode::Hlt | OpCode::Nop | OpCode::Clc | OpCode::Stc
        | OpCode::Cmc => {
            if !operands.is_empty() {
                return arity_error("0");
            }
            Ok(())
        }
        OpCode::Int => {
            if operands.len() != 1 {
                return arity_error("1");
            }
            if !matches!(operands[0], Imm(_) | Label(_)) {
                return Err("INT requires a numeric or bareword vector".to_string());
            }
            Ok(())
        }
        OpCode::In => {
            if operands.len() != 2 {
                return arity_error("2");
            }
            if !matches!(operands[0], Reg(_)) {
                return Err("IN requires a register destination".to_string());
            }
            if !matches!(operands[1], Imm(_)) {
                return Err("IN requires an immediate port".to_string());
            }
            Ok(())
        }
        OpCode::Outp => {
            if operands.len() != 2 {
                return arity_error("2");
            }
            if !matches!(operands[0], Imm(_)) {
                return Err("OUTP requires an immediate port".to_string());
            }
            if !matches!(operands[1], Reg(_)) {
                return Err("OUTP requires a register source".to_string());
            }
            Ok(())
        }
    }
}

fn opcode_name(opcode: OpCode) -> &'static str {
    match opcode {
        OpCode::Mov => "MOV",
        OpCode::Add => "ADD",
        OpCode::Adc => "ADC",
        OpCode::Sub => "SUB",
        OpCode::Sbb => "SBB",
        OpCode::Cmp => "CMP",
        OpCode::And => "AND",
        OpCode::Or => "OR",
        OpCode::Xor => "XOR",
        OpCode::Mul => "MUL",
        OpCode::Div => "DIV",
        OpCode::Mod => "MOD",
        OpCode::Neg => "NEG",
        OpCode::Not => "NOT",
        OpCode::Inc => "INC",
        OpCode::Dec => "DEC",
        OpCode::Shl => "SHL",
        OpCode::Shr => "SHR",
        OpCode::Sar => "SAR",
        OpCode::Push => "PUSH",
        OpCode::Pop => "POP",
        OpCode::Jmp => "JMP",
        OpCode::Jcc(_) => "Jcc",
        OpCode::Call => "CALL",
        OpCode::Ret => "RET",
        OpCode::Int => "INT",
        OpCode::Iret => "IRET",
        OpCode::Hlt => "HLT",
        OpCode::Nop => "NOP",
        OpCode::Clc => "CLC",
        OpCode::Stc => "STC",
        OpCode::Cmc => "CMC",
        OpCode::In => "IN",
        OpCode::Outp => "OUTP",
        OpCode::Out => "OUT",
        OpCode::Outc => "OUTC",
    }
}

fn parse_instruction(
    text: &str,
    line_no: u32,
    raw_text: &str,
    diagnostics: &mut Vec<Diagnostic>,
    source_address: u16,
) -> Instruction {
    let (mnemonic, operand_text) = match text.find(char::is_whitespace) {
        Some(idx) => (&text[..idx], text[idx..].trim()),
        None => (text, ""),
    };
    let mnemonic_upper = mnemonic.to_ascii_uppercase();
    let opcode = OpCode::from_mnemonic(&mnemonic_upper);

    let mut operands = Vec::new();
    if !operand_text.is_empty() {
        for piece in operand_text.split(',') {
            match parse_operand(piece) {
                Ok(operand) => operands.push(operand),
                Err(message) => diagnostics.push(Diagnostic::error(line_no, message)),
            }
        }
    }

    match opcode {
        None => diagnostics.push(Diagnostic::error(
            line_no,
            format!("unknown opcode '{}'", mnemonic),
        )),
        Some(opcode) => {
            if let Err(message) = validate(opcode, &operands) {
                diagnostics.push(Diagnostic::error(line_no, message));
            }
        }
    }

    Instruction {
        mnemonic: mnemonic_upper,
        opcode,
        operands,
        source_address,
        raw_text: raw_text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_labels_and_resolves_case_insensitively() {
        let program = assemble("loop:\n  NOP\n  JMP LOOP\n");
        assert_eq!(program.resolve_label("LOOP"), Some(0));
        assert!(!program.has_errors());
    }

    #[test]
    fn duplicate_labels_are_reported() {
        let program = assemble("A: NOP\nA: NOP\n");
        assert!(program.has_errors());
    }

    #[test]
    fn unknown_opcode_still_reserves_a_slot() {
        let program = assemble("FROB AX\nNOP\n");
        assert!(program.has_errors());
        assert_eq!(program.instructions.len(), 3); // FROB, NOP, implicit HLT
    }

    #[test]
    fn implicit_hlt_is_appended_when_missing() {
        let program = assemble("NOP\n");
        assert_eq!(program.instructions.last().unwrap().opcode, Some(OpCode::Hlt));
    }

    #[test]
    fn no_duplicate_hlt_when_already_present() {
        let program = assemble("NOP\nHLT\n");
        assert_eq!(program.instructions.len(), 2);
    }

    #[test]
    fn memory_operand_forms_parse() {
        let program = assemble("MOV AX, [0x0100]\nMOV BX, [AX+4]\nMOV CX, [AX-4]\nHLT\n");
        assert!(!program.has_errors(), "{:?}", program.diagnostics);
        assert_eq!(
            program.instructions[0].operands[1],
            Operand::Mem(MemRef::Absolute(0x0100))
        );
        assert_eq!(
            program.instructions[1].operands[1],
            Operand::Mem(MemRef::Based {
                base: RegisterId::AX,
                disp: 4
            })
        );
        assert_eq!(
            program.instructions[2].operands[1],
            Operand::Mem(MemRef::Based {
                base: RegisterId::AX,
                disp: -4
            })
        );
    }

    #[test]
    fn mov_rejects_memory_to_memory() {
        let program = assemble("MOV [0x0100], [0x0102]\n");
        assert!(program.has_errors());
    }

    #[test]
    fn scenario_b_sum_assembles_cleanly() {
        let src = "    MOV AX, 10\n    MOV BX, 0\nLOOP:\n    ADD BX, AX\n    DEC AX\n    JNZ LOOP\n    OUT BX\n    HLT\n";
        let program = assemble(src);
        assert!(!program.has_errors(), "{:?}", program.diagnostics);
        assert_eq!(program.resolve_label("LOOP"), Some(2));
    }
}
