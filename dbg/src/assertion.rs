//! The optional line-oriented assertion mini-language used to script
//! expectations against a finished run: `REG`, `MEM`, `OUT` and `HALTED`
//! statements, one per line, with `#` or `;` comments.

use util::EnumFromStr;
use vm86::{CPUState, RegisterId};

use crate::trace::OutputEvent;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Assertion {
    Reg { register: RegisterId, value: u16 },
    Mem { address: u16, value: u16 },
    Out { value: u16 },
    Halted { value: bool },
}

fn strip_comment(line: &str) -> &str {
    let cut = line.find(['#', ';']).unwrap_or(line.len());
    &line[..cut]
}

/// Parses every non-blank, non-comment line. Unparseable lines are reported
/// in the returned error list but do not stop the rest of the script from
/// parsing, matching the toolchain's general "collect diagnostics, keep
/// going" posture.
pub fn parse(text: &str) -> (Vec<Assertion>, Vec<String>) {
    let mut assertions = Vec::new();
    let mut errors = Vec::new();

    for (i, raw_line) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Ok(assertion) => assertions.push(assertion),
            Err(message) => errors.push(format!("line {}: {}", line_no, message)),
        }
    }

    (assertions, errors)
}

fn parse_line(line: &str) -> Result<Assertion, String> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let keyword = parts.next().unwrap_or("").to_ascii_uppercase();
    let rest = parts.next().unwrap_or("").trim();

    match keyword.as_str() {
        "REG" => {
            let (name, literal) = split_assign(rest)?;
            let register = RegisterId::from_str(&name.to_ascii_uppercase())
                .map_err(|_| format!("unknown register '{}'", name))?;
            let value = parse_literal(literal)?;
            Ok(Assertion::Reg { register, value })
        }
        "MEM" => {
            let (addr_text, literal) = split_assign(rest)?;
            let addr_text = addr_text
                .trim()
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| format!("expected '[addr]', got '{}'", addr_text))?;
            let address = parse_literal(addr_text)?;
            let value = parse_literal(literal)?;
            Ok(Assertion::Mem { address, value })
        }
        "OUT" => {
            let value = parse_literal(rest)?;
            Ok(Assertion::Out { value })
        }
        "HALTED" => match rest.to_ascii_lowercase().as_str() {
            "true" => Ok(Assertion::Halted { value: true }),
            "false" => Ok(Assertion::Halted { value: false }),
            other => Err(format!("expected 'true' or 'false', got '{}'", other)),
        },
        other => Err(format!("unknown assertion keyword '{}'", other)),
    }
}

fn split_assign(text: &str) -> Result<(&str, &str), String> {
    let idx = text.find('=').ok_or_else(|| "expected '='".to_string())?;
    Ok((text[..idx].trim(), text[idx + 1..].trim()))
}

fn parse_literal(text: &str) -> Result<u16, String> {
    vm86::numbers::parse_immediate(text)
        .map(|v| (v & 0xFFFF) as u16)
        .ok_or_else(|| format!("invalid literal '{}'", text))
}

/// Checks one assertion against a final state and accumulated output.
pub fn check(assertion: &Assertion, state: &CPUState, output: &[OutputEvent]) -> Result<(), String> {
    match assertion {
        Assertion::Reg { register, value } => {
            let actual = state.registers.get(*register);
            if actual == *value {
                Ok(())
            } else {
                Err(format!(
                    "REG {} = {}: expected {}, got {}",
                    register, value, value, actual
                ))
            }
        }
        Assertion::Mem { address, value } => {
            let actual = state
                .memory
                .read_word(*address)
                .map_err(|_| format!("MEM [{:#06x}]: out of bounds", address))?;
            if actual == *value {
                Ok(())
            } else {
                Err(format!(
                    "MEM [{:#06x}] = {}: expected {}, got {}",
                    address, value, value, actual
                ))
            }
        }
        Assertion::Out { value } => {
            let found = output.iter().any(|o| matches!(o, OutputEvent::Number(v) if v == value));
            if found {
                Ok(())
            } else {
                Err(format!("OUT {}: not found in output sequence", value))
            }
        }
        Assertion::Halted { value } => {
            if state.halted == *value {
                Ok(())
            } else {
                Err(format!("HALTED {}: got {}", value, state.halted))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_statement_kinds() {
        let text = "# a comment\nREG AX = 5\nMEM [0x0100] = 9\nOUT 55\nHALTED true\n; trailing\n";
        let (assertions, errors) = parse(text);
        assert!(errors.is_empty(), "{:?}", errors);
        assert_eq!(assertions.len(), 4);
    }

    #[test]
    fn unknown_keyword_is_reported_but_does_not_abort() {
        let text = "FROB 1\nREG AX = 1\n";
        let (assertions, errors) = parse(text);
        assert_eq!(assertions.len(), 1);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn check_reports_mismatch() {
        let state = CPUState::reset();
        let assertion = Assertion::Reg {
            register: RegisterId::AX,
            value: 5,
        };
        assert!(check(&assertion, &state, &[]).is_err());
    }
}
