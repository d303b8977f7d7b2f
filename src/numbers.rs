//! Parses the numeric literal forms the lexer accepts: plain decimal,
//! `0x...`/`...h` hexadecimal, and `0b...` binary, each optionally signed.
//! Shared between the lexer (tokenizing `NUMBER`) and the CPU core (the
//! `JMP`-to-unresolved-label and `INT n` fallbacks, which parse a bareword
//! as a number rather than looking it up).

pub fn parse_immediate(text: &str) -> Option<i64> {
    let text = text.trim();
    let (sign, text) = match text.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, text.strip_prefix('+').unwrap_or(text)),
    };

    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()?
    } else if let Some(hex) = text
        .strip_suffix('h')
        .or_else(|| text.strip_suffix('H'))
    {
        if hex.is_empty() {
            return None;
        }
        i64::from_str_radix(hex, 16).ok()?
    } else {
        if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        text.parse::<i64>().ok()?
    };

    Some(sign * value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal() {
        assert_eq!(parse_immediate("42"), Some(42));
        assert_eq!(parse_immediate("-7"), Some(-7));
    }

    #[test]
    fn parses_hex_forms() {
        assert_eq!(parse_immediate("0x1F"), Some(31));
        assert_eq!(parse_immediate("1Fh"), Some(31));
        assert_eq!(parse_immediate("1FH"), Some(31));
    }

    #[test]
    fn parses_binary() {
        assert_eq!(parse_immediate("0b101"), Some(5));
    }

    #[test]
    fn rejects_non_numeric_barewords() {
        assert_eq!(parse_immediate("LOOP_START"), None);
        assert_eq!(parse_immediate(""), None);
        assert_eq!(parse_immediate("h"), None);
    }
}
