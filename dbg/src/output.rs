//! Renders a captured output stream into the debugger's text format:
//! numeric outputs are one decimal line each; character outputs accumulate
//! into the current line until a character value of `10` ends it.

use crate::trace::OutputEvent;

pub fn format_output(events: &[OutputEvent]) -> String {
    let mut rendered = String::new();
    let mut line = String::new();

    for event in events {
        match event {
            OutputEvent::Number(value) => {
                rendered.push_str(&value.to_string());
                rendered.push('\n');
            }
            OutputEvent::Char(byte) => {
                if *byte == 10 {
                    rendered.push_str(&line);
                    rendered.push('\n');
                    line.clear();
                } else {
                    line.push(*byte as char);
                }
            }
        }
    }

    rendered.push_str(&line);
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_one_line_each() {
        let out = format_output(&[OutputEvent::Number(14), OutputEvent::Number(2)]);
        assert_eq!(out, "14\n2\n");
    }

    #[test]
    fn characters_accumulate_until_newline_byte() {
        let out = format_output(&[
            OutputEvent::Char(b'h'),
            OutputEvent::Char(b'i'),
            OutputEvent::Char(10),
        ]);
        assert_eq!(out, "hi\n");
    }

    #[test]
    fn trailing_unterminated_characters_are_kept() {
        let out = format_output(&[OutputEvent::Char(b'x')]);
        assert_eq!(out, "x");
    }
}
