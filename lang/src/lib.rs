//! Source-to-assembly front end: lexer, parser and code generator for the
//! toolchain's imperative surface language.

pub mod ast;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod token;

use vm86::Diagnostic;

/// Runs the full front end over `source`, returning the generated assembly
/// text and every diagnostic collected across lexing, parsing and codegen.
/// Each stage still runs to its defined stopping point (per the error
/// handling design): a lexical or syntactic failure still produces
/// whatever partial AST it can, and codegen always runs over it.
pub fn compile(source: &str) -> (String, Vec<Diagnostic>) {
    let (tokens, mut diagnostics) = lexer::tokenize(source);
    let (ast, parse_diags) = parser::parse(&tokens);
    diagnostics.extend(parse_diags);
    let (asm, codegen_diags) = codegen::generate(&ast);
    diagnostics.extend(codegen_diags);
    (asm, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_program_compiles_without_diagnostics() {
        let (_, diags) = compile("x = 10\nwhile x > 0\n  print x\n  x = x - 1\nend\nprint 0\n");
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn generated_assembly_ends_with_hlt() {
        let (asm, _) = compile("x = 1\n");
        assert!(asm.trim_end().ends_with("HLT"));
    }
}
