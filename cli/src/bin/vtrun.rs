#[macro_use]
extern crate clap;

use clap::Arg;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug)]
enum Error {
    Io(std::io::Error, PathBuf),
    Compile(Vec<vm86::Diagnostic>),
    Assemble(Vec<vm86::Diagnostic>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, path) => write!(f, "reading \"{}\" failed: {}", path.display(), err),
            Error::Compile(diagnostics) => {
                writeln!(f, "compiling input failed:")?;
                for d in diagnostics {
                    writeln!(f, "  line {}: {}", d.line, d.message)?;
                }
                Ok(())
            }
            Error::Assemble(diagnostics) => {
                writeln!(f, "assembling input failed:")?;
                for d in diagnostics {
                    writeln!(f, "  line {}: {}", d.line, d.message)?;
                }
                Ok(())
            }
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Source (.vsrc) or assembly (.asm) file to run")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("assert")
                .short("a")
                .long("assert")
                .takes_value(true)
                .value_name("ASSERTIONS")
                .help("Checks the final state against an assertion script"),
        )
        .arg(
            Arg::with_name("replay_out")
                .short("r")
                .long("replay-out")
                .takes_value(true)
                .value_name("REPLAY")
                .help("Writes a replay session to this file after running"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let assert_path = matches.value_of("assert");
    let replay_out = matches.value_of("replay_out");

    if let Err(err) = run(input, assert_path, replay_out) {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn read_file(path: &Path) -> Result<String, Error> {
    let file = File::open(path).map_err(|err| Error::Io(err, path.to_owned()))?;
    let mut reader = BufReader::new(file);
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|err| Error::Io(err, path.to_owned()))?;
    Ok(text)
}

fn run(input: &str, assert_path: Option<&str>, replay_out: Option<&str>) -> Result<(), Error> {
    let input_path = Path::new(input);
    let text = read_file(input_path)?;
    let is_assembly = input_path.extension().and_then(|e| e.to_str()) == Some("asm");

    let (source_code, asm_code) = if is_assembly {
        (String::new(), text)
    } else {
        let (asm, diagnostics) = lang::compile(&text);
        let errors: Vec<_> = diagnostics
            .into_iter()
            .filter(|d| d.severity == vm86::Severity::Error)
            .collect();
        if !errors.is_empty() {
            return Err(Error::Compile(errors));
        }
        (text, asm)
    };

    let program = asm::assemble(&asm_code);
    if program.has_errors() {
        let errors: Vec<_> = program
            .diagnostics
            .iter()
            .filter(|d| d.severity == vm86::Severity::Error)
            .cloned()
            .collect();
        return Err(Error::Assemble(errors));
    }

    let mut stepper = dbg::Stepper::new(program, dbg::CoreConfig::default());
    let reason = stepper.continue_();
    let tip = &stepper.snapshots()[stepper.cursor()];

    print!("{}", dbg::format_output(&tip.output));
    println!("--");
    println!("stop reason: {:?}", reason);
    println!("halted: {}", tip.state.halted);
    if let Some(error) = &tip.state.error {
        println!("error: {}", error);
    }
    println!(
        "AX={:#06x} BX={:#06x} CX={:#06x} DX={:#06x} SP={:#06x} IP={:#06x} FLAGS={:#06x}",
        tip.state.registers.ax,
        tip.state.registers.bx,
        tip.state.registers.cx,
        tip.state.registers.dx,
        tip.state.registers.sp,
        tip.state.registers.ip,
        tip.state.registers.flags,
    );

    let mut failed = false;
    if let Some(assert_path) = assert_path {
        let script = read_file(Path::new(assert_path))?;
        let (assertions, errors) = dbg::assertion::parse(&script);
        for e in &errors {
            eprintln!("assertion script: {}", e);
        }
        for assertion in &assertions {
            match dbg::assertion::check(assertion, stepper.state(), &tip.output) {
                Ok(()) => println!("PASS: {:?}", assertion),
                Err(message) => {
                    println!("FAIL: {}", message);
                    failed = true;
                }
            }
        }
    }

    if let Some(replay_path) = replay_out {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let payload = dbg::replay::export(&stepper, &source_code, &asm_code, &[], now_ms);
        std::fs::write(replay_path, payload).map_err(|err| Error::Io(err, PathBuf::from(replay_path)))?;
    }

    if failed {
        std::process::exit(1);
    }

    Ok(())
}
