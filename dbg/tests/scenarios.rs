//! End-to-end scenarios driving the full pipeline (compile/assemble, then
//! run to halt) against the decisive observations each scenario names.

use dbg::{CoreConfig, Stepper};
use vm86::registers::RegisterId;

fn run_source(source: &str) -> Stepper {
    let (asm_code, diagnostics) = lang::compile(source);
    assert!(
        diagnostics
            .iter()
            .all(|d| d.severity != vm86::Severity::Error),
        "unexpected compile errors: {:?}",
        diagnostics
    );
    run_asm(&asm_code)
}

fn run_asm(asm_code: &str) -> Stepper {
    let program = asm::assemble(asm_code);
    assert!(!program.has_errors(), "unexpected assembly errors: {:?}", program.diagnostics);
    let mut stepper = Stepper::new(program, CoreConfig::default());
    stepper.continue_();
    stepper
}

#[test]
fn scenario_a_countdown_print() {
    let source = "x = 10\nwhile x > 0\n  print x\n  x = x - 1\nend\nprint 0\n";
    let stepper = run_source(source);
    let tip = &stepper.snapshots()[stepper.cursor()];

    let numbers: Vec<u16> = tip
        .output
        .iter()
        .filter_map(|event| match event {
            dbg::OutputEvent::Number(n) => Some(*n),
            dbg::OutputEvent::Char(_) => None,
        })
        .collect();
    assert_eq!(numbers, vec![10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);
    assert!(tip.state.halted);
    assert!(tip.state.error.is_none());
}

#[test]
fn scenario_b_sum_1_to_10() {
    let asm_code = "\
    MOV AX, 10
    MOV BX, 0
LOOP:
    ADD BX, AX
    DEC AX
    JNZ LOOP
    OUT BX
    HLT
";
    let stepper = run_asm(asm_code);
    let state = stepper.state();
    assert_eq!(state.registers.get(RegisterId::AX), 0);
    assert_eq!(state.registers.get(RegisterId::BX), 55);
    assert!(vm86::flags::get(state.registers.flags, vm86::Flag::ZF));
}

#[test]
fn scenario_c_memory_swap() {
    let asm_code = "\
    MOV AX, 3
    MOV [0x0100], AX
    MOV AX, 9
    MOV [0x0102], AX
    MOV AX, [0x0100]
    MOV BX, [0x0102]
    MOV [0x0100], BX
    MOV [0x0102], AX
    HLT
";
    let stepper = run_asm(asm_code);
    let state = stepper.state();
    assert_eq!(state.memory.read_word(0x0100).unwrap(), 9);
    assert_eq!(state.memory.read_word(0x0102).unwrap(), 3);
}

#[test]
fn scenario_d_division_with_remainder() {
    let asm_code = "\
    MOV DX, 0
    MOV AX, 100
    MOV BX, 7
    DIV BX
    OUT AX
    OUT DX
    HLT
";
    let stepper = run_asm(asm_code);
    let tip = &stepper.snapshots()[stepper.cursor()];
    let numbers: Vec<u16> = tip
        .output
        .iter()
        .filter_map(|event| match event {
            dbg::OutputEvent::Number(n) => Some(*n),
            dbg::OutputEvent::Char(_) => None,
        })
        .collect();
    assert_eq!(numbers, vec![14, 2]);
}

#[test]
fn scenario_e_interrupt_roundtrip() {
    let asm_code = "\
    MOV AX, ISR
    MOV [0x0002], AX
    INT 1
    OUT AX
    HLT
ISR:
    MOV AX, 123
    IRET
";
    let stepper = run_asm(asm_code);
    let tip = &stepper.snapshots()[stepper.cursor()];
    let numbers: Vec<u16> = tip
        .output
        .iter()
        .filter_map(|event| match event {
            dbg::OutputEvent::Number(n) => Some(*n),
            dbg::OutputEvent::Char(_) => None,
        })
        .collect();
    assert!(numbers.contains(&123));
}

#[test]
fn scenario_f_time_travel_consistency() {
    let source = "x = 10\nwhile x > 0\n  print x\n  x = x - 1\nend\nprint 0\n";
    let (asm_code, _) = lang::compile(source);
    let program_straight = asm::assemble(&asm_code);
    let mut straight = Stepper::new(program_straight, CoreConfig::default());
    for _ in 0..7 {
        straight.step_into();
    }
    let straight_state = straight.state().clone();

    let program_travel = asm::assemble(&asm_code);
    let mut travel = Stepper::new(program_travel, CoreConfig::default());
    for _ in 0..7 {
        travel.step_into();
    }
    travel.seek(3).unwrap();
    for _ in 0..4 {
        travel.step_into();
    }

    assert_eq!(travel.state(), &straight_state);
}
