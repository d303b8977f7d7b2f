//! Per-step diagnostics computed purely from pre-state, post-state and the
//! instruction that ran between them.

use vm86::{CPUState, Flag, Instruction, OpCode, Operand, RegisterId};

use crate::config::CoreConfig;

/// A value emitted by `OUT`/`OUTC`, captured *before* `execute` runs so that
/// a step whose instruction then fails still records what it emitted.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OutputEvent {
    Number(u16),
    Char(u8),
}

/// An immutable, per-step record of what changed and what was observed.
#[derive(Clone, PartialEq, Debug)]
pub struct TraceEntry {
    pub step: u32,
    pub timestamp_ms: u64,
    pub address: u16,
    pub mnemonic: String,
    pub raw_text: String,
    pub memory_reads: Vec<u16>,
    pub memory_writes: Vec<u16>,
    pub changed_registers: Vec<RegisterId>,
    pub changed_flags: Vec<Flag>,
    pub changed_memory: Vec<u16>,
    pub output: Vec<OutputEvent>,
    pub cycles: u32,
    pub error: Option<String>,
}

/// Determines the set of memory words an instruction reads/writes, purely
/// from its opcode and operands (plus the pre-execution `SP`, for the
/// implicit stack slots).
pub fn memory_accesses(instruction: &Instruction, before: &CPUState) -> (Vec<u16>, Vec<u16>) {
    let mut reads = Vec::new();
    let mut writes = Vec::new();

    let operand_address = |operand: &Operand| -> Option<u16> {
        match operand {
            Operand::Mem(mem) => Some(vm86::cpu::effective_address(*mem, &before.registers)),
            _ => None,
        }
    };

    let ops = &instruction.operands[..];
    let sp = before.registers.sp;

    match instruction.opcode {
        Some(OpCode::Mov) => {
            if let Some(addr) = ops.first().and_then(&operand_address) {
                writes.push(addr);
            }
            if let Some(addr) = ops.get(1).and_then(&operand_address) {
                reads.push(addr);
            }
        }
        Some(
            OpCode::Add
            | OpCode::Adc
            | OpCode::Sub
            | OpCode::Sbb
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor,
        ) => {
            if let Some(addr) = ops.first().and_then(&operand_address) {
                reads.push(addr);
                writes.push(addr);
            }
            if let Some(addr) = ops.get(1).and_then(&operand_address) {
                reads.push(addr);
            }
        }
        Some(OpCode::Cmp) => {
            if let Some(addr) = ops.first().and_then(&operand_address) {
                reads.push(addr);
            }
            if let Some(addr) = ops.get(1).and_then(&operand_address) {
                reads.push(addr);
            }
        }
        Some(OpCode::Not | OpCode::Neg | OpCode::Inc | OpCode::Dec) => {
            if let Some(addr) = ops.first().and_then(&operand_address) {
                reads.push(addr);
                writes.push(addr);
            }
        }
        Some(OpCode::Mul | OpCode::Div | OpCode::Mod) => {
            if let Some(addr) = ops.first().and_then(&operand_address) {
                reads.push(addr);
            }
        }
        Some(OpCode::Shl | OpCode::Shr | OpCode::Sar) => {
            if let Some(addr) = ops.first().and_then(&operand_address) {
                reads.push(addr);
                writes.push(addr);
            }
            if let Some(addr) = ops.get(1).and_then(&operand_address) {
                reads.push(addr);
            }
        }
        Some(OpCode::Push) => {
            if let Some(addr) = ops.first().and_then(&operand_address) {
                reads.push(addr);
            }
            writes.push(sp.wrapping_sub(2));
        }
        Some(OpCode::Pop) => {
            if let Some(addr) = ops.first().and_then(&operand_address) {
                writes.push(addr);
            }
            reads.push(sp);
        }
        Some(OpCode::Call) => {
            writes.push(sp.wrapping_sub(2));
        }
        Some(OpCode::Ret) => {
            reads.push(sp);
        }
        Some(OpCode::Int) => {
            writes.push(sp.wrapping_sub(2));
            writes.push(sp.wrapping_sub(4));
        }
        Some(OpCode::Iret) => {
            reads.push(sp);
            reads.push(sp.wrapping_add(2));
        }
        Some(OpCode::In) => {
            if let Some(Operand::Imm(port)) = ops.get(1) {
                reads.push(vm86::constants::port_address(*port as u8));
            }
        }
        Some(OpCode::Outp) => {
            if let Some(Operand::Imm(port)) = ops.first() {
                writes.push(vm86::constants::port_address(*port as u8));
            }
        }
        _ => {}
    }

    (reads, writes)
}

/// Captures `OUT`/`OUTC` output *before* `execute` runs, per the deliberate
/// "output captured even on a failing step" rule.
pub fn capture_output(
    instruction: &Instruction,
    before: &CPUState,
    labels: &std::collections::HashMap<String, u16>,
) -> Option<OutputEvent> {
    match instruction.opcode {
        Some(OpCode::Out) => {
            let value = vm86::cpu::resolve(instruction.operands.first()?, before, labels).ok()?;
            Some(OutputEvent::Number(value))
        }
        Some(OpCode::Outc) => {
            let value = vm86::cpu::resolve(instruction.operands.first()?, before, labels).ok()?;
            Some(OutputEvent::Char((value & 0xFF) as u8))
        }
        _ => None,
    }
}

fn changed_registers(before: &CPUState, after: &CPUState) -> Vec<RegisterId> {
    RegisterId::ALL
        .iter()
        .copied()
        .filter(|id| before.registers.get(*id) != after.registers.get(*id))
        .collect()
}

fn changed_flags(before: &CPUState, after: &CPUState) -> Vec<Flag> {
    Flag::ALL
        .iter()
        .copied()
        .filter(|flag| {
            vm86::flags::get(before.registers.flags, *flag)
                != vm86::flags::get(after.registers.flags, *flag)
        })
        .collect()
}

/// Diffs two memories byte by byte, aligning each differing byte down to its
/// even word address, deduplicating, sorting, and capping the result.
fn changed_memory(before: &CPUState, after: &CPUState, cap: usize) -> Vec<u16> {
    let mut addrs: Vec<u16> = before
        .memory
        .as_bytes()
        .iter()
        .zip(after.memory.as_bytes().iter())
        .enumerate()
        .filter(|(_, (a, b))| a != b)
        .map(|(i, _)| (i as u16) & !1)
        .collect();
    addrs.sort_unstable();
    addrs.dedup();
    addrs.truncate(cap);
    addrs
}

pub fn build_entry(
    step: u32,
    timestamp_ms: u64,
    instruction: &Instruction,
    before: &CPUState,
    after: &CPUState,
    output: Vec<OutputEvent>,
    config: &CoreConfig,
) -> TraceEntry {
    let (memory_reads, memory_writes) = memory_accesses(instruction, before);
    let cycles = instruction.opcode.map(|op| op.cycles()).unwrap_or(3);

    TraceEntry {
        step,
        timestamp_ms,
        address: before.registers.ip,
        mnemonic: instruction.mnemonic.clone(),
        raw_text: instruction.raw_text.clone(),
        memory_reads,
        memory_writes,
        changed_registers: changed_registers(before, after),
        changed_flags: changed_flags(before, after),
        changed_memory: changed_memory(before, after, config.memory_diff_cap),
        output,
        cycles,
        error: after.error.clone(),
    }
}
