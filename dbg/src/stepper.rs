//! Drives the CPU core step by step, capturing diagnostics and maintaining
//! an append-only, seekable history with breakpoints, watchpoints and
//! call-depth-aware step-over.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use vm86::{CPUState, Instruction, OpCode, Program};

use crate::config::CoreConfig;
use crate::snapshot::Snapshot;
use crate::trace::{self, OutputEvent, TraceEntry};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WatchKind {
    Read,
    Write,
    Change,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Watchpoint {
    pub address: u16,
    pub size: u16,
    pub kind: WatchKind,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StopReason {
    Completed,
    Halted,
    Breakpoint,
    Watchpoint,
    StepCap,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Owns `(snapshots, trace)` exclusively; no other component mutates them.
pub struct Stepper {
    pub program: Program,
    pub config: CoreConfig,
    snapshots: Vec<Snapshot>,
    trace: Vec<TraceEntry>,
    cursor: usize,
    breakpoints: BTreeSet<u16>,
    watchpoints: Vec<Watchpoint>,
}

impl Stepper {
    pub fn new(program: Program, config: CoreConfig) -> Stepper {
        Stepper {
            program,
            config,
            snapshots: vec![Snapshot::initial(CPUState::reset())],
            trace: Vec::new(),
            cursor: 0,
            breakpoints: BTreeSet::new(),
            watchpoints: Vec::new(),
        }
    }

    /// Rebuilds from an already-reconstructed timeline, used by the replay
    /// codec on import.
    pub fn from_parts(
        program: Program,
        config: CoreConfig,
        snapshots: Vec<Snapshot>,
        trace: Vec<TraceEntry>,
        breakpoints: BTreeSet<u16>,
        cursor: usize,
    ) -> Stepper {
        Stepper {
            program,
            config,
            snapshots,
            trace,
            cursor,
            breakpoints,
            watchpoints: Vec::new(),
        }
    }

    pub fn state(&self) -> &CPUState {
        &self.snapshots[self.cursor].state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn breakpoints(&self) -> &BTreeSet<u16> {
        &self.breakpoints
    }

    pub fn add_breakpoint(&mut self, address: u16) {
        self.breakpoints.insert(address);
    }

    pub fn remove_breakpoint(&mut self, address: u16) {
        self.breakpoints.remove(&address);
    }

    pub fn add_watchpoint(&mut self, watchpoint: Watchpoint) {
        self.watchpoints.push(watchpoint);
    }

    pub fn clear_watchpoints(&mut self) {
        self.watchpoints.clear();
    }

    fn truncate_if_branching(&mut self) {
        if self.cursor + 1 != self.snapshots.len() {
            let trace_len = self.snapshots[self.cursor].trace_length;
            self.snapshots.truncate(self.cursor + 1);
            self.trace.truncate(trace_len);
        }
    }

    fn push_result(
        &mut self,
        instruction: &Instruction,
        before: CPUState,
        after: CPUState,
        output: Vec<OutputEvent>,
    ) {
        let step_number = self.trace.len() as u32 + 1;
        let entry = trace::build_entry(
            step_number,
            now_ms(),
            instruction,
            &before,
            &after,
            output,
            &self.config,
        );

        let mut performance = self.snapshots[self.cursor].performance.clone();
        let changed_signal_count =
            entry.changed_registers.len() + entry.changed_flags.len() + entry.changed_memory.len();
        performance.record_step(entry.cycles, changed_signal_count);

        let mut accumulated_output = self.snapshots[self.cursor].output.clone();
        accumulated_output.extend(entry.output.clone());

        self.trace.push(entry);
        self.snapshots.push(Snapshot {
            state: after,
            output: accumulated_output,
            trace_length: self.trace.len(),
            performance,
        });
        self.cursor += 1;
    }

    fn force_halt(&mut self, message: &str) {
        let before = self.state().clone();
        let mut after = before.clone();
        after.halted = true;
        after.error = Some(message.to_string());
        let placeholder = Instruction {
            mnemonic: String::new(),
            opcode: None,
            operands: Vec::new(),
            source_address: before.registers.ip,
            raw_text: String::new(),
        };
        self.push_result(&placeholder, before, after, Vec::new());
    }

    /// Executes exactly one instruction. Returns `None` (no-op) if the
    /// machine is already halted.
    pub fn step_into(&mut self) -> Option<&TraceEntry> {
        if self.state().halted {
            return None;
        }
        self.truncate_if_branching();

        let before = self.state().clone();
        let ip = before.registers.ip;
        match self.program.instruction_at(ip).cloned() {
            Some(instruction) => {
                let output = trace::capture_output(&instruction, &before, &self.program.labels)
                    .into_iter()
                    .collect();
                let after = vm86::cpu::execute(&before, &instruction, &self.program.labels);
                self.push_result(&instruction, before, after, output);
            }
            None => {
                self.force_halt(&format!("instruction pointer {} out of range", ip));
            }
        }
        self.trace.last()
    }

    fn current_opcode(&self) -> Option<OpCode> {
        self.program
            .instruction_at(self.state().registers.ip)
            .and_then(|i| i.opcode)
    }

    fn watchpoint_hit(&self) -> bool {
        let entry = match self.trace.last() {
            Some(entry) => entry,
            None => return false,
        };
        self.watchpoints.iter().any(|wp| {
            let end = wp.address.saturating_add(wp.size);
            let set: &[u16] = match wp.kind {
                WatchKind::Read => &entry.memory_reads,
                WatchKind::Write => &entry.memory_writes,
                WatchKind::Change => &entry.changed_memory,
            };
            set.iter().any(|addr| *addr >= wp.address && *addr < end)
        })
    }

    /// Runs until a breakpoint, watchpoint, halt or the step cap, stopping
    /// only after at least one instruction has executed even if the current
    /// address is itself a breakpoint.
    pub fn continue_(&mut self) -> StopReason {
        let mut steps = 0u32;
        loop {
            if self.state().halted {
                return StopReason::Halted;
            }
            if steps > 0 && self.breakpoints.contains(&self.state().registers.ip) {
                return StopReason::Breakpoint;
            }
            if steps >= self.config.max_steps_per_continue {
                self.force_halt("Maximum steps exceeded (infinite loop?)");
                return StopReason::StepCap;
            }
            if self.step_into().is_none() {
                return StopReason::Halted;
            }
            steps += 1;
            if self.state().halted {
                return StopReason::Halted;
            }
            if self.watchpoint_hit() {
                return StopReason::Watchpoint;
            }
        }
    }

    /// Identical to [`Stepper::step_into`] unless the current instruction is
    /// `CALL`, in which case it runs until control returns to the
    /// instruction right after the call at call-depth zero.
    pub fn step_over(&mut self) -> StopReason {
        if !matches!(self.current_opcode(), Some(OpCode::Call)) {
            return match self.step_into() {
                Some(_) => StopReason::Completed,
                None => StopReason::Halted,
            };
        }

        let call_address = self.state().registers.ip;
        let mut depth: i32 = 0;
        let mut steps = 0u32;

        loop {
            if self.state().halted {
                return StopReason::Halted;
            }
            if steps >= self.config.max_steps_per_continue {
                self.force_halt("Maximum steps exceeded (infinite loop?)");
                return StopReason::StepCap;
            }
            let opcode = self.current_opcode();
            if self.step_into().is_none() {
                return StopReason::Halted;
            }
            steps += 1;
            match opcode {
                Some(OpCode::Call) => depth += 1,
                Some(OpCode::Ret) => depth = (depth - 1).max(0),
                _ => {}
            }
            if self.state().halted {
                return StopReason::Halted;
            }
            if self.watchpoint_hit() {
                return StopReason::Watchpoint;
            }
            if depth == 0 && self.state().registers.ip == call_address.wrapping_add(1) {
                return StopReason::Completed;
            }
            if self.breakpoints.contains(&self.state().registers.ip) {
                return StopReason::Breakpoint;
            }
        }
    }

    /// Moves the cursor one position earlier without producing new state.
    pub fn step_back(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        true
    }

    pub fn seek(&mut self, index: usize) -> Result<(), String> {
        if index >= self.snapshots.len() {
            return Err(format!(
                "seek index {} out of range (0..{})",
                index,
                self.snapshots.len()
            ));
        }
        self.cursor = index;
        Ok(())
    }

    pub fn previous_state(&self) -> Option<&CPUState> {
        if self.cursor == 0 {
            None
        } else {
            Some(&self.snapshots[self.cursor - 1].state)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn countdown_program() -> Program {
        asm::assemble(
            "    MOV AX, 10\n    MOV BX, 0\nLOOP:\n    ADD BX, AX\n    DEC AX\n    JNZ LOOP\n    OUT BX\n    HLT\n",
        )
    }

    #[test]
    fn step_into_grows_trace_and_snapshots_in_lockstep() {
        let mut stepper = Stepper::new(countdown_program(), CoreConfig::default());
        for n in 1..=5 {
            stepper.step_into();
            assert_eq!(stepper.trace().len(), n);
            assert_eq!(stepper.snapshots().len(), n + 1);
        }
    }

    #[test]
    fn continue_runs_to_halt() {
        let mut stepper = Stepper::new(countdown_program(), CoreConfig::default());
        let reason = stepper.continue_();
        assert_eq!(reason, StopReason::Halted);
        assert!(stepper.state().halted);
        assert_eq!(stepper.state().registers.bx, 55);
    }

    #[test]
    fn continue_stops_at_breakpoint() {
        let mut stepper = Stepper::new(countdown_program(), CoreConfig::default());
        stepper.add_breakpoint(2); // LOOP:
        let reason = stepper.continue_();
        assert_eq!(reason, StopReason::Breakpoint);
        assert_eq!(stepper.state().registers.ip, 2);
    }

    #[test]
    fn step_back_then_forward_matches_straight_run() {
        let mut straight = Stepper::new(countdown_program(), CoreConfig::default());
        for _ in 0..7 {
            straight.step_into();
        }
        let straight_state = straight.state().clone();

        let mut replay = Stepper::new(countdown_program(), CoreConfig::default());
        for _ in 0..7 {
            replay.step_into();
        }
        for _ in 0..4 {
            replay.step_back();
        }
        for _ in 0..4 {
            replay.step_into();
        }
        assert_eq!(replay.state(), &straight_state);
    }

    #[test]
    fn branching_the_timeline_truncates_trace() {
        let mut stepper = Stepper::new(countdown_program(), CoreConfig::default());
        for _ in 0..5 {
            stepper.step_into();
        }
        stepper.seek(2).unwrap();
        stepper.step_into();
        assert_eq!(stepper.trace().len(), 3);
        assert_eq!(stepper.snapshots().len(), 4);
    }

    #[test]
    fn step_cap_halts_with_expected_message() {
        let program = asm::assemble("LOOP:\n    JMP LOOP\n");
        let config = CoreConfig {
            max_steps_per_continue: 10,
            ..CoreConfig::default()
        };
        let mut stepper = Stepper::new(program, config);
        let reason = stepper.continue_();
        assert_eq!(reason, StopReason::StepCap);
        assert_eq!(
            stepper.state().error.as_deref(),
            Some("Maximum steps exceeded (infinite loop?)")
        );
    }

    #[test]
    fn step_over_skips_entire_call() {
        let program = asm::assemble(
            "    CALL SUB\n    HLT\nSUB:\n    MOV AX, 1\n    MOV AX, 2\n    RET\n",
        );
        let mut stepper = Stepper::new(program, CoreConfig::default());
        let reason = stepper.step_over();
        assert_eq!(reason, StopReason::Completed);
        assert_eq!(stepper.state().registers.ip, 1);
        assert_eq!(stepper.state().registers.ax, 2);
    }
}
