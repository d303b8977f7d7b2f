//! Pedagogical trace consumers: pure functions over a finished `TraceEntry`
//! stream. Per the "analyzers are a thin layer, not part of the core"
//! design note, none of these mutate or need access to the stepper itself —
//! they only ever read an ordered, immutable slice of trace records.

use std::collections::HashMap;

use crate::trace::TraceEntry;

/// Sums the cycle estimate across an entire trace.
pub fn total_cycles(trace: &[TraceEntry]) -> u64 {
    trace.iter().map(|e| e.cycles as u64).sum()
}

fn is_conditional_branch(mnemonic: &str) -> bool {
    mnemonic.starts_with('J') && mnemonic != "JMP"
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BranchPredictorStats {
    pub branches: u32,
    pub hits: u32,
    pub misses: u32,
}

impl BranchPredictorStats {
    pub fn accuracy(&self) -> f64 {
        if self.branches == 0 {
            1.0
        } else {
            self.hits as f64 / self.branches as f64
        }
    }
}

/// A 2-bit saturating-counter branch predictor, keyed by branch address —
/// the textbook scheme these traces are meant to feed into a classroom
/// visualizer for.
pub fn simulate_branch_predictor(trace: &[TraceEntry]) -> BranchPredictorStats {
    let mut counters: HashMap<u16, u8> = HashMap::new();
    let mut stats = BranchPredictorStats::default();

    for (i, entry) in trace.iter().enumerate() {
        if !is_conditional_branch(&entry.mnemonic) {
            continue;
        }
        let next_address = match trace.get(i + 1) {
            Some(next) => next.address,
            None => continue,
        };
        let fallthrough = entry.address.wrapping_add(1);
        let taken = next_address != fallthrough;

        let counter = counters.entry(entry.address).or_insert(1);
        let predicted_taken = *counter >= 2;

        stats.branches += 1;
        if predicted_taken == taken {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        *counter = match (taken, *counter) {
            (true, c) if c < 3 => c + 1,
            (false, c) if c > 0 => c - 1,
            (_, c) => c,
        };
    }

    stats
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CacheStats {
    pub accesses: u32,
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.accesses == 0 {
            1.0
        } else {
            self.hits as f64 / self.accesses as f64
        }
    }
}

/// A direct-mapped cache simulator over every memory word this trace
/// touched, reads and writes alike.
pub fn simulate_cache(trace: &[TraceEntry], line_bytes: u16, lines: usize) -> CacheStats {
    let mut tags: Vec<Option<u16>> = vec![None; lines.max(1)];
    let mut stats = CacheStats::default();

    let touch = |address: u16, stats: &mut CacheStats, tags: &mut Vec<Option<u16>>| {
        let line_index = (address / line_bytes) as usize % tags.len();
        let tag = address / line_bytes / tags.len() as u16;
        stats.accesses += 1;
        if tags[line_index] == Some(tag) {
            stats.hits += 1;
        } else {
            stats.misses += 1;
            tags[line_index] = Some(tag);
        }
    };

    for entry in trace {
        for &addr in entry.memory_reads.iter().chain(entry.memory_writes.iter()) {
            touch(addr, &mut stats, &mut tags);
        }
    }

    stats
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|s| !s.is_empty())
}

/// Counts read-after-write hazards: a register this step's raw text
/// mentions that the immediately preceding step just wrote.
pub fn count_data_hazards(trace: &[TraceEntry]) -> u32 {
    let mut hazards = 0;
    for pair in trace.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        if previous.changed_registers.is_empty() {
            continue;
        }
        let mentioned: std::collections::HashSet<&str> = words(&current.raw_text).collect();
        if previous
            .changed_registers
            .iter()
            .any(|r| mentioned.contains(r.name()))
        {
            hazards += 1;
        }
    }
    hazards
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::stepper::Stepper;

    fn run_to_halt(source: &str) -> Vec<TraceEntry> {
        let program = asm::assemble(source);
        let mut stepper = Stepper::new(program, CoreConfig::default());
        stepper.continue_();
        stepper.trace().to_vec()
    }

    #[test]
    fn total_cycles_matches_opcode_table_sum() {
        let trace = run_to_halt("MOV AX, 1\nHLT\n");
        assert_eq!(total_cycles(&trace), 2 + 1);
    }

    #[test]
    fn branch_predictor_counts_every_conditional_branch() {
        let trace = run_to_halt(
            "    MOV AX, 3\nLOOP:\n    DEC AX\n    JNZ LOOP\n    HLT\n",
        );
        let stats = simulate_branch_predictor(&trace);
        assert_eq!(stats.branches, 3);
    }

    #[test]
    fn cache_simulator_counts_every_memory_access() {
        let trace = run_to_halt("MOV AX, 1\nMOV [0x0100], AX\nMOV BX, [0x0100]\nHLT\n");
        let stats = simulate_cache(&trace, 16, 8);
        assert_eq!(stats.accesses, 2);
    }

    #[test]
    fn data_hazard_counter_flags_immediate_reuse() {
        let trace = run_to_halt("MOV AX, 1\nADD BX, AX\nHLT\n");
        assert_eq!(count_data_hazards(&trace), 1);
    }
}
