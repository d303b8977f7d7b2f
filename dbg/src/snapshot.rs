//! A deep copy of `(state, accumulated output, trace length, performance)`
//! at one step index. The timeline is simply `Vec<Snapshot>`; see the
//! "undo by holding every prior snapshot" design note for why a 4 KiB
//! machine can afford this instead of storing deltas.

use crate::trace::OutputEvent;
use vm86::CPUState;

#[derive(Clone, PartialEq, Debug, Default)]
pub struct PerformanceRecord {
    pub instructions_executed: u64,
    pub total_cycles: u64,
    pub simulated_load: f64,
}

const LOAD_EMA_COEFFICIENT: f64 = 0.35;

impl PerformanceRecord {
    /// Folds one more executed instruction into the running totals, per the
    /// exact load formula: an EMA over a weighted blend of cycle pressure
    /// (how expensive this instruction was) and churn pressure (how much of
    /// the machine's visible state it touched).
    pub fn record_step(&mut self, cycles: u32, changed_signal_count: usize) {
        self.instructions_executed += 1;
        self.total_cycles += cycles as u64;

        let cycle_pressure = ((cycles as f64 / 18.0) * 100.0).round().min(100.0);
        let churn_pressure = ((changed_signal_count as f64) * 12.0).round().min(100.0);
        let sample = (0.7 * cycle_pressure + 0.3 * churn_pressure).round().min(100.0);
        self.simulated_load += LOAD_EMA_COEFFICIENT * (sample - self.simulated_load);
    }
}

#[derive(Clone, PartialEq, Debug)]
pub struct Snapshot {
    pub state: CPUState,
    pub output: Vec<OutputEvent>,
    pub trace_length: usize,
    pub performance: PerformanceRecord,
}

impl Snapshot {
    pub fn initial(state: CPUState) -> Snapshot {
        Snapshot {
            state,
            output: Vec::new(),
            trace_length: 0,
            performance: PerformanceRecord::default(),
        }
    }
}
