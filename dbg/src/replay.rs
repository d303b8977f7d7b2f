//! Replay codec: a human-readable JSON payload capturing everything needed
//! to reconstruct a [`Stepper`] — the recorded trace/snapshot timeline, the
//! breakpoint set, and the original source so a session can be rebuilt even
//! if only the assembly (or only the source) survived.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use util::EnumFromStr;
use vm86::{CPUState, Flag, Memory, RegisterId};

use crate::config::CoreConfig;
use crate::snapshot::{PerformanceRecord, Snapshot};
use crate::stepper::Stepper;
use crate::trace::{OutputEvent, TraceEntry};

pub const REPLAY_VERSION: &str = "1.0.0";

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("replay payload must be a JSON object")]
    NotAnObject,
    #[error("replay payload is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("replay payload field `{0}` must be a sequence")]
    NotASequence(&'static str),
    #[error("failed to parse replay payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("embedded program could not be reassembled from its source or assembly")]
    Reassembly,
}

fn mask_u16<'de, D: Deserializer<'de>>(d: D) -> Result<u16, D::Error> {
    let value = i64::deserialize(d)?;
    Ok((value & 0xFFFF) as u16)
}

fn mask_u16_vec<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u16>, D::Error> {
    let values = Vec::<i64>::deserialize(d)?;
    Ok(values.into_iter().map(|v| (v & 0xFFFF) as u16).collect())
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum MemoryRepr {
    Array(Vec<u8>),
    Sparse(BTreeMap<String, i64>),
}

/// Always produces exactly `vm86::constants::MEMORY_SIZE` bytes: the core's
/// memory is a fixed 4 KiB buffer with no heap growth during execution
/// (§5), so any index at or beyond that bound is dropped rather than
/// growing the machine.
fn normalize_memory(repr: MemoryRepr) -> Vec<u8> {
    let size = vm86::constants::MEMORY_SIZE;
    let mut buf = vec![0u8; size];
    match repr {
        MemoryRepr::Array(bytes) => {
            for (i, byte) in bytes.into_iter().enumerate().take(size) {
                buf[i] = byte;
            }
        }
        MemoryRepr::Sparse(map) => {
            for (key, value) in map {
                if let Ok(index) = key.parse::<usize>() {
                    if index < size {
                        buf[index] = (value & 0xFF) as u8;
                    }
                }
            }
        }
    }
    buf
}

#[derive(Serialize, Deserialize)]
struct CpuStateRecord {
    #[serde(deserialize_with = "mask_u16")]
    ax: u16,
    #[serde(deserialize_with = "mask_u16")]
    bx: u16,
    #[serde(deserialize_with = "mask_u16")]
    cx: u16,
    #[serde(deserialize_with = "mask_u16")]
    dx: u16,
    #[serde(deserialize_with = "mask_u16")]
    si: u16,
    #[serde(deserialize_with = "mask_u16")]
    di: u16,
    #[serde(deserialize_with = "mask_u16")]
    sp: u16,
    #[serde(deserialize_with = "mask_u16")]
    bp: u16,
    #[serde(deserialize_with = "mask_u16")]
    ip: u16,
    #[serde(deserialize_with = "mask_u16")]
    flags: u16,
    memory: MemoryRepr,
    halted: bool,
    error: Option<String>,
}

impl From<&CPUState> for CpuStateRecord {
    fn from(state: &CPUState) -> CpuStateRecord {
        CpuStateRecord {
            ax: state.registers.ax,
            bx: state.registers.bx,
            cx: state.registers.cx,
            dx: state.registers.dx,
            si: state.registers.si,
            di: state.registers.di,
            sp: state.registers.sp,
            bp: state.registers.bp,
            ip: state.registers.ip,
            flags: state.registers.flags,
            memory: MemoryRepr::Array(state.memory.as_bytes().to_vec()),
            halted: state.halted,
            error: state.error.clone(),
        }
    }
}

impl From<CpuStateRecord> for CPUState {
    fn from(record: CpuStateRecord) -> CPUState {
        let mut memory = Memory::new();
        memory
            .as_bytes_mut()
            .copy_from_slice(&normalize_memory(record.memory));
        CPUState {
            registers: vm86::Registers {
                ax: record.ax,
                bx: record.bx,
                cx: record.cx,
                dx: record.dx,
                si: record.si,
                di: record.di,
                sp: record.sp,
                bp: record.bp,
                ip: record.ip,
                flags: record.flags,
            },
            memory,
            halted: record.halted,
            error: record.error,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutputEventRecord {
    Number { value: u16 },
    Char { value: u8 },
}

impl From<&OutputEvent> for OutputEventRecord {
    fn from(event: &OutputEvent) -> OutputEventRecord {
        match event {
            OutputEvent::Number(v) => OutputEventRecord::Number { value: *v },
            OutputEvent::Char(v) => OutputEventRecord::Char { value: *v },
        }
    }
}

impl From<OutputEventRecord> for OutputEvent {
    fn from(record: OutputEventRecord) -> OutputEvent {
        match record {
            OutputEventRecord::Number { value } => OutputEvent::Number(value),
            OutputEventRecord::Char { value } => OutputEvent::Char(value),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TraceEntryRecord {
    step: u32,
    timestamp_ms: u64,
    address: u16,
    mnemonic: String,
    raw_text: String,
    memory_reads: Vec<u16>,
    memory_writes: Vec<u16>,
    changed_registers: Vec<String>,
    changed_flags: Vec<String>,
    changed_memory: Vec<u16>,
    output: Vec<OutputEventRecord>,
    cycles: u32,
    error: Option<String>,
}

impl From<&TraceEntry> for TraceEntryRecord {
    fn from(entry: &TraceEntry) -> TraceEntryRecord {
        TraceEntryRecord {
            step: entry.step,
            timestamp_ms: entry.timestamp_ms,
            address: entry.address,
            mnemonic: entry.mnemonic.clone(),
            raw_text: entry.raw_text.clone(),
            memory_reads: entry.memory_reads.clone(),
            memory_writes: entry.memory_writes.clone(),
            changed_registers: entry.changed_registers.iter().map(|r| r.name().to_string()).collect(),
            changed_flags: entry.changed_flags.iter().map(|f| f.name().to_string()).collect(),
            changed_memory: entry.changed_memory.clone(),
            output: entry.output.iter().map(OutputEventRecord::from).collect(),
            cycles: entry.cycles,
            error: entry.error.clone(),
        }
    }
}

impl TraceEntryRecord {
    fn into_entry(self) -> TraceEntry {
        TraceEntry {
            step: self.step,
            timestamp_ms: self.timestamp_ms,
            address: self.address,
            mnemonic: self.mnemonic,
            raw_text: self.raw_text,
            memory_reads: self.memory_reads,
            memory_writes: self.memory_writes,
            changed_registers: self
                .changed_registers
                .iter()
                .filter_map(|n| RegisterId::from_str(n).ok())
                .collect(),
            changed_flags: self
                .changed_flags
                .iter()
                .filter_map(|n| Flag::from_str(n).ok())
                .collect(),
            changed_memory: self.changed_memory,
            output: self.output.into_iter().map(OutputEvent::from).collect(),
            cycles: self.cycles,
            error: self.error,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotRecord {
    state: CpuStateRecord,
    output: Vec<OutputEventRecord>,
    trace_length: usize,
    instructions_executed: u64,
    total_cycles: u64,
    simulated_load: f64,
}

impl From<&Snapshot> for SnapshotRecord {
    fn from(snapshot: &Snapshot) -> SnapshotRecord {
        SnapshotRecord {
            state: CpuStateRecord::from(&snapshot.state),
            output: snapshot.output.iter().map(OutputEventRecord::from).collect(),
            trace_length: snapshot.trace_length,
            instructions_executed: snapshot.performance.instructions_executed,
            total_cycles: snapshot.performance.total_cycles,
            simulated_load: snapshot.performance.simulated_load,
        }
    }
}

impl SnapshotRecord {
    fn into_snapshot(self) -> Snapshot {
        Snapshot {
            state: CPUState::from(self.state),
            output: self.output.into_iter().map(OutputEvent::from).collect(),
            trace_length: self.trace_length,
            performance: PerformanceRecord {
                instructions_executed: self.instructions_executed,
                total_cycles: self.total_cycles,
                simulated_load: self.simulated_load,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SavedSnapshotRecord {
    label: String,
    snapshot: SnapshotRecord,
}

#[derive(Serialize, Deserialize)]
pub struct ReplaySession {
    pub version: String,
    pub created_at_ms: u64,
    trace: Vec<TraceEntryRecord>,
    snapshots: Vec<SnapshotRecord>,
    #[serde(default)]
    saved_snapshots: Vec<SavedSnapshotRecord>,
    #[serde(deserialize_with = "mask_u16_vec")]
    breakpoints: Vec<u16>,
    pub source_code: String,
    pub asm_code: String,
}

/// Serializes the current stepper state into a replay payload.
pub fn export(
    stepper: &Stepper,
    source_code: &str,
    asm_code: &str,
    saved: &[(String, usize)],
    created_at_ms: u64,
) -> String {
    let session = ReplaySession {
        version: REPLAY_VERSION.to_string(),
        created_at_ms,
        trace: stepper.trace().iter().map(TraceEntryRecord::from).collect(),
        snapshots: stepper.snapshots().iter().map(SnapshotRecord::from).collect(),
        saved_snapshots: saved
            .iter()
            .filter_map(|(label, index)| {
                stepper.snapshots().get(*index).map(|s| SavedSnapshotRecord {
                    label: label.clone(),
                    snapshot: SnapshotRecord::from(s),
                })
            })
            .collect(),
        breakpoints: stepper.breakpoints().iter().copied().collect(),
        source_code: source_code.to_string(),
        asm_code: asm_code.to_string(),
    };
    serde_json::to_string_pretty(&session).expect("replay session is always serializable")
}

/// Reconstructs a `Stepper` from a replay payload. The embedded assembly is
/// tried first; source is recompiled only if the assembly is missing or
/// fails to assemble cleanly.
pub fn import(text: &str) -> Result<Stepper, ImportError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(ImportError::NotAnObject)?;
    for field in ["trace", "snapshots", "breakpoints"] {
        match object.get(field) {
            Some(serde_json::Value::Array(_)) => {}
            Some(_) => return Err(ImportError::NotASequence(field)),
            None => return Err(ImportError::MissingField(field)),
        }
    }

    let session: ReplaySession = serde_json::from_value(value)?;

    let program = if !session.asm_code.trim().is_empty() {
        let candidate = asm::assemble(&session.asm_code);
        if candidate.has_errors() {
            reassemble_from_source(&session.source_code)?
        } else {
            candidate
        }
    } else {
        reassemble_from_source(&session.source_code)?
    };

    let snapshots: Vec<Snapshot> = session.snapshots.into_iter().map(SnapshotRecord::into_snapshot).collect();
    if snapshots.is_empty() {
        return Err(ImportError::Reassembly);
    }
    let trace: Vec<TraceEntry> = session.trace.into_iter().map(TraceEntryRecord::into_entry).collect();
    let breakpoints: BTreeSet<u16> = session.breakpoints.into_iter().collect();
    let cursor = snapshots.len() - 1;

    Ok(Stepper::from_parts(
        program,
        CoreConfig::default(),
        snapshots,
        trace,
        breakpoints,
        cursor,
    ))
}

fn reassemble_from_source(source_code: &str) -> Result<vm86::Program, ImportError> {
    let (asm_text, diagnostics) = lang::compile(source_code);
    if diagnostics.iter().any(|d| d.severity == vm86::Severity::Error) {
        return Err(ImportError::Reassembly);
    }
    let program = asm::assemble(&asm_text);
    if program.has_errors() {
        return Err(ImportError::Reassembly);
    }
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stepper::Stepper;

    #[test]
    fn export_then_import_round_trips_snapshots_and_trace() {
        let program = asm::assemble("MOV AX, 5\nADD AX, 1\nHLT\n");
        let mut stepper = Stepper::new(program, CoreConfig::default());
        stepper.step_into();
        stepper.step_into();

        let payload = export(&stepper, "", "MOV AX, 5\nADD AX, 1\nHLT\n", &[], 0);
        let restored = import(&payload).unwrap();

        assert_eq!(restored.trace().len(), stepper.trace().len());
        assert_eq!(restored.snapshots().len(), stepper.snapshots().len());
        assert_eq!(restored.state().registers.ax, stepper.state().registers.ax);
    }

    #[test]
    fn import_rejects_non_object_payload() {
        assert!(matches!(import("[1,2,3]"), Err(ImportError::NotAnObject)));
    }

    #[test]
    fn import_rejects_missing_required_field() {
        let payload = r#"{"trace":[],"snapshots":[{"state":{"ax":0,"bx":0,"cx":0,"dx":0,"si":0,"di":0,"sp":4094,"bp":0,"ip":0,"flags":0,"memory":[],"halted":false,"error":null},"output":[],"trace_length":0,"instructions_executed":0,"total_cycles":0,"simulated_load":0.0}],"source_code":"","asm_code":""}"#;
        assert!(matches!(import(payload), Err(ImportError::MissingField("breakpoints"))));
    }

    #[test]
    fn import_tolerates_unknown_fields() {
        let program = asm::assemble("HLT\n");
        let stepper = Stepper::new(program, CoreConfig::default());
        let mut payload: serde_json::Value = serde_json::from_str(&export(&stepper, "", "HLT\n", &[], 0)).unwrap();
        payload["totally_unknown_field"] = serde_json::json!(42);
        assert!(import(&payload.to_string()).is_ok());
    }
}
