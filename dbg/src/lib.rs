//! Orchestrates execution of an assembled [`vm86::Program`] step by step,
//! maintains the seekable snapshot/trace timeline, and provides the replay
//! codec and trace-consuming analyzers built on top of it.

pub mod analyzers;
pub mod assertion;
pub mod config;
pub mod output;
pub mod replay;
pub mod snapshot;
pub mod stepper;
pub mod trace;

pub use config::CoreConfig;
pub use output::format_output;
pub use snapshot::{PerformanceRecord, Snapshot};
pub use stepper::{StopReason, Stepper, WatchKind, Watchpoint};
pub use trace::{OutputEvent, TraceEntry};
