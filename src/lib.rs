//! Core 16-bit virtual CPU: registers, flags, flat memory, ports and
//! interrupts, and the pure per-instruction execution semantics that the
//! assembler, debugger and CLI crates all build on.

pub mod constants;
pub mod cpu;
pub mod flags;
pub mod isa;
pub mod memory;
pub mod numbers;
pub mod program;
pub mod registers;

pub use cpu::CPUState;
pub use flags::Flag;
pub use isa::{Condition, MemRef, OpCode, Operand};
pub use memory::Memory;
pub use program::{Diagnostic, Instruction, Program, Severity};
pub use registers::{RegisterId, Registers};
