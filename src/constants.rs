//! Fixed machine geometry. Collected here rather than scattered as magic
//! numbers through `cpu`/`memory`, mirroring the single `CoreConfig` idea
//! even though these particular values are compile-time constants.

/// Total size of the flat, byte-addressable memory.
pub const MEMORY_SIZE: usize = 4096;

/// Value `SP` holds immediately after reset.
pub const STACK_TOP: u16 = 4094;

/// First address the code generator may use for variable storage.
pub const VAR_BASE: u16 = 0x0100;

/// Base address of the memory-mapped I/O port window.
pub const PORT_BASE: u16 = 0x0300;

/// Number of addressable I/O ports.
pub const PORT_COUNT: usize = 256;

/// Number of interrupt vectors, and thus the size in words of the vector
/// table living at the very start of memory.
pub const VECTOR_COUNT: usize = 256;

/// Maximum number of instructions a single `Continue`/`StepOver` call will
/// execute before giving up and halting with an "infinite loop?" error.
pub const MAX_STEPS_PER_CONTINUE: u32 = 10_000;

/// Maximum number of changed-memory-word addresses kept per trace entry.
pub const MEMORY_DIFF_CAP: usize = 24;

/// Returns the byte address of port `port`'s memory-mapped word.
pub const fn port_address(port: u8) -> u16 {
    PORT_BASE + (port as u16) * 2
}

/// Returns the byte address of interrupt vector `vector`'s handler word.
pub const fn vector_address(vector: u8) -> u16 {
    (vector as u16) * 2
}
