//! Tunables collected into one record rather than scattered as magic
//! numbers through the stepper, mirroring [`vm86::constants`] but exposed as
//! a value the host application can override.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CoreConfig {
    pub memory_size_bytes: usize,
    pub stack_top: u16,
    pub var_base: u16,
    pub port_base: u16,
    pub max_steps_per_continue: u32,
    pub memory_diff_cap: usize,
}

impl Default for CoreConfig {
    fn default() -> CoreConfig {
        CoreConfig {
            memory_size_bytes: vm86::constants::MEMORY_SIZE,
            stack_top: vm86::constants::STACK_TOP,
            var_base: vm86::constants::VAR_BASE,
            port_base: vm86::constants::PORT_BASE,
            max_steps_per_continue: vm86::constants::MAX_STEPS_PER_CONTINUE,
            memory_diff_cap: vm86::constants::MEMORY_DIFF_CAP,
        }
    }
}
