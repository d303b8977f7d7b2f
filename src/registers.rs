use util::EnumFromStr;
use util_derive::EnumFromStr;

/// The ten named 16-bit slots that make up a `CPUState`: eight
/// general/pointer registers plus `IP` and `FLAGS`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum RegisterId {
    AX,
    BX,
    CX,
    DX,
    SI,
    DI,
    SP,
    BP,
    IP,
    FLAGS,
}

impl RegisterId {
    pub const ALL: [RegisterId; 10] = [
        RegisterId::AX,
        RegisterId::BX,
        RegisterId::CX,
        RegisterId::DX,
        RegisterId::SI,
        RegisterId::DI,
        RegisterId::SP,
        RegisterId::BP,
        RegisterId::IP,
        RegisterId::FLAGS,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            RegisterId::AX => "AX",
            RegisterId::BX => "BX",
            RegisterId::CX => "CX",
            RegisterId::DX => "DX",
            RegisterId::SI => "SI",
            RegisterId::DI => "DI",
            RegisterId::SP => "SP",
            RegisterId::BP => "BP",
            RegisterId::IP => "IP",
            RegisterId::FLAGS => "FLAGS",
        }
    }

    /// General purpose / pointer registers that can appear as a memory
    /// operand's base register.
    pub const fn is_addressable(self) -> bool {
        !matches!(self, RegisterId::IP | RegisterId::FLAGS)
    }
}

impl std::fmt::Display for RegisterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The fixed record of ten named 16-bit registers. Every write is masked to
/// 16 bits, so every field always satisfies the `0 <= v < 2^16` invariant.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Registers {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub si: u16,
    pub di: u16,
    pub sp: u16,
    pub bp: u16,
    pub ip: u16,
    pub flags: u16,
}

impl Registers {
    pub fn get(&self, id: RegisterId) -> u16 {
        match id {
            RegisterId::AX => self.ax,
            RegisterId::BX => self.bx,
            RegisterId::CX => self.cx,
            RegisterId::DX => self.dx,
            RegisterId::SI => self.si,
            RegisterId::DI => self.di,
            RegisterId::SP => self.sp,
            RegisterId::BP => self.bp,
            RegisterId::IP => self.ip,
            RegisterId::FLAGS => self.flags,
        }
    }

    pub fn set(&mut self, id: RegisterId, value: u16) {
        match id {
            RegisterId::AX => self.ax = value,
            RegisterId::BX => self.bx = value,
            RegisterId::CX => self.cx = value,
            RegisterId::DX => self.dx = value,
            RegisterId::SI => self.si = value,
            RegisterId::DI => self.di = value,
            RegisterId::SP => self.sp = value,
            RegisterId::BP => self.bp = value,
            RegisterId::IP => self.ip = value,
            RegisterId::FLAGS => self.flags = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_round_trips() {
        let mut regs = Registers::default();
        for id in RegisterId::ALL {
            regs.set(id, 0x1234);
            assert_eq!(regs.get(id), 0x1234);
        }
    }

    #[test]
    fn from_str_is_case_sensitive_on_canonical_names() {
        assert_eq!(RegisterId::from_str("AX"), Ok(RegisterId::AX));
        assert!(RegisterId::from_str("ax").is_err());
    }
}
