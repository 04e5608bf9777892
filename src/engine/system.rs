//
// Architectural constants shared by the engine components.
//

pub const PAGE_SIZE: usize = 4 * 1024;
pub const NUMBER_OF_REGISTERS: usize = 32;

/// Architectural integer width, fixed at image-load time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Xlen {
    Rv32,
    Rv64,
}

impl Xlen {
    /// Width in bits.
    pub fn bits(self) -> u32 {
        match self {
            Xlen::Rv32 => 32,
            Xlen::Rv64 => 64,
        }
    }

    /// Mask selecting the effective shift amount for non-`*W` shifts.
    pub fn shift_mask(self) -> u32 {
        match self {
            Xlen::Rv32 => 0x1f,
            Xlen::Rv64 => 0x3f,
        }
    }
}

/// Privilege level of the hart. Ordered: User < Supervisor < Machine.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum PrivilegeMode {
    User,
    Supervisor,
    Machine,
}

impl PrivilegeMode {
    pub fn encode(self) -> u64 {
        match self {
            PrivilegeMode::User => 0,
            PrivilegeMode::Supervisor => 1,
            PrivilegeMode::Machine => 3,
        }
    }

    pub fn decode(value: u64) -> PrivilegeMode {
        match value & 0x3 {
            0 => PrivilegeMode::User,
            1 => PrivilegeMode::Supervisor,
            _ => PrivilegeMode::Machine,
        }
    }
}

/// Intent of a memory access, as seen by the MMU and the TLB.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AccessType {
    Fetch,
    Load,
    Store,
}

/// Architectural exceptions. These are values handed to the trap-entry
/// sequence, not Rust errors; the run only terminates on the halt
/// conditions, never because an exception was raised.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Exception {
    InstructionAddressMisaligned(u64),
    InstructionAccessFault(u64),
    IllegalInstruction(u32),
    Breakpoint(u64),
    LoadAddressMisaligned(u64),
    LoadAccessFault(u64),
    StoreAddressMisaligned(u64),
    StoreAccessFault(u64),
    EnvironmentCallFromU,
    EnvironmentCallFromS,
    EnvironmentCallFromM,
    InstructionPageFault(u64),
    LoadPageFault(u64),
    StorePageFault(u64),
}

impl Exception {
    /// Cause code written to `xcause` on trap entry.
    pub fn code(self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned(_) => 0,
            Exception::InstructionAccessFault(_) => 1,
            Exception::IllegalInstruction(_) => 2,
            Exception::Breakpoint(_) => 3,
            Exception::LoadAddressMisaligned(_) => 4,
            Exception::LoadAccessFault(_) => 5,
            Exception::StoreAddressMisaligned(_) => 6,
            Exception::StoreAccessFault(_) => 7,
            Exception::EnvironmentCallFromU => 8,
            Exception::EnvironmentCallFromS => 9,
            Exception::EnvironmentCallFromM => 11,
            Exception::InstructionPageFault(_) => 12,
            Exception::LoadPageFault(_) => 13,
            Exception::StorePageFault(_) => 15,
        }
    }

    /// Value written to `xtval` on trap entry.
    pub fn tval(self) -> u64 {
        match self {
            Exception::InstructionAddressMisaligned(addr)
            | Exception::InstructionAccessFault(addr)
            | Exception::Breakpoint(addr)
            | Exception::LoadAddressMisaligned(addr)
            | Exception::LoadAccessFault(addr)
            | Exception::StoreAddressMisaligned(addr)
            | Exception::StoreAccessFault(addr)
            | Exception::InstructionPageFault(addr)
            | Exception::LoadPageFault(addr)
            | Exception::StorePageFault(addr) => addr,
            Exception::IllegalInstruction(raw) => raw as u64,
            Exception::EnvironmentCallFromU
            | Exception::EnvironmentCallFromS
            | Exception::EnvironmentCallFromM => 0,
        }
    }

    /// Maps an access intent onto the matching page-fault exception.
    pub fn page_fault(access: AccessType, addr: u64) -> Exception {
        match access {
            AccessType::Fetch => Exception::InstructionPageFault(addr),
            AccessType::Load => Exception::LoadPageFault(addr),
            AccessType::Store => Exception::StorePageFault(addr),
        }
    }

    /// Maps an access intent onto the matching access-fault exception.
    pub fn access_fault(access: AccessType, addr: u64) -> Exception {
        match access {
            AccessType::Fetch => Exception::InstructionAccessFault(addr),
            AccessType::Load => Exception::LoadAccessFault(addr),
            AccessType::Store => Exception::StoreAccessFault(addr),
        }
    }

    /// Maps an access intent onto the matching misaligned-address exception.
    pub fn misaligned(access: AccessType, addr: u64) -> Exception {
        match access {
            AccessType::Fetch => Exception::InstructionAddressMisaligned(addr),
            AccessType::Load => Exception::LoadAddressMisaligned(addr),
            AccessType::Store => Exception::StoreAddressMisaligned(addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn privilege_order() {
        assert!(PrivilegeMode::User < PrivilegeMode::Supervisor);
        assert!(PrivilegeMode::Supervisor < PrivilegeMode::Machine);
        assert_eq!(PrivilegeMode::decode(3), PrivilegeMode::Machine);
        assert_eq!(
            PrivilegeMode::decode(PrivilegeMode::User.encode()),
            PrivilegeMode::User
        );
    }

    #[test]
    fn cause_codes_match_the_privileged_numbering() {
        assert_eq!(Exception::IllegalInstruction(0).code(), 2);
        assert_eq!(Exception::EnvironmentCallFromU.code(), 8);
        assert_eq!(Exception::EnvironmentCallFromM.code(), 11);
        assert_eq!(Exception::StorePageFault(0).code(), 15);
    }
}
