use crate::decode::{
    decode, AType, BType, CsrType, DecodingError, IType, Instruction, JType, RType, SType,
    ShiftType,
};
use crate::disassemble::disassemble;
use crate::elf::Program;
use crate::engine::csr::{
    CsrEffect, CsrFile, CSR_MCAUSE, CSR_MEDELEG, CSR_MEPC, CSR_MSTATUS, CSR_MTVAL, CSR_MTVEC,
    CSR_SCAUSE, CSR_SEPC, CSR_STVAL, CSR_STVEC, MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP,
    MSTATUS_MPRV, MSTATUS_SIE, MSTATUS_SPIE, MSTATUS_SPP,
};
use crate::engine::memory::Memory;
use crate::engine::mmu::Mmu;
use crate::engine::system::{AccessType, Exception, PrivilegeMode, Xlen};
use bytesize::ByteSize;
use log::{debug, info, trace};
use thiserror::Error;

//
// Public Interface
//

pub type EmulatorValue = u64;

pub mod defaults {
    use super::*;

    pub const MEMORY_SIZE: ByteSize = ByteSize(128 * bytesize::MIB);
    pub const STACK_SIZE: ByteSize = ByteSize(4 * bytesize::MIB);
}

#[derive(Clone, Copy, Debug)]
pub struct EmulatorOptions {
    pub memory_size: ByteSize,
    pub stack_size: ByteSize,
    /// Abort the run after this many committed instructions.
    pub max_steps: Option<u64>,
    /// Turn misaligned data accesses into address-misaligned traps instead
    /// of satisfying them transparently.
    pub strict_align: bool,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            memory_size: defaults::MEMORY_SIZE,
            stack_size: defaults::STACK_SIZE,
            max_steps: None,
            strict_align: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("has reached the maximum step count of {0}")]
    StepLimitReached(u64),
    #[error("loadable segment at {0:#x} does not fit into physical memory")]
    SegmentOutOfRange(u64),
}

/// One hart plus the physical memory it is bound to: the integer and
/// float register files, the PC, the CSR file, the privilege level, the
/// LR/SC reservation, and the step loop.
pub struct EmulatorState {
    xlen: Xlen,
    regs: [EmulatorValue; 32],
    fregs: [u64; 32],
    pc: u64,
    privilege: PrivilegeMode,
    csrs: CsrFile,
    mmu: Mmu,
    memory: Memory,
    reservation: Option<(u64, u64)>,
    halted: bool,
    steps: u64,
    options: EmulatorOptions,
}

impl EmulatorState {
    pub fn new(xlen: Xlen, options: EmulatorOptions) -> Self {
        Self {
            xlen,
            regs: [0; 32],
            fregs: [0; 32],
            pc: 0,
            privilege: PrivilegeMode::Machine,
            csrs: CsrFile::new(xlen),
            mmu: Mmu::new(),
            memory: Memory::new(options.memory_size.as_u64() as usize),
            reservation: None,
            halted: false,
            steps: 0,
            options,
        }
    }

    /// Fully bootstraps the hart to run the given user-mode `program`:
    /// stamps the loadable segments, points the PC at the entry, aligns a
    /// stack below the top of memory, and clears `ra` so that a return
    /// from `main` hits the halt sentinel.
    pub fn bootstrap(&mut self, program: &Program) -> Result<(), EmulatorError> {
        for segment in &program.segments {
            self.memory
                .write_bytes(segment.address, &segment.content)
                .map_err(|_| EmulatorError::SegmentOutOfRange(segment.address))?;
            debug!(
                "segment: start={:#x} file={} mem={}",
                segment.address,
                segment.content.len(),
                segment.mem_size
            );
        }

        let sp = (self.memory.size() as u64 - 16) & !0xf;
        self.pc = program.entry;
        self.privilege = PrivilegeMode::User;
        self.write_reg(2, sp);
        if let Some(gp) = program.global_pointer {
            self.write_reg(3, gp);
        }
        // ra = 0 turns the final `ret` into the halt sentinel.
        self.regs[1] = 0;

        debug!(
            "init state: pc={:#x} sp={:#x} gp={:#x} xlen={}",
            self.pc,
            sp,
            program.global_pointer.unwrap_or(0),
            self.xlen.bits()
        );
        Ok(())
    }

    /// Runs until the hart halts. The returned value is the final `a0`,
    /// which the front end masks into the process exit status.
    pub fn run(&mut self) -> Result<EmulatorValue, EmulatorError> {
        time_info!("emulation", {
            while !self.halted {
                if let Some(limit) = self.options.max_steps {
                    if self.steps >= limit {
                        return Err(EmulatorError::StepLimitReached(limit));
                    }
                }
                self.step();
            }
        });
        info!("hart halted after {} instructions", self.steps);
        Ok(self.get_reg(10))
    }

    /// One fully-committed instruction: fetch, translate, decode, execute,
    /// commit. Exceptions raised anywhere in the sequence divert through
    /// the trap-entry machinery instead of surfacing to the caller.
    pub fn step(&mut self) {
        if self.halted {
            return;
        }
        let pc = self.pc;
        if let Err(exception) = self.step_instruction(pc) {
            self.take_trap(exception, pc);
        }
        self.regs[0] = 0;
        self.steps += 1;
        self.csrs.increment_counters(1);
        // A control transfer to address zero with a cleared return address
        // is the halt sentinel set up by the loader.
        if !self.halted && self.pc == 0 && self.regs[1] == 0 {
            debug!("hart reached the halt sentinel");
            self.halted = true;
        }
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn pc_set(&mut self, pc: u64) {
        self.pc = self.mask_address(pc);
    }

    pub fn get_reg(&self, reg: u8) -> EmulatorValue {
        self.regs[reg as usize]
    }

    pub fn set_reg(&mut self, reg: u8, value: EmulatorValue) {
        assert!(reg != 0, "cannot set `zero` register");
        self.regs[reg as usize] = self.normalize(value);
    }

    pub fn xlen(&self) -> Xlen {
        self.xlen
    }

    pub fn privilege(&self) -> PrivilegeMode {
        self.privilege
    }

    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Requests a stop between instructions, e.g. from a host signal.
    pub fn request_halt(&mut self) {
        self.halted = true;
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Masked CSR read, for the harness.
    pub fn csr(&self, addr: u16) -> Option<u64> {
        self.csrs.read(addr)
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
}

//
// Private Implementation
//

impl EmulatorState {
    /// Register writes discard `x0` and keep RV32 values sign-extended in
    /// their 64-bit cells.
    fn write_reg(&mut self, reg: u8, value: u64) {
        if reg == 0 {
            return;
        }
        self.regs[reg as usize] = self.normalize(value);
    }

    fn normalize(&self, value: u64) -> u64 {
        match self.xlen {
            Xlen::Rv32 => value as i32 as i64 as u64,
            Xlen::Rv64 => value,
        }
    }

    fn mask_address(&self, addr: u64) -> u64 {
        match self.xlen {
            Xlen::Rv32 => addr & 0xffff_ffff,
            Xlen::Rv64 => addr,
        }
    }

    fn translate(&mut self, va: u64, access: AccessType) -> Result<u64, Exception> {
        self.mmu.translate(
            &mut self.memory,
            &self.csrs,
            self.privilege,
            self.xlen,
            va,
            access,
        )
    }

    fn fetch_half(&mut self, va: u64) -> Result<u16, Exception> {
        let va = self.mask_address(va);
        let pa = self.translate(va, AccessType::Fetch)?;
        self.memory
            .read_u16(pa)
            .map_err(|_| Exception::InstructionAccessFault(va))
    }

    fn read_virt(&mut self, va: u64, width: u64, access: AccessType) -> Result<u64, Exception> {
        let va = self.mask_address(va);
        if self.options.strict_align && va & (width - 1) != 0 {
            return Err(Exception::misaligned(access, va));
        }
        if (va & 0xfff) + width <= 0x1000 {
            let pa = self.translate(va, access)?;
            let fault = |_| Exception::access_fault(access, va);
            return match width {
                1 => self.memory.read_u8(pa).map(u64::from).map_err(fault),
                2 => self.memory.read_u16(pa).map(u64::from).map_err(fault),
                4 => self.memory.read_u32(pa).map(u64::from).map_err(fault),
                _ => self.memory.read_u64(pa).map_err(fault),
            };
        }
        // The access straddles a page boundary; translate byte by byte.
        let mut value = 0;
        for i in 0..width {
            let pa = self.translate(va + i, access)?;
            let byte = self
                .memory
                .read_u8(pa)
                .map_err(|_| Exception::access_fault(access, va))?;
            value |= u64::from(byte) << (8 * i);
        }
        Ok(value)
    }

    fn write_virt(&mut self, va: u64, value: u64, width: u64) -> Result<(), Exception> {
        let access = AccessType::Store;
        let va = self.mask_address(va);
        if self.options.strict_align && va & (width - 1) != 0 {
            return Err(Exception::misaligned(access, va));
        }
        if (va & 0xfff) + width <= 0x1000 {
            let pa = self.translate(va, access)?;
            let fault = |_| Exception::access_fault(access, va);
            match width {
                1 => self.memory.write_u8(pa, value as u8).map_err(fault)?,
                2 => self.memory.write_u16(pa, value as u16).map_err(fault)?,
                4 => self.memory.write_u32(pa, value as u32).map_err(fault)?,
                _ => self.memory.write_u64(pa, value).map_err(fault)?,
            }
        } else {
            for i in 0..width {
                let pa = self.translate(va + i, access)?;
                self.memory
                    .write_u8(pa, (value >> (8 * i)) as u8)
                    .map_err(|_| Exception::access_fault(access, va))?;
            }
        }
        self.clobber_reservation(va, width);
        Ok(())
    }

    /// Any store overlapping the reserved granule invalidates it.
    fn clobber_reservation(&mut self, va: u64, width: u64) {
        if let Some((addr, len)) = self.reservation {
            if va < addr + len && addr < va + width {
                self.reservation = None;
            }
        }
    }

    fn step_instruction(&mut self, pc: u64) -> Result<(), Exception> {
        if pc & 0x1 != 0 {
            return Err(Exception::InstructionAddressMisaligned(pc));
        }
        let half0 = self.fetch_half(pc)?;
        let half1 = if half0 & 0x3 == 0x3 {
            Some(self.fetch_half(pc.wrapping_add(2))?)
        } else {
            None
        };
        let raw = match half1 {
            Some(h) => (h as u32) << 16 | half0 as u32,
            None => half0 as u32,
        };
        let (instruction, length) = decode(half0, half1, self.xlen).map_err(|err| {
            debug!("decode failed at pc={:#x}: {}", pc, err);
            match err {
                DecodingError::Illegal(_) | DecodingError::Reserved(_) => {
                    Exception::IllegalInstruction(raw)
                }
                DecodingError::Truncated => Exception::IllegalInstruction(raw),
            }
        })?;
        if log::log_enabled!(log::Level::Trace) {
            trace!("[{:#010x}] {}", pc, disassemble(instruction));
        }
        execute(self, raw, instruction, length)
    }

    fn pc_add(&mut self, length: u64) {
        self.pc = self.mask_address(self.pc.wrapping_add(length));
    }

    fn pc_jump(&mut self, target: u64) -> Result<(), Exception> {
        let target = self.mask_address(target);
        // With the compressed extension live, only bit 0 makes a target
        // misaligned.
        if target & 0x1 != 0 {
            return Err(Exception::InstructionAddressMisaligned(target));
        }
        self.pc = target;
        Ok(())
    }

    //
    // Trap entry and return: save pc, stack the interrupt enable, record
    // cause/tval, switch privilege, vector to the handler.
    //

    fn take_trap(&mut self, exception: Exception, pc: u64) {
        self.reservation = None;
        let cause = exception.code();
        let deleg = self.csrs.get(CSR_MEDELEG);
        let delegated =
            self.privilege <= PrivilegeMode::Supervisor && (deleg >> cause) & 0x1 == 0x1;
        debug!(
            "trap: {:?} at pc={:#x} -> {} mode",
            exception,
            pc,
            if delegated { "supervisor" } else { "machine" }
        );

        if delegated {
            self.csrs.set(CSR_SEPC, pc);
            self.csrs.set(CSR_SCAUSE, cause);
            self.csrs.set(CSR_STVAL, exception.tval());
            let mut status = self.csrs.get(CSR_MSTATUS);
            if status & MSTATUS_SIE != 0 {
                status |= MSTATUS_SPIE;
            } else {
                status &= !MSTATUS_SPIE;
            }
            status &= !MSTATUS_SIE;
            status = (status & !MSTATUS_SPP) | (self.privilege.encode() << 8);
            self.csrs.set(CSR_MSTATUS, status);
            self.privilege = PrivilegeMode::Supervisor;
            self.enter_handler(self.csrs.get(CSR_STVEC), cause);
        } else {
            self.csrs.set(CSR_MEPC, pc);
            self.csrs.set(CSR_MCAUSE, cause);
            self.csrs.set(CSR_MTVAL, exception.tval());
            let mut status = self.csrs.get(CSR_MSTATUS);
            if status & MSTATUS_MIE != 0 {
                status |= MSTATUS_MPIE;
            } else {
                status &= !MSTATUS_MPIE;
            }
            status &= !MSTATUS_MIE;
            status = (status & !MSTATUS_MPP) | (self.privilege.encode() << 11);
            self.csrs.set(CSR_MSTATUS, status);
            self.privilege = PrivilegeMode::Machine;
            self.enter_handler(self.csrs.get(CSR_MTVEC), cause);
        }
    }

    fn enter_handler(&mut self, tvec: u64, cause: u64) {
        let base = tvec & !0x3;
        if base == 0 {
            // No handler installed; the trap is unrecoverable and the run
            // terminates.
            debug!("unhandled trap with cause {}; halting", cause);
            self.pc = 0;
            self.halted = true;
            return;
        }
        self.pc = if tvec & 0x3 == 1 {
            base.wrapping_add(4 * cause)
        } else {
            base
        };
    }

    fn exec_mret(&mut self, raw: u32) -> Result<(), Exception> {
        if self.privilege != PrivilegeMode::Machine {
            return Err(Exception::IllegalInstruction(raw));
        }
        let mut status = self.csrs.get(CSR_MSTATUS);
        let previous = PrivilegeMode::decode((status & MSTATUS_MPP) >> 11);
        if status & MSTATUS_MPIE != 0 {
            status |= MSTATUS_MIE;
        } else {
            status &= !MSTATUS_MIE;
        }
        status |= MSTATUS_MPIE;
        status &= !MSTATUS_MPP;
        if previous != PrivilegeMode::Machine {
            status &= !MSTATUS_MPRV;
        }
        self.csrs.set(CSR_MSTATUS, status);
        self.privilege = previous;
        self.reservation = None;
        self.pc = self.csrs.get(CSR_MEPC);
        Ok(())
    }

    fn exec_sret(&mut self, raw: u32) -> Result<(), Exception> {
        if self.privilege < PrivilegeMode::Supervisor {
            return Err(Exception::IllegalInstruction(raw));
        }
        let mut status = self.csrs.get(CSR_MSTATUS);
        let previous = if status & MSTATUS_SPP != 0 {
            PrivilegeMode::Supervisor
        } else {
            PrivilegeMode::User
        };
        if status & MSTATUS_SPIE != 0 {
            status |= MSTATUS_SIE;
        } else {
            status &= !MSTATUS_SIE;
        }
        status |= MSTATUS_SPIE;
        status &= !MSTATUS_SPP;
        status &= !MSTATUS_MPRV;
        self.csrs.set(CSR_MSTATUS, status);
        self.privilege = previous;
        self.reservation = None;
        self.pc = self.csrs.get(CSR_SEPC);
        Ok(())
    }
}

fn uext(xlen: Xlen, value: u64) -> u64 {
    match xlen {
        Xlen::Rv32 => value & 0xffff_ffff,
        Xlen::Rv64 => value,
    }
}

fn sext32(value: u64) -> u64 {
    value as i32 as i64 as u64
}

fn xlen_min(xlen: Xlen) -> i64 {
    match xlen {
        Xlen::Rv32 => i32::MIN as i64,
        Xlen::Rv64 => i64::MIN,
    }
}

//
// Execution. Every semantic operation advances the PC itself: sequential
// forms by the encoded length, control transfers to their target. An `Err`
// leaves the PC untouched so trap entry sees the faulting instruction.
//

fn execute(
    state: &mut EmulatorState,
    raw: u32,
    instruction: Instruction,
    length: u64,
) -> Result<(), Exception> {
    use Instruction::*;

    let xlen = state.xlen;
    match instruction {
        Lui(u) => {
            state.write_reg(u.rd, u.imm as u64);
            state.pc_add(length);
        }
        Auipc(u) => {
            let value = state.pc.wrapping_add(u.imm as u64);
            state.write_reg(u.rd, value);
            state.pc_add(length);
        }
        Jal(j) => exec_jal(state, j, length)?,
        Jalr(i) => exec_jalr(state, i, length)?,
        Beq(b) => exec_branch(state, b, length, |a, b| a == b)?,
        Bne(b) => exec_branch(state, b, length, |a, b| a != b)?,
        Blt(b) => exec_branch(state, b, length, |a, b| (a as i64) < (b as i64))?,
        Bge(b) => exec_branch(state, b, length, |a, b| (a as i64) >= (b as i64))?,
        Bltu(b) => exec_branch(state, b, length, |a, b| a < b)?,
        Bgeu(b) => exec_branch(state, b, length, |a, b| a >= b)?,
        Lb(i) => exec_load(state, i, length, 1, true)?,
        Lh(i) => exec_load(state, i, length, 2, true)?,
        Lw(i) => exec_load(state, i, length, 4, true)?,
        Ld(i) => exec_load(state, i, length, 8, true)?,
        Lbu(i) => exec_load(state, i, length, 1, false)?,
        Lhu(i) => exec_load(state, i, length, 2, false)?,
        Lwu(i) => exec_load(state, i, length, 4, false)?,
        Sb(s) => exec_store(state, s, length, 1)?,
        Sh(s) => exec_store(state, s, length, 2)?,
        Sw(s) => exec_store(state, s, length, 4)?,
        Sd(s) => exec_store(state, s, length, 8)?,
        Addi(i) => exec_itype(state, i, length, |a, imm| a.wrapping_add(imm)),
        Slti(i) => exec_itype(state, i, length, |a, imm| ((a as i64) < (imm as i64)) as u64),
        Sltiu(i) => exec_itype(state, i, length, |a, imm| (a < imm) as u64),
        Xori(i) => exec_itype(state, i, length, |a, imm| a ^ imm),
        Ori(i) => exec_itype(state, i, length, |a, imm| a | imm),
        Andi(i) => exec_itype(state, i, length, |a, imm| a & imm),
        Slli(s) => exec_shift(state, s, length, |a, sh| a << sh),
        Srli(s) => exec_shift(state, s, length, move |a, sh| uext(xlen, a) >> sh),
        Srai(s) => exec_shift(state, s, length, |a, sh| ((a as i64) >> sh) as u64),
        Add(r) => exec_rtype(state, r, length, |a, b| a.wrapping_add(b)),
        Sub(r) => exec_rtype(state, r, length, |a, b| a.wrapping_sub(b)),
        Sll(r) => {
            let mask = xlen.shift_mask();
            exec_rtype(state, r, length, move |a, b| a << (b as u32 & mask))
        }
        Slt(r) => exec_rtype(state, r, length, |a, b| ((a as i64) < (b as i64)) as u64),
        Sltu(r) => exec_rtype(state, r, length, |a, b| (a < b) as u64),
        Xor(r) => exec_rtype(state, r, length, |a, b| a ^ b),
        Srl(r) => {
            let mask = xlen.shift_mask();
            exec_rtype(state, r, length, move |a, b| {
                uext(xlen, a) >> (b as u32 & mask)
            })
        }
        Sra(r) => {
            let mask = xlen.shift_mask();
            exec_rtype(state, r, length, move |a, b| {
                ((a as i64) >> (b as u32 & mask)) as u64
            })
        }
        Or(r) => exec_rtype(state, r, length, |a, b| a | b),
        And(r) => exec_rtype(state, r, length, |a, b| a & b),
        Addiw(i) => exec_itype(state, i, length, |a, imm| sext32(a.wrapping_add(imm))),
        Slliw(s) => exec_shift(state, s, length, |a, sh| sext32((a as u32 as u64) << sh)),
        Srliw(s) => exec_shift(state, s, length, |a, sh| sext32(u64::from(a as u32 >> sh))),
        Sraiw(s) => exec_shift(state, s, length, |a, sh| sext32(((a as i32) >> sh) as u32 as u64)),
        Addw(r) => exec_rtype(state, r, length, |a, b| sext32(a.wrapping_add(b))),
        Subw(r) => exec_rtype(state, r, length, |a, b| sext32(a.wrapping_sub(b))),
        Sllw(r) => exec_rtype(state, r, length, |a, b| {
            sext32((a as u32 as u64) << (b as u32 & 0x1f))
        }),
        Srlw(r) => exec_rtype(state, r, length, |a, b| {
            sext32(u64::from(a as u32 >> (b as u32 & 0x1f)))
        }),
        Sraw(r) => exec_rtype(state, r, length, |a, b| {
            sext32(((a as i32) >> (b as u32 & 0x1f)) as u32 as u64)
        }),
        Mul(r) => exec_rtype(state, r, length, |a, b| a.wrapping_mul(b)),
        Mulh(r) => exec_rtype(state, r, length, move |a, b| match xlen {
            Xlen::Rv32 => (((a as i64).wrapping_mul(b as i64)) >> 32) as u64,
            Xlen::Rv64 => (((a as i64 as i128).wrapping_mul(b as i64 as i128)) >> 64) as u64,
        }),
        Mulhsu(r) => exec_rtype(state, r, length, move |a, b| match xlen {
            Xlen::Rv32 => (((a as i64).wrapping_mul(uext(xlen, b) as i64)) >> 32) as u64,
            Xlen::Rv64 => (((a as i64 as i128).wrapping_mul(b as u128 as i128)) >> 64) as u64,
        }),
        Mulhu(r) => exec_rtype(state, r, length, move |a, b| match xlen {
            Xlen::Rv32 => (uext(xlen, a).wrapping_mul(uext(xlen, b))) >> 32,
            Xlen::Rv64 => ((a as u128).wrapping_mul(b as u128) >> 64) as u64,
        }),
        Div(r) => exec_rtype(state, r, length, move |a, b| {
            let (dividend, divisor) = (a as i64, b as i64);
            if divisor == 0 {
                u64::MAX
            } else if dividend == xlen_min(xlen) && divisor == -1 {
                dividend as u64
            } else {
                (dividend / divisor) as u64
            }
        }),
        Divu(r) => exec_rtype(state, r, length, move |a, b| {
            let (dividend, divisor) = (uext(xlen, a), uext(xlen, b));
            if divisor == 0 {
                u64::MAX
            } else {
                dividend / divisor
            }
        }),
        Rem(r) => exec_rtype(state, r, length, move |a, b| {
            let (dividend, divisor) = (a as i64, b as i64);
            if divisor == 0 {
                dividend as u64
            } else if dividend == xlen_min(xlen) && divisor == -1 {
                0
            } else {
                (dividend % divisor) as u64
            }
        }),
        Remu(r) => exec_rtype(state, r, length, move |a, b| {
            let (dividend, divisor) = (uext(xlen, a), uext(xlen, b));
            if divisor == 0 {
                dividend
            } else {
                dividend % divisor
            }
        }),
        Mulw(r) => exec_rtype(state, r, length, |a, b| {
            sext32(((a as i32).wrapping_mul(b as i32)) as u32 as u64)
        }),
        Divw(r) => exec_rtype(state, r, length, |a, b| {
            let (dividend, divisor) = (a as i32, b as i32);
            let quotient = if divisor == 0 {
                -1
            } else if dividend == i32::MIN && divisor == -1 {
                dividend
            } else {
                dividend / divisor
            };
            quotient as i64 as u64
        }),
        Divuw(r) => exec_rtype(state, r, length, |a, b| {
            let (dividend, divisor) = (a as u32, b as u32);
            let quotient = if divisor == 0 {
                u32::MAX
            } else {
                dividend / divisor
            };
            sext32(u64::from(quotient))
        }),
        Remw(r) => exec_rtype(state, r, length, |a, b| {
            let (dividend, divisor) = (a as i32, b as i32);
            let remainder = if divisor == 0 {
                dividend
            } else if dividend == i32::MIN && divisor == -1 {
                0
            } else {
                dividend % divisor
            };
            remainder as i64 as u64
        }),
        Remuw(r) => exec_rtype(state, r, length, |a, b| {
            let (dividend, divisor) = (a as u32, b as u32);
            let remainder = if divisor == 0 {
                dividend
            } else {
                dividend % divisor
            };
            sext32(u64::from(remainder))
        }),
        Fence | FenceI => {
            // Single hart, no store buffer, no instruction cache: both
            // fences are complete once they are decoded.
            state.pc_add(length);
        }
        Ecall => {
            return Err(match state.privilege {
                PrivilegeMode::User => Exception::EnvironmentCallFromU,
                PrivilegeMode::Supervisor => Exception::EnvironmentCallFromS,
                PrivilegeMode::Machine => Exception::EnvironmentCallFromM,
            });
        }
        Ebreak => return Err(Exception::Breakpoint(state.pc)),
        LrW(a) => exec_lr(state, a, length, 4)?,
        LrD(a) => exec_lr(state, a, length, 8)?,
        ScW(a) => exec_sc(state, a, length, 4)?,
        ScD(a) => exec_sc(state, a, length, 8)?,
        AmoswapW(a) => exec_amo_w(state, a, length, |_, b| b)?,
        AmoaddW(a) => exec_amo_w(state, a, length, |m, b| m.wrapping_add(b))?,
        AmoxorW(a) => exec_amo_w(state, a, length, |m, b| m ^ b)?,
        AmoandW(a) => exec_amo_w(state, a, length, |m, b| m & b)?,
        AmoorW(a) => exec_amo_w(state, a, length, |m, b| m | b)?,
        AmominW(a) => exec_amo_w(state, a, length, |m, b| (m as i32).min(b as i32) as u32)?,
        AmomaxW(a) => exec_amo_w(state, a, length, |m, b| (m as i32).max(b as i32) as u32)?,
        AmominuW(a) => exec_amo_w(state, a, length, |m, b| m.min(b))?,
        AmomaxuW(a) => exec_amo_w(state, a, length, |m, b| m.max(b))?,
        AmoswapD(a) => exec_amo_d(state, a, length, |_, b| b)?,
        AmoaddD(a) => exec_amo_d(state, a, length, |m, b| m.wrapping_add(b))?,
        AmoxorD(a) => exec_amo_d(state, a, length, |m, b| m ^ b)?,
        AmoandD(a) => exec_amo_d(state, a, length, |m, b| m & b)?,
        AmoorD(a) => exec_amo_d(state, a, length, |m, b| m | b)?,
        AmominD(a) => exec_amo_d(state, a, length, |m, b| (m as i64).min(b as i64) as u64)?,
        AmomaxD(a) => exec_amo_d(state, a, length, |m, b| (m as i64).max(b as i64) as u64)?,
        AmominuD(a) => exec_amo_d(state, a, length, |m, b| m.min(b))?,
        AmomaxuD(a) => exec_amo_d(state, a, length, |m, b| m.max(b))?,
        Csrrw(c) => exec_csr(state, raw, c, length, CsrOp::ReadWrite { immediate: false })?,
        Csrrs(c) => exec_csr(state, raw, c, length, CsrOp::ReadSet { immediate: false })?,
        Csrrc(c) => exec_csr(state, raw, c, length, CsrOp::ReadClear { immediate: false })?,
        Csrrwi(c) => exec_csr(state, raw, c, length, CsrOp::ReadWrite { immediate: true })?,
        Csrrsi(c) => exec_csr(state, raw, c, length, CsrOp::ReadSet { immediate: true })?,
        Csrrci(c) => exec_csr(state, raw, c, length, CsrOp::ReadClear { immediate: true })?,
        Mret => state.exec_mret(raw)?,
        Sret => state.exec_sret(raw)?,
        Wfi => {
            // No external interrupt sources; wfi completes immediately.
            state.pc_add(length);
        }
        SfenceVma(r) => {
            if state.privilege < PrivilegeMode::Supervisor {
                return Err(Exception::IllegalInstruction(raw));
            }
            let vaddr = (r.rs1 != 0).then(|| state.get_reg(r.rs1));
            let asid = (r.rs2 != 0).then(|| state.get_reg(r.rs2) as u16);
            state.mmu.sfence(vaddr, asid);
            state.pc_add(length);
        }
        Flw(i) => {
            let addr = state.get_reg(i.rs1).wrapping_add(i.imm as u64);
            let value = state.read_virt(addr, 4, AccessType::Load)?;
            state.fregs[i.rd as usize] = value;
            state.pc_add(length);
        }
        Fld(i) => {
            let addr = state.get_reg(i.rs1).wrapping_add(i.imm as u64);
            let value = state.read_virt(addr, 8, AccessType::Load)?;
            state.fregs[i.rd as usize] = value;
            state.pc_add(length);
        }
        Fsw(s) => {
            let addr = state.get_reg(s.rs1).wrapping_add(s.imm as u64);
            let value = state.fregs[s.rs2 as usize];
            state.write_virt(addr, value & 0xffff_ffff, 4)?;
            state.pc_add(length);
        }
        Fsd(s) => {
            let addr = state.get_reg(s.rs1).wrapping_add(s.imm as u64);
            let value = state.fregs[s.rs2 as usize];
            state.write_virt(addr, value, 8)?;
            state.pc_add(length);
        }
    }
    Ok(())
}

fn exec_jal(state: &mut EmulatorState, jtype: JType, length: u64) -> Result<(), Exception> {
    let link = state.pc.wrapping_add(length);
    let target = state.pc.wrapping_add(jtype.imm as u64);
    state.pc_jump(target)?;
    state.write_reg(jtype.rd, link);
    Ok(())
}

fn exec_jalr(state: &mut EmulatorState, itype: IType, length: u64) -> Result<(), Exception> {
    let link = state.pc.wrapping_add(length);
    let target = state.get_reg(itype.rs1).wrapping_add(itype.imm as u64) & !0x1;
    state.pc_jump(target)?;
    state.write_reg(itype.rd, link);
    Ok(())
}

fn exec_branch<Cond>(
    state: &mut EmulatorState,
    btype: BType,
    length: u64,
    cond: Cond,
) -> Result<(), Exception>
where
    Cond: FnOnce(u64, u64) -> bool,
{
    let lhs = state.get_reg(btype.rs1);
    let rhs = state.get_reg(btype.rs2);
    if cond(lhs, rhs) {
        let target = state.pc.wrapping_add(btype.imm as u64);
        state.pc_jump(target)?;
    } else {
        state.pc_add(length);
    }
    Ok(())
}

fn exec_load(
    state: &mut EmulatorState,
    itype: IType,
    length: u64,
    width: u64,
    signed: bool,
) -> Result<(), Exception> {
    let addr = state.get_reg(itype.rs1).wrapping_add(itype.imm as u64);
    let raw = state.read_virt(addr, width, AccessType::Load)?;
    let value = if signed {
        match width {
            1 => raw as i8 as i64 as u64,
            2 => raw as i16 as i64 as u64,
            4 => raw as i32 as i64 as u64,
            _ => raw,
        }
    } else {
        raw
    };
    state.write_reg(itype.rd, value);
    state.pc_add(length);
    Ok(())
}

fn exec_store(
    state: &mut EmulatorState,
    stype: SType,
    length: u64,
    width: u64,
) -> Result<(), Exception> {
    let addr = state.get_reg(stype.rs1).wrapping_add(stype.imm as u64);
    let value = state.get_reg(stype.rs2);
    state.write_virt(addr, value, width)?;
    state.pc_add(length);
    Ok(())
}

fn exec_itype<Op>(state: &mut EmulatorState, itype: IType, length: u64, op: Op)
where
    Op: FnOnce(u64, u64) -> u64,
{
    let value = op(state.get_reg(itype.rs1), itype.imm as u64);
    state.write_reg(itype.rd, value);
    state.pc_add(length);
}

fn exec_shift<Op>(state: &mut EmulatorState, shift: ShiftType, length: u64, op: Op)
where
    Op: FnOnce(u64, u32) -> u64,
{
    let value = op(state.get_reg(shift.rs1), shift.shamt);
    state.write_reg(shift.rd, value);
    state.pc_add(length);
}

fn exec_rtype<Op>(state: &mut EmulatorState, rtype: RType, length: u64, op: Op)
where
    Op: FnOnce(u64, u64) -> u64,
{
    let value = op(state.get_reg(rtype.rs1), state.get_reg(rtype.rs2));
    state.write_reg(rtype.rd, value);
    state.pc_add(length);
}

fn exec_lr(
    state: &mut EmulatorState,
    atype: AType,
    length: u64,
    width: u64,
) -> Result<(), Exception> {
    let addr = state.mask_address(state.get_reg(atype.rs1));
    if addr & (width - 1) != 0 {
        return Err(Exception::LoadAddressMisaligned(addr));
    }
    let raw = state.read_virt(addr, width, AccessType::Load)?;
    let value = if width == 4 { sext32(raw) } else { raw };
    state.write_reg(atype.rd, value);
    state.reservation = Some((addr, width));
    state.pc_add(length);
    Ok(())
}

fn exec_sc(
    state: &mut EmulatorState,
    atype: AType,
    length: u64,
    width: u64,
) -> Result<(), Exception> {
    let addr = state.mask_address(state.get_reg(atype.rs1));
    if addr & (width - 1) != 0 {
        return Err(Exception::StoreAddressMisaligned(addr));
    }
    let success = state.reservation == Some((addr, width));
    state.reservation = None;
    if success {
        let value = state.get_reg(atype.rs2);
        state.write_virt(addr, value, width)?;
        state.write_reg(atype.rd, 0);
    } else {
        state.write_reg(atype.rd, 1);
    }
    state.pc_add(length);
    Ok(())
}

fn exec_amo_w<Op>(
    state: &mut EmulatorState,
    atype: AType,
    length: u64,
    op: Op,
) -> Result<(), Exception>
where
    Op: FnOnce(u32, u32) -> u32,
{
    let addr = state.mask_address(state.get_reg(atype.rs1));
    if addr & 0x3 != 0 {
        return Err(Exception::StoreAddressMisaligned(addr));
    }
    let old = state.read_virt(addr, 4, AccessType::Load)? as u32;
    let new = op(old, state.get_reg(atype.rs2) as u32);
    state.write_virt(addr, u64::from(new), 4)?;
    state.write_reg(atype.rd, sext32(u64::from(old)));
    state.pc_add(length);
    Ok(())
}

fn exec_amo_d<Op>(
    state: &mut EmulatorState,
    atype: AType,
    length: u64,
    op: Op,
) -> Result<(), Exception>
where
    Op: FnOnce(u64, u64) -> u64,
{
    let addr = state.mask_address(state.get_reg(atype.rs1));
    if addr & 0x7 != 0 {
        return Err(Exception::StoreAddressMisaligned(addr));
    }
    let old = state.read_virt(addr, 8, AccessType::Load)?;
    let new = op(old, state.get_reg(atype.rs2));
    state.write_virt(addr, new, 8)?;
    state.write_reg(atype.rd, old);
    state.pc_add(length);
    Ok(())
}

#[derive(Clone, Copy)]
enum CsrOp {
    ReadWrite { immediate: bool },
    ReadSet { immediate: bool },
    ReadClear { immediate: bool },
}

fn exec_csr(
    state: &mut EmulatorState,
    raw: u32,
    csr: CsrType,
    length: u64,
    op: CsrOp,
) -> Result<(), Exception> {
    let illegal = || Exception::IllegalInstruction(raw);
    if CsrFile::required_privilege(csr.csr) > state.privilege {
        return Err(illegal());
    }
    let source = match op {
        CsrOp::ReadWrite { immediate }
        | CsrOp::ReadSet { immediate }
        | CsrOp::ReadClear { immediate } => {
            if immediate {
                u64::from(csr.rs1)
            } else {
                state.get_reg(csr.rs1)
            }
        }
    };
    // csrrs/csrrc with a zero source read without writing; csrrw with
    // rd = x0 writes without reading.
    let writes = match op {
        CsrOp::ReadWrite { .. } => true,
        CsrOp::ReadSet { .. } | CsrOp::ReadClear { .. } => csr.rs1 != 0,
    };
    if writes && CsrFile::is_read_only(csr.csr) {
        return Err(illegal());
    }

    let old = if matches!(op, CsrOp::ReadWrite { .. }) && csr.rd == 0 {
        // Reads are skipped, but the CSR must still exist.
        if state.csrs.read(csr.csr).is_none() {
            return Err(illegal());
        }
        0
    } else {
        state.csrs.read(csr.csr).ok_or_else(&illegal)?
    };

    if writes {
        let value = match op {
            CsrOp::ReadWrite { .. } => source,
            CsrOp::ReadSet { .. } => old | source,
            CsrOp::ReadClear { .. } => old & !source,
        };
        match state.csrs.write(csr.csr, value).ok_or_else(&illegal)? {
            CsrEffect::FlushTlb => state.mmu.flush_tlb(),
            CsrEffect::None => {}
        }
    }
    state.write_reg(csr.rd, old);
    state.pc_add(length);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::system::PAGE_SIZE;

    fn small_options() -> EmulatorOptions {
        EmulatorOptions {
            memory_size: ByteSize(64 * PAGE_SIZE as u64),
            stack_size: ByteSize(4 * PAGE_SIZE as u64),
            max_steps: Some(10_000),
            strict_align: false,
        }
    }

    fn state64() -> EmulatorState {
        EmulatorState::new(Xlen::Rv64, small_options())
    }

    fn state32() -> EmulatorState {
        EmulatorState::new(Xlen::Rv32, small_options())
    }

    /// Stamps 32-bit instruction words at `base` and points the PC there.
    fn stamp(state: &mut EmulatorState, base: u64, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            state
                .memory_mut()
                .write_u32(base + 4 * i as u64, *word)
                .unwrap();
        }
        state.pc_set(base);
    }

    #[test]
    fn x0_reads_zero_after_writes() {
        let mut state = state64();
        // addi x0, x0, 1
        stamp(&mut state, 0x1000, &[0x0010_0013]);
        state.step();
        assert_eq!(state.get_reg(0), 0);
        assert_eq!(state.pc(), 0x1004);
    }

    #[test]
    fn divide_edge_cases_on_rv64() {
        let mut state = state64();
        state.set_reg(11, 0x8000_0000);
        state.set_reg(12, 0xffff_ffff_ffff_ffff);
        // divw a0, a1, a2
        stamp(&mut state, 0x1000, &[0x02c5_c53b]);
        state.step();
        assert_eq!(state.get_reg(10), 0xffff_ffff_8000_0000);

        // remw a0, a1, a2
        stamp(&mut state, 0x2000, &[0x02c5_e53b]);
        state.step();
        assert_eq!(state.get_reg(10), 0);

        // div a0, a1, x0 (divide by zero).
        state.set_reg(11, 42);
        stamp(&mut state, 0x3000, &[0x0205_c533]);
        state.step();
        assert_eq!(state.get_reg(10), u64::MAX);
    }

    #[test]
    fn srl_is_full_width_on_rv64() {
        let mut state = state64();
        state.set_reg(11, 0xffff_ffff);
        state.set_reg(12, 4);
        // srl a0, a1, a2
        stamp(&mut state, 0x1000, &[0x00c5_d533]);
        state.step();
        assert_eq!(state.get_reg(10), 0x0fff_ffff);
    }

    #[test]
    fn rv32_keeps_registers_sign_extended() {
        let mut state = state32();
        state.set_reg(11, 0x7fff_ffff);
        state.set_reg(12, 1);
        // add a0, a1, a2 overflows into the sign bit.
        stamp(&mut state, 0x1000, &[0x00c5_8533]);
        state.step();
        assert_eq!(state.get_reg(10), 0xffff_ffff_8000_0000);
    }

    #[test]
    fn branch_self_loop_and_back_step() {
        let mut state = state64();
        // beq x0, x0, 0 self-loops.
        stamp(&mut state, 0x1000, &[0x0000_0063]);
        state.step();
        assert_eq!(state.pc(), 0x1000);

        // jal x0, -4 steps back exactly one slot.
        stamp(&mut state, 0x1004, &[0xffdf_f06f]);
        state.step();
        assert_eq!(state.pc(), 0x1000);
    }

    #[test]
    fn lr_sc_pair_succeeds_and_intervening_store_fails_sc() {
        let mut state = state64();
        state.set_reg(10, 0x2000);
        state.set_reg(7, 0x1234_5678);
        // lr.w t0, (a0); sc.w t1, t2, (a0)
        stamp(&mut state, 0x1000, &[0x1005_22af, 0x1875_232f]);
        state.step();
        state.step();
        assert_eq!(state.get_reg(6), 0, "sc must succeed");
        assert_eq!(state.memory().read_u32(0x2000).unwrap(), 0x1234_5678);

        // Same pair with a store wedged in between.
        state.set_reg(7, 0x9abc_def0);
        stamp(
            &mut state,
            0x3000,
            &[0x1005_22af, 0x00a5_2023, 0x1875_232f],
        );
        state.step();
        state.step();
        state.step();
        assert_ne!(state.get_reg(6), 0, "sc must fail");
    }

    #[test]
    fn amo_returns_old_value() {
        let mut state = state64();
        state.set_reg(12, 0x2000);
        state.set_reg(11, 5);
        state.memory_mut().write_u32(0x2000, 37).unwrap();
        // amoadd.w a0, a1, (a2)
        stamp(&mut state, 0x1000, &[0x00b6_252f]);
        state.step();
        assert_eq!(state.get_reg(10), 37);
        assert_eq!(state.memory().read_u32(0x2000).unwrap(), 42);
    }

    #[test]
    fn compressed_branch_taken() {
        let mut state = state64();
        state.memory_mut().write_u16(0x1000, 0xc401).unwrap(); // c.beqz s0, +8
        state.pc_set(0x1000);
        state.step();
        assert_eq!(state.pc(), 0x1008);
    }

    #[test]
    fn trap_and_mret_round_trip() {
        let mut state = state64();
        // Install a machine handler and take an ecall from U mode.
        state.csrs.write(CSR_MTVEC, 0x4000).unwrap();
        state.privilege = PrivilegeMode::User;
        stamp(&mut state, 0x1000, &[0x0000_0073]);
        state.step();
        assert_eq!(state.pc(), 0x4000);
        assert_eq!(state.privilege(), PrivilegeMode::Machine);
        assert_eq!(state.csr(CSR_MCAUSE).unwrap(), 8);
        assert_eq!(state.csr(CSR_MEPC).unwrap(), 0x1000);

        // mret resumes at mepc in user mode.
        stamp(&mut state, 0x4000, &[0x3020_0073]);
        state.step();
        assert_eq!(state.pc(), 0x1000);
        assert_eq!(state.privilege(), PrivilegeMode::User);
    }

    #[test]
    fn unhandled_trap_halts() {
        let mut state = state64();
        state.privilege = PrivilegeMode::User;
        stamp(&mut state, 0x1000, &[0x0000_0073]);
        state.step();
        assert!(state.halted());
    }

    #[test]
    fn csr_privilege_is_enforced() {
        let mut state = state64();
        state.privilege = PrivilegeMode::User;
        state.csrs.write(CSR_MTVEC, 0x4000).unwrap();
        // csrrw a0, satp, a1 from user mode traps.
        stamp(&mut state, 0x1000, &[0x1805_9573]);
        state.step();
        assert_eq!(state.pc(), 0x4000);
        assert_eq!(state.csr(CSR_MCAUSE).unwrap(), 2);
    }

    #[test]
    fn strict_alignment_traps_loads() {
        let mut options = small_options();
        options.strict_align = true;
        let mut state = EmulatorState::new(Xlen::Rv64, options);
        state.set_reg(11, 0x2001);
        // lw a0, 0(a1)
        stamp(&mut state, 0x1000, &[0x0005_a503]);
        state.step();
        // No handler installed, so the misaligned trap halts the hart.
        assert!(state.halted());
    }
}
