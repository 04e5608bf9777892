use log::trace;

use super::csr::{CsrFile, CSR_MSTATUS, CSR_SATP, MSTATUS_MPP, MSTATUS_MPRV, MSTATUS_MXR, MSTATUS_SUM};
use super::memory::Memory;
use super::system::{AccessType, Exception, PrivilegeMode, Xlen};

/// Entries kept per access intent before LRU eviction kicks in.
const TLB_ENTRIES: usize = 64;

const PTE_V: u64 = 1 << 0;
const PTE_R: u64 = 1 << 1;
const PTE_W: u64 = 1 << 2;
const PTE_X: u64 = 1 << 3;
const PTE_U: u64 = 1 << 4;
const PTE_G: u64 = 1 << 5;
const PTE_A: u64 = 1 << 6;
const PTE_D: u64 = 1 << 7;

/// Width-parametric page-table entry. Sv32 entries are 4 bytes with a
/// 22-bit PPN; Sv39 entries are 8 bytes with a 44-bit PPN. The permission
/// and status bits sit in the same positions for both.
#[derive(Clone, Copy, Debug)]
pub struct Pte {
    raw: u64,
}

impl Pte {
    pub fn new(raw: u64) -> Pte {
        Pte { raw }
    }

    pub fn raw(self) -> u64 {
        self.raw
    }

    pub fn v(self) -> bool {
        self.raw & PTE_V != 0
    }
    pub fn r(self) -> bool {
        self.raw & PTE_R != 0
    }
    pub fn w(self) -> bool {
        self.raw & PTE_W != 0
    }
    pub fn x(self) -> bool {
        self.raw & PTE_X != 0
    }
    pub fn u(self) -> bool {
        self.raw & PTE_U != 0
    }
    pub fn g(self) -> bool {
        self.raw & PTE_G != 0
    }
    pub fn a(self) -> bool {
        self.raw & PTE_A != 0
    }
    pub fn d(self) -> bool {
        self.raw & PTE_D != 0
    }

    pub fn rsw(self) -> u64 {
        (self.raw >> 8) & 0x3
    }

    pub fn ppn(self, xlen: Xlen) -> u64 {
        match xlen {
            Xlen::Rv32 => (self.raw >> 10) & 0x3f_ffff,
            Xlen::Rv64 => (self.raw >> 10) & 0xfff_ffff_ffff,
        }
    }

    /// A leaf grants at least one of read, write, execute.
    pub fn is_leaf(self) -> bool {
        self.raw & (PTE_R | PTE_W | PTE_X) != 0
    }

    /// Valid means the V bit is set and the reserved write-without-read
    /// encoding is not used.
    pub fn is_valid(self) -> bool {
        self.v() && !(self.w() && !self.r())
    }

    pub fn set_a(&mut self) {
        self.raw |= PTE_A;
    }

    pub fn set_d(&mut self) {
        self.raw |= PTE_D;
    }
}

#[derive(Clone, Copy, Debug)]
struct TlbEntry {
    vpn: u64,
    asid: u16,
    ppn: u64,
    perms: u64,
    stamp: u64,
}

impl TlbEntry {
    fn global(&self) -> bool {
        self.perms & PTE_G != 0
    }
}

/// Bounded translation cache, one LRU set per access intent. Keeping the
/// sets separate means a store never hits an entry whose walk did not set
/// the D bit.
struct Tlb {
    sets: [Vec<TlbEntry>; 3],
}

impl Tlb {
    fn new() -> Tlb {
        Tlb {
            sets: [
                Vec::with_capacity(TLB_ENTRIES),
                Vec::with_capacity(TLB_ENTRIES),
                Vec::with_capacity(TLB_ENTRIES),
            ],
        }
    }

    fn set_index(access: AccessType) -> usize {
        match access {
            AccessType::Fetch => 0,
            AccessType::Load => 1,
            AccessType::Store => 2,
        }
    }

    fn lookup(&mut self, access: AccessType, vpn: u64, asid: u16, stamp: u64) -> Option<TlbEntry> {
        let set = &mut self.sets[Self::set_index(access)];
        let entry = set
            .iter_mut()
            .find(|entry| entry.vpn == vpn && (entry.asid == asid || entry.global()))?;
        entry.stamp = stamp;
        Some(*entry)
    }

    fn insert(&mut self, access: AccessType, entry: TlbEntry) {
        let set = &mut self.sets[Self::set_index(access)];
        if let Some(existing) = set
            .iter_mut()
            .find(|e| e.vpn == entry.vpn && e.asid == entry.asid)
        {
            *existing = entry;
            return;
        }
        if set.len() < TLB_ENTRIES {
            set.push(entry);
            return;
        }
        let victim = set
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.stamp)
            .map(|(i, _)| i)
            .expect("set is non-empty");
        set[victim] = entry;
    }

    fn flush_all(&mut self) {
        for set in &mut self.sets {
            set.clear();
        }
    }

    fn flush(&mut self, vpn: Option<u64>, asid: Option<u16>) {
        for set in &mut self.sets {
            set.retain(|entry| {
                if let Some(vpn) = vpn {
                    if entry.vpn != vpn {
                        return true;
                    }
                }
                if let Some(asid) = asid {
                    if entry.asid != asid && !entry.global() {
                        return true;
                    }
                    // Global entries survive ASID-selective fences.
                    if entry.global() && vpn.is_none() {
                        return true;
                    }
                }
                false
            });
        }
    }
}

/// Memory-management unit: translates virtual addresses against the page
/// table rooted in `satp`, caching successful translations.
pub struct Mmu {
    tlb: Tlb,
    clock: u64,
}

struct WalkShape {
    levels: usize,
    pte_size: u64,
    vpn_bits: u32,
}

impl Mmu {
    pub fn new() -> Mmu {
        Mmu {
            tlb: Tlb::new(),
            clock: 0,
        }
    }

    /// Drops every cached translation. Required after `satp` writes.
    pub fn flush_tlb(&mut self) {
        self.tlb.flush_all();
    }

    /// Selective flush for `sfence.vma`: by page, by ASID, or wholesale.
    pub fn sfence(&mut self, vaddr: Option<u64>, asid: Option<u16>) {
        if vaddr.is_none() && asid.is_none() {
            self.tlb.flush_all();
        } else {
            self.tlb.flush(vaddr.map(|va| va >> 12), asid);
        }
    }

    /// Translates `va` for the given intent, or raises the matching page
    /// fault. Identity translation applies in effective machine mode and
    /// whenever `satp` selects Bare.
    pub fn translate(
        &mut self,
        memory: &mut Memory,
        csrs: &CsrFile,
        privilege: PrivilegeMode,
        xlen: Xlen,
        va: u64,
        access: AccessType,
    ) -> Result<u64, Exception> {
        let mstatus = csrs.get(CSR_MSTATUS);
        let effective = self.effective_privilege(mstatus, privilege, access);
        if effective == PrivilegeMode::Machine {
            return Ok(va);
        }

        let satp = csrs.get(CSR_SATP);
        let (mode, asid, root_ppn) = match xlen {
            Xlen::Rv32 => (satp >> 31, ((satp >> 22) & 0x1ff) as u16, satp & 0x3f_ffff),
            Xlen::Rv64 => (satp >> 60, ((satp >> 44) & 0xffff) as u16, satp & 0xfff_ffff_ffff),
        };
        if mode == 0 {
            return Ok(va);
        }

        let va = match xlen {
            Xlen::Rv32 => va & 0xffff_ffff,
            Xlen::Rv64 => va,
        };
        let vpn = va >> 12;
        let offset = va & 0xfff;
        let sum = mstatus & MSTATUS_SUM != 0;
        let mxr = mstatus & MSTATUS_MXR != 0;

        self.clock += 1;
        if let Some(entry) = self.tlb.lookup(access, vpn, asid, self.clock) {
            if Self::leaf_allows(entry.perms, effective, sum, mxr, access) {
                return Ok((entry.ppn << 12) | offset);
            }
            // Permission context changed since the fill; retranslate.
        }

        let pa = self.walk(memory, xlen, va, root_ppn, asid, effective, sum, mxr, access)?;
        Ok(pa)
    }

    fn effective_privilege(
        &self,
        mstatus: u64,
        privilege: PrivilegeMode,
        access: AccessType,
    ) -> PrivilegeMode {
        if access != AccessType::Fetch && mstatus & MSTATUS_MPRV != 0 {
            return PrivilegeMode::decode((mstatus & MSTATUS_MPP) >> 11);
        }
        privilege
    }

    fn leaf_allows(
        perms: u64,
        effective: PrivilegeMode,
        sum: bool,
        mxr: bool,
        access: AccessType,
    ) -> bool {
        let user_page = perms & PTE_U != 0;
        match effective {
            PrivilegeMode::User => {
                if !user_page {
                    return false;
                }
            }
            PrivilegeMode::Supervisor => {
                // S may touch U pages only with SUM, and never execute them.
                if user_page && (access == AccessType::Fetch || !sum) {
                    return false;
                }
            }
            PrivilegeMode::Machine => return true,
        }
        match access {
            AccessType::Fetch => perms & PTE_X != 0,
            AccessType::Load => perms & PTE_R != 0 || (mxr && perms & PTE_X != 0),
            AccessType::Store => perms & PTE_W != 0,
        }
    }

    fn shape(xlen: Xlen) -> WalkShape {
        match xlen {
            Xlen::Rv32 => WalkShape {
                levels: 2,
                pte_size: 4,
                vpn_bits: 10,
            },
            Xlen::Rv64 => WalkShape {
                levels: 3,
                pte_size: 8,
                vpn_bits: 9,
            },
        }
    }

    fn read_pte(memory: &Memory, xlen: Xlen, addr: u64) -> Option<Pte> {
        let raw = match xlen {
            Xlen::Rv32 => memory.read_u32(addr).ok()? as u64,
            Xlen::Rv64 => memory.read_u64(addr).ok()?,
        };
        Some(Pte::new(raw))
    }

    fn write_pte(memory: &mut Memory, xlen: Xlen, addr: u64, pte: Pte) {
        let _ = match xlen {
            Xlen::Rv32 => memory.write_u32(addr, pte.raw() as u32),
            Xlen::Rv64 => memory.write_u64(addr, pte.raw()),
        };
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &mut self,
        memory: &mut Memory,
        xlen: Xlen,
        va: u64,
        root_ppn: u64,
        asid: u16,
        effective: PrivilegeMode,
        sum: bool,
        mxr: bool,
        access: AccessType,
    ) -> Result<u64, Exception> {
        let fault = || Exception::page_fault(access, va);
        let shape = Self::shape(xlen);
        let vpn_mask = (1u64 << shape.vpn_bits) - 1;

        if xlen == Xlen::Rv64 {
            // Sv39 requires bits 63:39 to replicate bit 38.
            let sign = (va >> 38) & 1;
            let upper = va >> 39;
            if (sign == 0 && upper != 0) || (sign == 1 && upper != (1 << 25) - 1) {
                return Err(fault());
            }
        }

        let vpn_at = |level: usize| (va >> (12 + shape.vpn_bits * level as u32)) & vpn_mask;

        let mut table = root_ppn << 12;
        for level in (0..shape.levels).rev() {
            let pte_addr = table + vpn_at(level) * shape.pte_size;
            let mut pte = Self::read_pte(memory, xlen, pte_addr).ok_or_else(&fault)?;
            trace!(
                "walk va={:#x} level={} pte@{:#x}={:#x}",
                va,
                level,
                pte_addr,
                pte.raw()
            );
            if !pte.is_valid() {
                return Err(fault());
            }
            if !pte.is_leaf() {
                table = pte.ppn(xlen) << 12;
                continue;
            }

            let perms = pte.raw() & (PTE_R | PTE_W | PTE_X | PTE_U | PTE_G);
            if !Self::leaf_allows(perms, effective, sum, mxr, access) {
                return Err(fault());
            }

            // Superpage PPNs must be aligned to the level they map.
            let low_ppn_bits = shape.vpn_bits * level as u32;
            let ppn = pte.ppn(xlen);
            if level > 0 && ppn & ((1 << low_ppn_bits) - 1) != 0 {
                return Err(fault());
            }

            // A/D update happens in hardware; clear A or D never faults.
            let before = pte.raw();
            pte.set_a();
            if access == AccessType::Store {
                pte.set_d();
            }
            if pte.raw() != before {
                Self::write_pte(memory, xlen, pte_addr, pte);
            }

            // Superpages translate the untranslated VPN parts through.
            let mut leaf_ppn = ppn;
            for l in 0..level {
                leaf_ppn |= vpn_at(l) << (shape.vpn_bits * l as u32);
            }

            self.tlb.insert(
                access,
                TlbEntry {
                    vpn: va >> 12,
                    asid,
                    ppn: leaf_ppn,
                    perms,
                    stamp: self.clock,
                },
            );
            return Ok((leaf_ppn << 12) | (va & 0xfff));
        }

        Err(fault())
    }
}
