//! Rendering of instruction records for tracing and diagnostics.

use crate::decode::{AType, BType, CsrType, IType, Instruction, JType, RType, SType, ShiftType, UType};

/// ABI register names, indexed by register number.
pub const REGISTER_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

pub fn register_name(index: u8) -> &'static str {
    REGISTER_NAMES[index as usize & 0x1f]
}

pub const fn instruction_to_str(i: Instruction) -> &'static str {
    use Instruction::*;
    match i {
        Lui(_) => "lui",
        Auipc(_) => "auipc",
        Jal(_) => "jal",
        Jalr(_) => "jalr",
        Beq(_) => "beq",
        Bne(_) => "bne",
        Blt(_) => "blt",
        Bge(_) => "bge",
        Bltu(_) => "bltu",
        Bgeu(_) => "bgeu",
        Lb(_) => "lb",
        Lh(_) => "lh",
        Lw(_) => "lw",
        Lbu(_) => "lbu",
        Lhu(_) => "lhu",
        Lwu(_) => "lwu",
        Ld(_) => "ld",
        Sb(_) => "sb",
        Sh(_) => "sh",
        Sw(_) => "sw",
        Sd(_) => "sd",
        Addi(_) => "addi",
        Slti(_) => "slti",
        Sltiu(_) => "sltiu",
        Xori(_) => "xori",
        Ori(_) => "ori",
        Andi(_) => "andi",
        Slli(_) => "slli",
        Srli(_) => "srli",
        Srai(_) => "srai",
        Add(_) => "add",
        Sub(_) => "sub",
        Sll(_) => "sll",
        Slt(_) => "slt",
        Sltu(_) => "sltu",
        Xor(_) => "xor",
        Srl(_) => "srl",
        Sra(_) => "sra",
        Or(_) => "or",
        And(_) => "and",
        Addiw(_) => "addiw",
        Slliw(_) => "slliw",
        Srliw(_) => "srliw",
        Sraiw(_) => "sraiw",
        Addw(_) => "addw",
        Subw(_) => "subw",
        Sllw(_) => "sllw",
        Srlw(_) => "srlw",
        Sraw(_) => "sraw",
        Fence => "fence",
        FenceI => "fence.i",
        Ecall => "ecall",
        Ebreak => "ebreak",
        Mul(_) => "mul",
        Mulh(_) => "mulh",
        Mulhsu(_) => "mulhsu",
        Mulhu(_) => "mulhu",
        Div(_) => "div",
        Divu(_) => "divu",
        Rem(_) => "rem",
        Remu(_) => "remu",
        Mulw(_) => "mulw",
        Divw(_) => "divw",
        Divuw(_) => "divuw",
        Remw(_) => "remw",
        Remuw(_) => "remuw",
        LrW(_) => "lr.w",
        ScW(_) => "sc.w",
        AmoswapW(_) => "amoswap.w",
        AmoaddW(_) => "amoadd.w",
        AmoxorW(_) => "amoxor.w",
        AmoandW(_) => "amoand.w",
        AmoorW(_) => "amoor.w",
        AmominW(_) => "amomin.w",
        AmomaxW(_) => "amomax.w",
        AmominuW(_) => "amominu.w",
        AmomaxuW(_) => "amomaxu.w",
        LrD(_) => "lr.d",
        ScD(_) => "sc.d",
        AmoswapD(_) => "amoswap.d",
        AmoaddD(_) => "amoadd.d",
        AmoxorD(_) => "amoxor.d",
        AmoandD(_) => "amoand.d",
        AmoorD(_) => "amoor.d",
        AmominD(_) => "amomin.d",
        AmomaxD(_) => "amomax.d",
        AmominuD(_) => "amominu.d",
        AmomaxuD(_) => "amomaxu.d",
        Csrrw(_) => "csrrw",
        Csrrs(_) => "csrrs",
        Csrrc(_) => "csrrc",
        Csrrwi(_) => "csrrwi",
        Csrrsi(_) => "csrrsi",
        Csrrci(_) => "csrrci",
        Mret => "mret",
        Sret => "sret",
        Wfi => "wfi",
        SfenceVma(_) => "sfence.vma",
        Flw(_) => "flw",
        Fld(_) => "fld",
        Fsw(_) => "fsw",
        Fsd(_) => "fsd",
    }
}

fn fmt_rtype(mne: &str, r: RType) -> String {
    format!(
        "{} {}, {}, {}",
        mne,
        register_name(r.rd),
        register_name(r.rs1),
        register_name(r.rs2)
    )
}

fn fmt_itype(mne: &str, i: IType) -> String {
    format!(
        "{} {}, {}, {}",
        mne,
        register_name(i.rd),
        register_name(i.rs1),
        i.imm
    )
}

fn fmt_shift(mne: &str, s: ShiftType) -> String {
    format!(
        "{} {}, {}, {}",
        mne,
        register_name(s.rd),
        register_name(s.rs1),
        s.shamt
    )
}

fn fmt_load(mne: &str, i: IType) -> String {
    format!(
        "{} {}, {}({})",
        mne,
        register_name(i.rd),
        i.imm,
        register_name(i.rs1)
    )
}

fn fmt_store(mne: &str, s: SType) -> String {
    format!(
        "{} {}, {}({})",
        mne,
        register_name(s.rs2),
        s.imm,
        register_name(s.rs1)
    )
}

fn fmt_btype(mne: &str, b: BType) -> String {
    format!(
        "{} {}, {}, {}",
        mne,
        register_name(b.rs1),
        register_name(b.rs2),
        b.imm
    )
}

fn fmt_utype(mne: &str, u: UType) -> String {
    format!(
        "{} {}, {:#x}",
        mne,
        register_name(u.rd),
        (u.imm as u64 >> 12) & 0xf_ffff
    )
}

fn fmt_jtype(mne: &str, j: JType) -> String {
    format!("{} {}, {}", mne, register_name(j.rd), j.imm)
}

fn fmt_amo(mne: &str, a: AType) -> String {
    format!(
        "{} {}, {}, ({})",
        mne,
        register_name(a.rd),
        register_name(a.rs2),
        register_name(a.rs1)
    )
}

fn fmt_csr(mne: &str, c: CsrType, immediate: bool) -> String {
    if immediate {
        format!("{} {}, {:#x}, {}", mne, register_name(c.rd), c.csr, c.rs1)
    } else {
        format!(
            "{} {}, {:#x}, {}",
            mne,
            register_name(c.rd),
            c.csr,
            register_name(c.rs1)
        )
    }
}

/// Conventional assembler rendering of an instruction record.
pub fn disassemble(instruction: Instruction) -> String {
    use Instruction::*;
    let mne = instruction_to_str(instruction);
    match instruction {
        Lui(u) | Auipc(u) => fmt_utype(mne, u),
        Jal(j) => fmt_jtype(mne, j),
        Jalr(i) => fmt_load(mne, i),
        Beq(b) | Bne(b) | Blt(b) | Bge(b) | Bltu(b) | Bgeu(b) => fmt_btype(mne, b),
        Lb(i) | Lh(i) | Lw(i) | Lbu(i) | Lhu(i) | Lwu(i) | Ld(i) | Flw(i) | Fld(i) => {
            fmt_load(mne, i)
        }
        Sb(s) | Sh(s) | Sw(s) | Sd(s) | Fsw(s) | Fsd(s) => fmt_store(mne, s),
        Addi(i) | Slti(i) | Sltiu(i) | Xori(i) | Ori(i) | Andi(i) | Addiw(i) => fmt_itype(mne, i),
        Slli(s) | Srli(s) | Srai(s) | Slliw(s) | Srliw(s) | Sraiw(s) => fmt_shift(mne, s),
        Add(r) | Sub(r) | Sll(r) | Slt(r) | Sltu(r) | Xor(r) | Srl(r) | Sra(r) | Or(r) | And(r)
        | Addw(r) | Subw(r) | Sllw(r) | Srlw(r) | Sraw(r) | Mul(r) | Mulh(r) | Mulhsu(r)
        | Mulhu(r) | Div(r) | Divu(r) | Rem(r) | Remu(r) | Mulw(r) | Divw(r) | Divuw(r)
        | Remw(r) | Remuw(r) => fmt_rtype(mne, r),
        LrW(a) | LrD(a) => format!("{} {}, ({})", mne, register_name(a.rd), register_name(a.rs1)),
        ScW(a) | ScD(a) | AmoswapW(a) | AmoaddW(a) | AmoxorW(a) | AmoandW(a) | AmoorW(a)
        | AmominW(a) | AmomaxW(a) | AmominuW(a) | AmomaxuW(a) | AmoswapD(a) | AmoaddD(a)
        | AmoxorD(a) | AmoandD(a) | AmoorD(a) | AmominD(a) | AmomaxD(a) | AmominuD(a)
        | AmomaxuD(a) => fmt_amo(mne, a),
        Csrrw(c) | Csrrs(c) | Csrrc(c) => fmt_csr(mne, c, false),
        Csrrwi(c) | Csrrsi(c) | Csrrci(c) => fmt_csr(mne, c, true),
        SfenceVma(r) => format!(
            "{} {}, {}",
            mne,
            register_name(r.rs1),
            register_name(r.rs2)
        ),
        Fence | FenceI | Ecall | Ebreak | Mret | Sret | Wfi => mne.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode32, decode16};
    use crate::engine::system::Xlen;

    #[test]
    fn renders_conventional_assembler() {
        let addi = decode32(0x0031_0093, Xlen::Rv64).unwrap();
        assert_eq!(disassemble(addi), "addi ra, sp, 3");

        let lw = decode32(0x0041_2503, Xlen::Rv64).unwrap();
        assert_eq!(disassemble(lw), "lw a0, 4(sp)");

        let lui = decode32(0x1234_5537, Xlen::Rv64).unwrap();
        assert_eq!(disassemble(lui), "lui a0, 0x12345");

        let cli = decode16(0x4505, Xlen::Rv64).unwrap();
        assert_eq!(disassemble(cli), "addi a0, zero, 1");
    }
}
