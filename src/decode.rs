//! Pure instruction decoder for the RV32/RV64 IMAC encodings.
//!
//! `decode` turns one or two fetched half-words into a typed
//! [`Instruction`] record plus its encoded length. Compressed encodings are
//! expanded to their base-ISA equivalent at decode time, so execution sees a
//! single instruction vocabulary. The decoder never touches memory or
//! registers.

use thiserror::Error;

use crate::engine::system::Xlen;

pub const INSTRUCTION_SIZE: u64 = 4;
pub const COMPRESSED_SIZE: u64 = 2;

#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum DecodingError {
    #[error("illegal instruction encoding {0:#010x}")]
    Illegal(u32),
    #[error("reserved compressed encoding {0:#06x}")]
    Reserved(u16),
    #[error("32-bit encoding but only one half-word supplied")]
    Truncated,
}

//
// Operand shapes. Immediates are sign-extended to 64 bits at decode time;
// on RV32 the low 32 bits carry the architectural value.
//

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RType {
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IType {
    pub rd: u8,
    pub rs1: u8,
    pub imm: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShiftType {
    pub rd: u8,
    pub rs1: u8,
    pub shamt: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SType {
    pub rs1: u8,
    pub rs2: u8,
    pub imm: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BType {
    pub rs1: u8,
    pub rs2: u8,
    pub imm: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UType {
    pub rd: u8,
    /// Already shifted into bits 31:12 and sign-extended.
    pub imm: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JType {
    pub rd: u8,
    pub imm: i64,
}

/// CSR instructions; `rs1` doubles as the zero-extended immediate of the
/// `*i` forms.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CsrType {
    pub rd: u8,
    pub rs1: u8,
    pub csr: u16,
}

/// Atomic-memory operands with their ordering flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AType {
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub aq: bool,
    pub rl: bool,
}

/// One semantic operation. Every reachable encoding, compressed or not,
/// maps to exactly one variant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Instruction {
    // RV32I / RV64I
    Lui(UType),
    Auipc(UType),
    Jal(JType),
    Jalr(IType),
    Beq(BType),
    Bne(BType),
    Blt(BType),
    Bge(BType),
    Bltu(BType),
    Bgeu(BType),
    Lb(IType),
    Lh(IType),
    Lw(IType),
    Lbu(IType),
    Lhu(IType),
    Lwu(IType),
    Ld(IType),
    Sb(SType),
    Sh(SType),
    Sw(SType),
    Sd(SType),
    Addi(IType),
    Slti(IType),
    Sltiu(IType),
    Xori(IType),
    Ori(IType),
    Andi(IType),
    Slli(ShiftType),
    Srli(ShiftType),
    Srai(ShiftType),
    Add(RType),
    Sub(RType),
    Sll(RType),
    Slt(RType),
    Sltu(RType),
    Xor(RType),
    Srl(RType),
    Sra(RType),
    Or(RType),
    And(RType),
    Addiw(IType),
    Slliw(ShiftType),
    Srliw(ShiftType),
    Sraiw(ShiftType),
    Addw(RType),
    Subw(RType),
    Sllw(RType),
    Srlw(RType),
    Sraw(RType),
    Fence,
    FenceI,
    Ecall,
    Ebreak,
    // M
    Mul(RType),
    Mulh(RType),
    Mulhsu(RType),
    Mulhu(RType),
    Div(RType),
    Divu(RType),
    Rem(RType),
    Remu(RType),
    Mulw(RType),
    Divw(RType),
    Divuw(RType),
    Remw(RType),
    Remuw(RType),
    // A
    LrW(AType),
    ScW(AType),
    AmoswapW(AType),
    AmoaddW(AType),
    AmoxorW(AType),
    AmoandW(AType),
    AmoorW(AType),
    AmominW(AType),
    AmomaxW(AType),
    AmominuW(AType),
    AmomaxuW(AType),
    LrD(AType),
    ScD(AType),
    AmoswapD(AType),
    AmoaddD(AType),
    AmoxorD(AType),
    AmoandD(AType),
    AmoorD(AType),
    AmominD(AType),
    AmomaxD(AType),
    AmominuD(AType),
    AmomaxuD(AType),
    // Zicsr and privileged
    Csrrw(CsrType),
    Csrrs(CsrType),
    Csrrc(CsrType),
    Csrrwi(CsrType),
    Csrrsi(CsrType),
    Csrrci(CsrType),
    Mret,
    Sret,
    Wfi,
    SfenceVma(RType),
    // F/D load/store forms, executed as raw bit moves.
    Flw(IType),
    Fld(IType),
    Fsw(SType),
    Fsd(SType),
}

//
// Field extraction for the 32-bit base encoding.
//

#[inline]
pub(crate) fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

#[inline]
fn rd(word: u32) -> u8 {
    ((word >> 7) & 0x1f) as u8
}

#[inline]
fn rs1(word: u32) -> u8 {
    ((word >> 15) & 0x1f) as u8
}

#[inline]
fn rs2(word: u32) -> u8 {
    ((word >> 20) & 0x1f) as u8
}

#[inline]
fn funct3(word: u32) -> u32 {
    (word >> 12) & 0x7
}

#[inline]
fn funct7(word: u32) -> u32 {
    (word >> 25) & 0x7f
}

#[inline]
fn imm_i(word: u32) -> i64 {
    sign_extend((word >> 20) as u64, 12)
}

#[inline]
fn imm_s(word: u32) -> i64 {
    let imm = ((word >> 25) << 5) | ((word >> 7) & 0x1f);
    sign_extend(imm as u64, 12)
}

#[inline]
fn imm_b(word: u32) -> i64 {
    let bit12 = (word >> 31) & 0x1;
    let bit11 = (word >> 7) & 0x1;
    let bits10_5 = (word >> 25) & 0x3f;
    let bits4_1 = (word >> 8) & 0x0f;
    let imm = (bit12 << 12) | (bit11 << 11) | (bits10_5 << 5) | (bits4_1 << 1);
    sign_extend(imm as u64, 13)
}

#[inline]
fn imm_u(word: u32) -> i64 {
    sign_extend((word & 0xffff_f000) as u64, 32)
}

#[inline]
fn imm_j(word: u32) -> i64 {
    let bit20 = (word >> 31) & 0x1;
    let bits19_12 = (word >> 12) & 0xff;
    let bit11 = (word >> 20) & 0x1;
    let bits10_1 = (word >> 21) & 0x3ff;
    let imm = (bit20 << 20) | (bits19_12 << 12) | (bit11 << 11) | (bits10_1 << 1);
    sign_extend(imm as u64, 21)
}

fn itype(word: u32) -> IType {
    IType {
        rd: rd(word),
        rs1: rs1(word),
        imm: imm_i(word),
    }
}

fn stype(word: u32) -> SType {
    SType {
        rs1: rs1(word),
        rs2: rs2(word),
        imm: imm_s(word),
    }
}

fn btype(word: u32) -> BType {
    BType {
        rs1: rs1(word),
        rs2: rs2(word),
        imm: imm_b(word),
    }
}

fn rtype(word: u32) -> RType {
    RType {
        rd: rd(word),
        rs1: rs1(word),
        rs2: rs2(word),
    }
}

/// Decodes one fetched parcel. `half0` is the half-word at the PC; `half1`
/// is the following half-word, needed only when the low two bits of
/// `half0` are `11` (a 32-bit encoding). Returns the instruction together
/// with its encoded length in bytes.
pub fn decode(
    half0: u16,
    half1: Option<u16>,
    xlen: Xlen,
) -> Result<(Instruction, u64), DecodingError> {
    if half0 & 0x3 == 0x3 {
        let half1 = half1.ok_or(DecodingError::Truncated)?;
        let word = (half1 as u32) << 16 | half0 as u32;
        Ok((decode32(word, xlen)?, INSTRUCTION_SIZE))
    } else {
        Ok((decode16(half0, xlen)?, COMPRESSED_SIZE))
    }
}

/// Decodes a 32-bit base-encoding word.
pub fn decode32(word: u32, xlen: Xlen) -> Result<Instruction, DecodingError> {
    use Instruction::*;

    let illegal = Err(DecodingError::Illegal(word));
    let rv64 = xlen == Xlen::Rv64;

    let instruction = match word & 0x7f {
        0x37 => Lui(UType {
            rd: rd(word),
            imm: imm_u(word),
        }),
        0x17 => Auipc(UType {
            rd: rd(word),
            imm: imm_u(word),
        }),
        0x6f => Jal(JType {
            rd: rd(word),
            imm: imm_j(word),
        }),
        0x67 => match funct3(word) {
            0 => Jalr(itype(word)),
            _ => return illegal,
        },
        0x63 => match funct3(word) {
            0 => Beq(btype(word)),
            1 => Bne(btype(word)),
            4 => Blt(btype(word)),
            5 => Bge(btype(word)),
            6 => Bltu(btype(word)),
            7 => Bgeu(btype(word)),
            _ => return illegal,
        },
        0x03 => match funct3(word) {
            0 => Lb(itype(word)),
            1 => Lh(itype(word)),
            2 => Lw(itype(word)),
            3 if rv64 => Ld(itype(word)),
            4 => Lbu(itype(word)),
            5 => Lhu(itype(word)),
            6 if rv64 => Lwu(itype(word)),
            _ => return illegal,
        },
        0x07 => match funct3(word) {
            2 => Flw(itype(word)),
            3 => Fld(itype(word)),
            _ => return illegal,
        },
        0x23 => match funct3(word) {
            0 => Sb(stype(word)),
            1 => Sh(stype(word)),
            2 => Sw(stype(word)),
            3 if rv64 => Sd(stype(word)),
            _ => return illegal,
        },
        0x27 => match funct3(word) {
            2 => Fsw(stype(word)),
            3 => Fsd(stype(word)),
            _ => return illegal,
        },
        0x13 => {
            let imm12 = (word >> 20) & 0xfff;
            let (shamt_mask, funct_shift) = if rv64 { (0x3f, 6) } else { (0x1f, 5) };
            let shift = ShiftType {
                rd: rd(word),
                rs1: rs1(word),
                shamt: imm12 & shamt_mask,
            };
            let funct = imm12 >> funct_shift;
            let srai_funct = 0x400 >> funct_shift;
            match funct3(word) {
                0 => Addi(itype(word)),
                1 if funct == 0 => Slli(shift),
                2 => Slti(itype(word)),
                3 => Sltiu(itype(word)),
                4 => Xori(itype(word)),
                5 if funct == 0 => Srli(shift),
                5 if funct == srai_funct => Srai(shift),
                6 => Ori(itype(word)),
                7 => Andi(itype(word)),
                _ => return illegal,
            }
        }
        0x33 => match (funct7(word), funct3(word)) {
            (0x00, 0) => Add(rtype(word)),
            (0x20, 0) => Sub(rtype(word)),
            (0x00, 1) => Sll(rtype(word)),
            (0x00, 2) => Slt(rtype(word)),
            (0x00, 3) => Sltu(rtype(word)),
            (0x00, 4) => Xor(rtype(word)),
            (0x00, 5) => Srl(rtype(word)),
            (0x20, 5) => Sra(rtype(word)),
            (0x00, 6) => Or(rtype(word)),
            (0x00, 7) => And(rtype(word)),
            (0x01, 0) => Mul(rtype(word)),
            (0x01, 1) => Mulh(rtype(word)),
            (0x01, 2) => Mulhsu(rtype(word)),
            (0x01, 3) => Mulhu(rtype(word)),
            (0x01, 4) => Div(rtype(word)),
            (0x01, 5) => Divu(rtype(word)),
            (0x01, 6) => Rem(rtype(word)),
            (0x01, 7) => Remu(rtype(word)),
            _ => return illegal,
        },
        0x1b if rv64 => {
            let shift = ShiftType {
                rd: rd(word),
                rs1: rs1(word),
                shamt: (word >> 20) & 0x1f,
            };
            match (funct7(word), funct3(word)) {
                (_, 0) => Addiw(itype(word)),
                (0x00, 1) => Slliw(shift),
                (0x00, 5) => Srliw(shift),
                (0x20, 5) => Sraiw(shift),
                _ => return illegal,
            }
        }
        0x3b if rv64 => match (funct7(word), funct3(word)) {
            (0x00, 0) => Addw(rtype(word)),
            (0x20, 0) => Subw(rtype(word)),
            (0x00, 1) => Sllw(rtype(word)),
            (0x00, 5) => Srlw(rtype(word)),
            (0x20, 5) => Sraw(rtype(word)),
            (0x01, 0) => Mulw(rtype(word)),
            (0x01, 4) => Divw(rtype(word)),
            (0x01, 5) => Divuw(rtype(word)),
            (0x01, 6) => Remw(rtype(word)),
            (0x01, 7) => Remuw(rtype(word)),
            _ => return illegal,
        },
        0x0f => match funct3(word) {
            0 => Fence,
            1 => FenceI,
            _ => return illegal,
        },
        0x73 => {
            let csr = CsrType {
                rd: rd(word),
                rs1: rs1(word),
                csr: ((word >> 20) & 0xfff) as u16,
            };
            match funct3(word) {
                0 => {
                    if funct7(word) == 0x09 {
                        SfenceVma(rtype(word))
                    } else if rd(word) != 0 || rs1(word) != 0 {
                        return illegal;
                    } else {
                        match (word >> 20) & 0xfff {
                            0x000 => Ecall,
                            0x001 => Ebreak,
                            0x102 => Sret,
                            0x302 => Mret,
                            0x105 => Wfi,
                            _ => return illegal,
                        }
                    }
                }
                1 => Csrrw(csr),
                2 => Csrrs(csr),
                3 => Csrrc(csr),
                5 => Csrrwi(csr),
                6 => Csrrsi(csr),
                7 => Csrrci(csr),
                _ => return illegal,
            }
        }
        0x2f => {
            let a = AType {
                rd: rd(word),
                rs1: rs1(word),
                rs2: rs2(word),
                aq: word & (1 << 26) != 0,
                rl: word & (1 << 25) != 0,
            };
            let funct5 = word >> 27;
            let wide = match funct3(word) {
                2 => false,
                3 if rv64 => true,
                _ => return illegal,
            };
            match (funct5, wide) {
                (0x02, false) if a.rs2 == 0 => LrW(a),
                (0x03, false) => ScW(a),
                (0x01, false) => AmoswapW(a),
                (0x00, false) => AmoaddW(a),
                (0x04, false) => AmoxorW(a),
                (0x0c, false) => AmoandW(a),
                (0x08, false) => AmoorW(a),
                (0x10, false) => AmominW(a),
                (0x14, false) => AmomaxW(a),
                (0x18, false) => AmominuW(a),
                (0x1c, false) => AmomaxuW(a),
                (0x02, true) if a.rs2 == 0 => LrD(a),
                (0x03, true) => ScD(a),
                (0x01, true) => AmoswapD(a),
                (0x00, true) => AmoaddD(a),
                (0x04, true) => AmoxorD(a),
                (0x0c, true) => AmoandD(a),
                (0x08, true) => AmoorD(a),
                (0x10, true) => AmominD(a),
                (0x14, true) => AmomaxD(a),
                (0x18, true) => AmominuD(a),
                (0x1c, true) => AmomaxuD(a),
                _ => return illegal,
            }
        }
        _ => return illegal,
    };

    Ok(instruction)
}

//
// Compressed (16-bit) encoding. Register fields in the three-bit "popular"
// form map to x8..x15.
//

#[inline]
fn c_rd(half: u16) -> u8 {
    ((half >> 7) & 0x1f) as u8
}

#[inline]
fn c_rs2(half: u16) -> u8 {
    ((half >> 2) & 0x1f) as u8
}

#[inline]
fn c_rd_prime(half: u16) -> u8 {
    (((half >> 2) & 0x7) + 8) as u8
}

#[inline]
fn c_rs1_prime(half: u16) -> u8 {
    (((half >> 7) & 0x7) + 8) as u8
}

/// CI-format immediate: imm[5] at bit 12, imm[4:0] at bits 6:2.
#[inline]
fn c_imm_ci(half: u16) -> i64 {
    let imm = ((half >> 12) & 0x1) << 5 | ((half >> 2) & 0x1f);
    sign_extend(imm as u64, 6)
}

/// CIW-format zero-extended immediate of `c.addi4spn`.
#[inline]
fn c_imm_addi4spn(half: u16) -> i64 {
    let h = half as u64;
    (((h >> 12) & 0x1) << 5
        | ((h >> 11) & 0x1) << 4
        | ((h >> 10) & 0x1) << 9
        | ((h >> 9) & 0x1) << 8
        | ((h >> 8) & 0x1) << 7
        | ((h >> 7) & 0x1) << 6
        | ((h >> 6) & 0x1) << 2
        | ((h >> 5) & 0x1) << 3) as i64
}

/// CL/CS-format word offset.
#[inline]
fn c_imm_mem_w(half: u16) -> i64 {
    let h = half as u64;
    (((h >> 10) & 0x7) << 3 | ((h >> 6) & 0x1) << 2 | ((h >> 5) & 0x1) << 6) as i64
}

/// CL/CS-format doubleword offset.
#[inline]
fn c_imm_mem_d(half: u16) -> i64 {
    let h = half as u64;
    (((h >> 10) & 0x7) << 3 | ((h >> 5) & 0x1) << 6 | ((h >> 6) & 0x1) << 7) as i64
}

#[inline]
fn c_imm_addi16sp(half: u16) -> i64 {
    let h = half as u64;
    let imm = ((h >> 12) & 0x1) << 9
        | ((h >> 6) & 0x1) << 4
        | ((h >> 5) & 0x1) << 6
        | ((h >> 4) & 0x1) << 8
        | ((h >> 3) & 0x1) << 7
        | ((h >> 2) & 0x1) << 5;
    sign_extend(imm, 10)
}

#[inline]
fn c_imm_j(half: u16) -> i64 {
    let h = half as u64;
    let imm = ((h >> 12) & 0x1) << 11
        | ((h >> 11) & 0x1) << 4
        | ((h >> 10) & 0x1) << 9
        | ((h >> 9) & 0x1) << 8
        | ((h >> 8) & 0x1) << 10
        | ((h >> 7) & 0x1) << 6
        | ((h >> 6) & 0x1) << 7
        | ((h >> 5) & 0x1) << 3
        | ((h >> 4) & 0x1) << 2
        | ((h >> 3) & 0x1) << 1
        | ((h >> 2) & 0x1) << 5;
    sign_extend(imm, 12)
}

#[inline]
fn c_imm_branch(half: u16) -> i64 {
    let h = half as u64;
    let imm = ((h >> 12) & 0x1) << 8
        | ((h >> 11) & 0x1) << 4
        | ((h >> 10) & 0x1) << 3
        | ((h >> 6) & 0x1) << 7
        | ((h >> 5) & 0x1) << 6
        | ((h >> 4) & 0x1) << 2
        | ((h >> 3) & 0x1) << 1
        | ((h >> 2) & 0x1) << 5;
    sign_extend(imm, 9)
}

#[inline]
fn c_imm_lwsp(half: u16) -> i64 {
    let h = half as u64;
    (((h >> 12) & 0x1) << 5
        | ((h >> 6) & 0x1) << 4
        | ((h >> 5) & 0x1) << 3
        | ((h >> 4) & 0x1) << 2
        | ((h >> 3) & 0x1) << 7
        | ((h >> 2) & 0x1) << 6) as i64
}

#[inline]
fn c_imm_ldsp(half: u16) -> i64 {
    let h = half as u64;
    (((h >> 12) & 0x1) << 5
        | ((h >> 6) & 0x1) << 4
        | ((h >> 5) & 0x1) << 3
        | ((h >> 4) & 0x1) << 8
        | ((h >> 3) & 0x1) << 7
        | ((h >> 2) & 0x1) << 6) as i64
}

#[inline]
fn c_imm_swsp(half: u16) -> i64 {
    let h = half as u64;
    (((h >> 12) & 0x1) << 5
        | ((h >> 11) & 0x1) << 4
        | ((h >> 10) & 0x1) << 3
        | ((h >> 9) & 0x1) << 2
        | ((h >> 8) & 0x1) << 7
        | ((h >> 7) & 0x1) << 6) as i64
}

#[inline]
fn c_imm_sdsp(half: u16) -> i64 {
    let h = half as u64;
    (((h >> 12) & 0x1) << 5
        | ((h >> 11) & 0x1) << 4
        | ((h >> 10) & 0x1) << 3
        | ((h >> 9) & 0x1) << 8
        | ((h >> 8) & 0x1) << 7
        | ((h >> 7) & 0x1) << 6) as i64
}

#[inline]
fn c_shamt(half: u16) -> u32 {
    (((half >> 12) & 0x1) << 5 | ((half >> 2) & 0x1f)) as u32
}

/// Decodes a 16-bit compressed half-word into its base-ISA equivalent.
pub fn decode16(half: u16, xlen: Xlen) -> Result<Instruction, DecodingError> {
    use Instruction::*;

    let reserved = Err(DecodingError::Reserved(half));
    let illegal = Err(DecodingError::Illegal(half as u32));
    let rv64 = xlen == Xlen::Rv64;
    let funct3 = (half >> 13) & 0x7;

    let instruction = match half & 0x3 {
        0b00 => match funct3 {
            0b000 => {
                let imm = c_imm_addi4spn(half);
                if imm == 0 {
                    // Covers the defined-illegal all-zero encoding.
                    return reserved;
                }
                Addi(IType {
                    rd: c_rd_prime(half),
                    rs1: 2,
                    imm,
                })
            }
            0b001 => Fld(IType {
                rd: c_rd_prime(half),
                rs1: c_rs1_prime(half),
                imm: c_imm_mem_d(half),
            }),
            0b010 => Lw(IType {
                rd: c_rd_prime(half),
                rs1: c_rs1_prime(half),
                imm: c_imm_mem_w(half),
            }),
            0b011 if rv64 => Ld(IType {
                rd: c_rd_prime(half),
                rs1: c_rs1_prime(half),
                imm: c_imm_mem_d(half),
            }),
            0b011 => Flw(IType {
                rd: c_rd_prime(half),
                rs1: c_rs1_prime(half),
                imm: c_imm_mem_w(half),
            }),
            0b101 => Fsd(SType {
                rs1: c_rs1_prime(half),
                rs2: c_rd_prime(half),
                imm: c_imm_mem_d(half),
            }),
            0b110 => Sw(SType {
                rs1: c_rs1_prime(half),
                rs2: c_rd_prime(half),
                imm: c_imm_mem_w(half),
            }),
            0b111 if rv64 => Sd(SType {
                rs1: c_rs1_prime(half),
                rs2: c_rd_prime(half),
                imm: c_imm_mem_d(half),
            }),
            0b111 => Fsw(SType {
                rs1: c_rs1_prime(half),
                rs2: c_rd_prime(half),
                imm: c_imm_mem_w(half),
            }),
            _ => return illegal,
        },
        0b01 => match funct3 {
            // c.addi x0, 0 is the canonical nop hint.
            0b000 => Addi(IType {
                rd: c_rd(half),
                rs1: c_rd(half),
                imm: c_imm_ci(half),
            }),
            0b001 if rv64 => {
                if c_rd(half) == 0 {
                    return reserved;
                }
                Addiw(IType {
                    rd: c_rd(half),
                    rs1: c_rd(half),
                    imm: c_imm_ci(half),
                })
            }
            0b001 => Jal(JType {
                rd: 1,
                imm: c_imm_j(half),
            }),
            0b010 => Addi(IType {
                rd: c_rd(half),
                rs1: 0,
                imm: c_imm_ci(half),
            }),
            0b011 => {
                if c_rd(half) == 2 {
                    let imm = c_imm_addi16sp(half);
                    if imm == 0 {
                        return reserved;
                    }
                    Addi(IType {
                        rd: 2,
                        rs1: 2,
                        imm,
                    })
                } else {
                    let imm = c_imm_ci(half);
                    if imm == 0 {
                        return reserved;
                    }
                    Lui(UType {
                        rd: c_rd(half),
                        imm: imm << 12,
                    })
                }
            }
            0b100 => {
                let rd = c_rs1_prime(half);
                match (half >> 10) & 0x3 {
                    0b00 => {
                        let shamt = c_shamt(half);
                        if !rv64 && shamt >= 32 {
                            return reserved;
                        }
                        Srli(ShiftType {
                            rd,
                            rs1: rd,
                            shamt,
                        })
                    }
                    0b01 => {
                        let shamt = c_shamt(half);
                        if !rv64 && shamt >= 32 {
                            return reserved;
                        }
                        Srai(ShiftType {
                            rd,
                            rs1: rd,
                            shamt,
                        })
                    }
                    0b10 => Andi(IType {
                        rd,
                        rs1: rd,
                        imm: c_imm_ci(half),
                    }),
                    _ => {
                        let r = RType {
                            rd,
                            rs1: rd,
                            rs2: c_rd_prime(half),
                        };
                        match ((half >> 12) & 0x1, (half >> 5) & 0x3) {
                            (0, 0b00) => Sub(r),
                            (0, 0b01) => Xor(r),
                            (0, 0b10) => Or(r),
                            (0, 0b11) => And(r),
                            (1, 0b00) if rv64 => Subw(r),
                            (1, 0b01) if rv64 => Addw(r),
                            _ => return reserved,
                        }
                    }
                }
            }
            0b101 => Jal(JType {
                rd: 0,
                imm: c_imm_j(half),
            }),
            0b110 => Beq(BType {
                rs1: c_rs1_prime(half),
                rs2: 0,
                imm: c_imm_branch(half),
            }),
            0b111 => Bne(BType {
                rs1: c_rs1_prime(half),
                rs2: 0,
                imm: c_imm_branch(half),
            }),
            _ => return illegal,
        },
        0b10 => match funct3 {
            0b000 => {
                let shamt = c_shamt(half);
                if !rv64 && shamt >= 32 {
                    return reserved;
                }
                Slli(ShiftType {
                    rd: c_rd(half),
                    rs1: c_rd(half),
                    shamt,
                })
            }
            0b001 => Fld(IType {
                rd: c_rd(half),
                rs1: 2,
                imm: c_imm_ldsp(half),
            }),
            0b010 => {
                if c_rd(half) == 0 {
                    return reserved;
                }
                Lw(IType {
                    rd: c_rd(half),
                    rs1: 2,
                    imm: c_imm_lwsp(half),
                })
            }
            0b011 if rv64 => {
                if c_rd(half) == 0 {
                    return reserved;
                }
                Ld(IType {
                    rd: c_rd(half),
                    rs1: 2,
                    imm: c_imm_ldsp(half),
                })
            }
            0b011 => Flw(IType {
                rd: c_rd(half),
                rs1: 2,
                imm: c_imm_lwsp(half),
            }),
            0b100 => {
                let rd = c_rd(half);
                let rs2 = c_rs2(half);
                if half & (1 << 12) == 0 {
                    if rs2 == 0 {
                        // c.jr; the x0 form is reserved.
                        if rd == 0 {
                            return reserved;
                        }
                        Jalr(IType {
                            rd: 0,
                            rs1: rd,
                            imm: 0,
                        })
                    } else {
                        Add(RType { rd, rs1: 0, rs2 })
                    }
                } else if rs2 == 0 {
                    if rd == 0 {
                        Ebreak
                    } else {
                        Jalr(IType {
                            rd: 1,
                            rs1: rd,
                            imm: 0,
                        })
                    }
                } else {
                    Add(RType { rd, rs1: rd, rs2 })
                }
            }
            0b101 => Fsd(SType {
                rs1: 2,
                rs2: c_rs2(half),
                imm: c_imm_sdsp(half),
            }),
            0b110 => Sw(SType {
                rs1: 2,
                rs2: c_rs2(half),
                imm: c_imm_swsp(half),
            }),
            0b111 if rv64 => Sd(SType {
                rs1: 2,
                rs2: c_rs2(half),
                imm: c_imm_sdsp(half),
            }),
            0b111 => Fsw(SType {
                rs1: 2,
                rs2: c_rs2(half),
                imm: c_imm_swsp(half),
            }),
            _ => return illegal,
        },
        _ => return illegal,
    };

    Ok(instruction)
}
