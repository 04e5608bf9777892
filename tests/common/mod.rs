//! Shared test plumbing: logger setup, a small instruction assembler for
//! authoring test programs, and a harness around the emulator.

#![allow(dead_code)]

use bytesize::ByteSize;
use griffin::elf::{Program, ProgramSegment};
use griffin::emulate::{EmulatorOptions, EmulatorState};
use griffin::engine::system::Xlen;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const CODE_BASE: u64 = 0x1000;

//
// Instruction assembler. Only used by tests; the emulator itself never
// encodes anything.
//

pub fn encode_r(opcode: u32, funct3: u32, funct7: u32, rd: u8, rs1: u8, rs2: u8) -> u32 {
    funct7 << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | u32::from(rd) << 7
        | opcode
}

pub fn encode_i(opcode: u32, funct3: u32, rd: u8, rs1: u8, imm: i32) -> u32 {
    (imm as u32 & 0xfff) << 20 | u32::from(rs1) << 15 | funct3 << 12 | u32::from(rd) << 7 | opcode
}

pub fn encode_s(opcode: u32, funct3: u32, rs1: u8, rs2: u8, imm: i32) -> u32 {
    let imm = imm as u32;
    (imm >> 5 & 0x7f) << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | (imm & 0x1f) << 7
        | opcode
}

pub fn encode_b(funct3: u32, rs1: u8, rs2: u8, imm: i32) -> u32 {
    let imm = imm as u32;
    (imm >> 12 & 0x1) << 31
        | (imm >> 5 & 0x3f) << 25
        | u32::from(rs2) << 20
        | u32::from(rs1) << 15
        | funct3 << 12
        | (imm >> 1 & 0xf) << 8
        | (imm >> 11 & 0x1) << 7
        | 0x63
}

pub fn encode_u(opcode: u32, rd: u8, imm20: u32) -> u32 {
    (imm20 & 0xf_ffff) << 12 | u32::from(rd) << 7 | opcode
}

pub fn encode_j(rd: u8, imm: i32) -> u32 {
    let imm = imm as u32;
    (imm >> 20 & 0x1) << 31
        | (imm >> 1 & 0x3ff) << 21
        | (imm >> 11 & 0x1) << 20
        | (imm >> 12 & 0xff) << 12
        | u32::from(rd) << 7
        | 0x6f
}

pub fn lui(rd: u8, imm20: u32) -> u32 {
    encode_u(0x37, rd, imm20)
}

pub fn auipc(rd: u8, imm20: u32) -> u32 {
    encode_u(0x17, rd, imm20)
}

pub fn jal(rd: u8, imm: i32) -> u32 {
    encode_j(rd, imm)
}

pub fn jalr(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x67, 0, rd, rs1, imm)
}

pub fn ret() -> u32 {
    jalr(0, 1, 0)
}

pub fn beq(rs1: u8, rs2: u8, imm: i32) -> u32 {
    encode_b(0, rs1, rs2, imm)
}

pub fn bne(rs1: u8, rs2: u8, imm: i32) -> u32 {
    encode_b(1, rs1, rs2, imm)
}

pub fn blt(rs1: u8, rs2: u8, imm: i32) -> u32 {
    encode_b(4, rs1, rs2, imm)
}

pub fn bge(rs1: u8, rs2: u8, imm: i32) -> u32 {
    encode_b(5, rs1, rs2, imm)
}

pub fn bltu(rs1: u8, rs2: u8, imm: i32) -> u32 {
    encode_b(6, rs1, rs2, imm)
}

pub fn bgeu(rs1: u8, rs2: u8, imm: i32) -> u32 {
    encode_b(7, rs1, rs2, imm)
}

pub fn lb(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x03, 0, rd, rs1, imm)
}

pub fn lh(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x03, 1, rd, rs1, imm)
}

pub fn lw(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x03, 2, rd, rs1, imm)
}

pub fn ld(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x03, 3, rd, rs1, imm)
}

pub fn lbu(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x03, 4, rd, rs1, imm)
}

pub fn lhu(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x03, 5, rd, rs1, imm)
}

pub fn sb(rs2: u8, rs1: u8, imm: i32) -> u32 {
    encode_s(0x23, 0, rs1, rs2, imm)
}

pub fn sh(rs2: u8, rs1: u8, imm: i32) -> u32 {
    encode_s(0x23, 1, rs1, rs2, imm)
}

pub fn sw(rs2: u8, rs1: u8, imm: i32) -> u32 {
    encode_s(0x23, 2, rs1, rs2, imm)
}

pub fn sd(rs2: u8, rs1: u8, imm: i32) -> u32 {
    encode_s(0x23, 3, rs1, rs2, imm)
}

pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x13, 0, rd, rs1, imm)
}

pub fn slti(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x13, 2, rd, rs1, imm)
}

pub fn sltiu(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x13, 3, rd, rs1, imm)
}

pub fn xori(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x13, 4, rd, rs1, imm)
}

pub fn ori(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x13, 6, rd, rs1, imm)
}

pub fn andi(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x13, 7, rd, rs1, imm)
}

pub fn slli(rd: u8, rs1: u8, shamt: u32) -> u32 {
    encode_i(0x13, 1, rd, rs1, shamt as i32)
}

pub fn srli(rd: u8, rs1: u8, shamt: u32) -> u32 {
    encode_i(0x13, 5, rd, rs1, shamt as i32)
}

pub fn srai(rd: u8, rs1: u8, shamt: u32) -> u32 {
    encode_i(0x13, 5, rd, rs1, (0x400 | shamt) as i32)
}

pub fn addiw(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(0x1b, 0, rd, rs1, imm)
}

pub fn add(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 0, 0x00, rd, rs1, rs2)
}

pub fn sub(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 0, 0x20, rd, rs1, rs2)
}

pub fn sll(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 1, 0x00, rd, rs1, rs2)
}

pub fn slt(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 2, 0x00, rd, rs1, rs2)
}

pub fn sltu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 3, 0x00, rd, rs1, rs2)
}

pub fn xor(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 4, 0x00, rd, rs1, rs2)
}

pub fn srl(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 5, 0x00, rd, rs1, rs2)
}

pub fn sra(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 5, 0x20, rd, rs1, rs2)
}

pub fn or(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 6, 0x00, rd, rs1, rs2)
}

pub fn and(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 7, 0x00, rd, rs1, rs2)
}

pub fn mul(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 0, 0x01, rd, rs1, rs2)
}

pub fn mulh(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 1, 0x01, rd, rs1, rs2)
}

pub fn mulhu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 3, 0x01, rd, rs1, rs2)
}

pub fn div(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 4, 0x01, rd, rs1, rs2)
}

pub fn divu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 5, 0x01, rd, rs1, rs2)
}

pub fn rem(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 6, 0x01, rd, rs1, rs2)
}

pub fn remu(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x33, 7, 0x01, rd, rs1, rs2)
}

pub fn addw(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x3b, 0, 0x00, rd, rs1, rs2)
}

pub fn subw(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x3b, 0, 0x20, rd, rs1, rs2)
}

pub fn mulw(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x3b, 0, 0x01, rd, rs1, rs2)
}

pub fn divw(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x3b, 4, 0x01, rd, rs1, rs2)
}

pub fn remw(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x3b, 6, 0x01, rd, rs1, rs2)
}

pub fn ecall() -> u32 {
    0x0000_0073
}

pub fn ebreak() -> u32 {
    0x0010_0073
}

pub fn mret() -> u32 {
    0x3020_0073
}

pub fn sret() -> u32 {
    0x1020_0073
}

pub fn csrrw(rd: u8, csr: u16, rs1: u8) -> u32 {
    encode_i(0x73, 1, rd, rs1, csr as i32)
}

pub fn csrrs(rd: u8, csr: u16, rs1: u8) -> u32 {
    encode_i(0x73, 2, rd, rs1, csr as i32)
}

pub fn csrrwi(rd: u8, csr: u16, zimm: u8) -> u32 {
    encode_i(0x73, 5, rd, zimm, csr as i32)
}

fn encode_amo(funct5: u32, funct3: u32, rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(0x2f, funct3, funct5 << 2, rd, rs1, rs2)
}

pub fn lr_w(rd: u8, rs1: u8) -> u32 {
    encode_amo(0x02, 2, rd, rs1, 0)
}

pub fn sc_w(rd: u8, rs2: u8, rs1: u8) -> u32 {
    encode_amo(0x03, 2, rd, rs1, rs2)
}

pub fn lr_d(rd: u8, rs1: u8) -> u32 {
    encode_amo(0x02, 3, rd, rs1, 0)
}

pub fn sc_d(rd: u8, rs2: u8, rs1: u8) -> u32 {
    encode_amo(0x03, 3, rd, rs1, rs2)
}

pub fn amoswap_w(rd: u8, rs2: u8, rs1: u8) -> u32 {
    encode_amo(0x01, 2, rd, rs1, rs2)
}

pub fn amoadd_w(rd: u8, rs2: u8, rs1: u8) -> u32 {
    encode_amo(0x00, 2, rd, rs1, rs2)
}

pub fn amomax_w(rd: u8, rs2: u8, rs1: u8) -> u32 {
    encode_amo(0x14, 2, rd, rs1, rs2)
}

//
// Harness plumbing.
//

pub fn options() -> EmulatorOptions {
    EmulatorOptions {
        memory_size: ByteSize::mib(1),
        stack_size: ByteSize::kib(64),
        max_steps: Some(1_000_000),
        strict_align: false,
    }
}

/// Packs instruction words into a loadable program at [`CODE_BASE`].
pub fn program(xlen: Xlen, words: &[u32]) -> Program {
    let content: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    let mem_size = content.len() as u64;
    Program {
        entry: CODE_BASE,
        xlen,
        segments: vec![ProgramSegment {
            address: CODE_BASE,
            content,
            mem_size,
        }],
        global_pointer: None,
    }
}

/// Boots a hart with the given words stamped at [`CODE_BASE`].
pub fn boot(xlen: Xlen, words: &[u32]) -> EmulatorState {
    init();
    let mut state = EmulatorState::new(xlen, options());
    state.bootstrap(&program(xlen, words)).expect("program fits");
    state
}

/// Boots and runs to the halt sentinel, returning the final hart state.
pub fn run(xlen: Xlen, words: &[u32], setup: impl FnOnce(&mut EmulatorState)) -> EmulatorState {
    let mut state = boot(xlen, words);
    setup(&mut state);
    state.run().expect("run completes");
    assert!(state.halted(), "hart must reach the halt sentinel");
    state
}
