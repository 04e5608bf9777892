mod common;

use common::*;
use griffin::decode::{decode32, AType, BType, IType, Instruction, RType, SType, ShiftType, UType};
use griffin::engine::system::Xlen;

fn roundtrip(word: u32) -> Instruction {
    decode32(word, Xlen::Rv64).unwrap()
}

#[test]
fn encode_decode_round_trips_one_form_per_family() {
    use Instruction::*;

    // U, J, I (jump), B
    assert_eq!(
        roundtrip(lui(10, 0xfffff)),
        Lui(UType {
            rd: 10,
            imm: -4096
        })
    );
    assert_eq!(
        roundtrip(auipc(5, 1)),
        Auipc(UType { rd: 5, imm: 0x1000 })
    );
    assert_eq!(
        roundtrip(jal(1, -2048)),
        Jal(griffin::decode::JType { rd: 1, imm: -2048 })
    );
    assert_eq!(
        roundtrip(jalr(1, 10, -4)),
        Jalr(IType {
            rd: 1,
            rs1: 10,
            imm: -4
        })
    );
    assert_eq!(
        roundtrip(bltu(10, 11, 4094)),
        Bltu(BType {
            rs1: 10,
            rs2: 11,
            imm: 4094
        })
    );

    // Loads and stores, including negative offsets.
    assert_eq!(
        roundtrip(lb(10, 2, -1)),
        Lb(IType {
            rd: 10,
            rs1: 2,
            imm: -1
        })
    );
    assert_eq!(
        roundtrip(ld(10, 2, 2047)),
        Ld(IType {
            rd: 10,
            rs1: 2,
            imm: 2047
        })
    );
    assert_eq!(
        roundtrip(sd(10, 2, -2048)),
        Sd(SType {
            rs1: 2,
            rs2: 10,
            imm: -2048
        })
    );

    // ALU immediate, shift, register-register, M.
    assert_eq!(
        roundtrip(addi(10, 11, -3)),
        Addi(IType {
            rd: 10,
            rs1: 11,
            imm: -3
        })
    );
    assert_eq!(
        roundtrip(srai(10, 10, 63)),
        Srai(ShiftType {
            rd: 10,
            rs1: 10,
            shamt: 63
        })
    );
    assert_eq!(
        roundtrip(sub(10, 11, 12)),
        Sub(RType {
            rd: 10,
            rs1: 11,
            rs2: 12
        })
    );
    assert_eq!(
        roundtrip(mulh(10, 11, 12)),
        Mulh(RType {
            rd: 10,
            rs1: 11,
            rs2: 12
        })
    );
    assert_eq!(
        roundtrip(divw(10, 11, 12)),
        Divw(RType {
            rd: 10,
            rs1: 11,
            rs2: 12
        })
    );

    // Atomics.
    assert_eq!(
        roundtrip(lr_w(5, 10)),
        LrW(AType {
            rd: 5,
            rs1: 10,
            rs2: 0,
            aq: false,
            rl: false
        })
    );
    assert_eq!(
        roundtrip(amomax_w(5, 6, 10)),
        AmomaxW(AType {
            rd: 5,
            rs1: 10,
            rs2: 6,
            aq: false,
            rl: false
        })
    );

    // System.
    assert_eq!(roundtrip(ecall()), Ecall);
    assert_eq!(roundtrip(ebreak()), Ebreak);
    assert_eq!(roundtrip(mret()), Mret);
    assert_eq!(roundtrip(sret()), Sret);
    assert_eq!(
        roundtrip(csrrwi(10, 0x340, 5)),
        Csrrwi(griffin::decode::CsrType {
            rd: 10,
            rs1: 5,
            csr: 0x340
        })
    );
}

#[test]
fn branch_immediates_cover_the_full_range() {
    for imm in [-4096, -2, 0, 2, 8, 4094] {
        match decode32(beq(8, 9, imm), Xlen::Rv64).unwrap() {
            Instruction::Beq(b) => assert_eq!(b.imm, i64::from(imm), "imm {}", imm),
            other => panic!("unexpected decode: {:?}", other),
        }
    }
}

#[test]
fn jump_immediates_cover_the_full_range() {
    for imm in [-1048576, -36, 0, 2, 1048574] {
        match decode32(jal(0, imm), Xlen::Rv64).unwrap() {
            Instruction::Jal(j) => assert_eq!(j.imm, i64::from(imm), "imm {}", imm),
            other => panic!("unexpected decode: {:?}", other),
        }
    }
}

#[test]
fn store_immediates_cover_the_full_range() {
    for imm in [-2048, -1, 0, 1, 2047] {
        match decode32(sw(8, 9, imm), Xlen::Rv64).unwrap() {
            Instruction::Sw(s) => assert_eq!(s.imm, i64::from(imm), "imm {}", imm),
            other => panic!("unexpected decode: {:?}", other),
        }
    }
}
