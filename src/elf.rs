use goblin::elf::{header, program_header::PT_LOAD, Elf};
use log::debug;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::engine::system::Xlen;

#[derive(Debug, Error)]
pub enum ElfError {
    #[error("failed to read image file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse ELF image")]
    Parse(#[from] goblin::error::Error),
    #[error("image is not little-endian")]
    NotLittleEndian,
    #[error("image is not an executable (e_type = {0})")]
    NotExecutable(u16),
    #[error("image is not a RISC-V binary (e_machine = {0:#x})")]
    WrongMachine(u16),
    #[error("loadable segment at offset {0:#x} extends past the end of the image")]
    TruncatedSegment(u64),
}

/// One loadable segment: file bytes plus the zero-filled tail implied by
/// `p_memsz > p_filesz`. The tail is never stored; sparse memory reads it
/// as zero.
#[derive(Clone, Debug)]
pub struct ProgramSegment {
    pub address: u64,
    pub content: Vec<u8>,
    pub mem_size: u64,
}

/// A validated executable image, ready for [`bootstrap`].
///
/// [`bootstrap`]: crate::emulate::EmulatorState::bootstrap
#[derive(Clone, Debug)]
pub struct Program {
    pub entry: u64,
    pub xlen: Xlen,
    pub segments: Vec<ProgramSegment>,
    pub global_pointer: Option<u64>,
}

impl Program {
    /// Highest byte address any loadable segment touches.
    pub fn highest_address(&self) -> u64 {
        self.segments
            .iter()
            .map(|segment| segment.address + segment.mem_size)
            .max()
            .unwrap_or(0)
    }
}

pub fn load_file(object_file: &Path) -> Result<Program, ElfError> {
    let buffer = fs::read(object_file)?;
    time_debug!(format!("parsed {}", object_file.display()), {
        load(&buffer)
    })
}

/// Validates the image and extracts its loadable segments, entry address,
/// architecture class, and the `__global_pointer$` symbol if present.
pub fn load(image: &[u8]) -> Result<Program, ElfError> {
    let elf = Elf::parse(image)?;

    if !elf.little_endian {
        return Err(ElfError::NotLittleEndian);
    }
    if elf.header.e_machine != header::EM_RISCV {
        return Err(ElfError::WrongMachine(elf.header.e_machine));
    }
    if elf.header.e_type != header::ET_EXEC {
        return Err(ElfError::NotExecutable(elf.header.e_type));
    }
    let xlen = if elf.is_64 { Xlen::Rv64 } else { Xlen::Rv32 };

    let mut segments = Vec::new();
    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD {
            continue;
        }
        let start = ph.p_offset as usize;
        let end = start + ph.p_filesz as usize;
        let content = image
            .get(start..end)
            .ok_or(ElfError::TruncatedSegment(ph.p_offset))?
            .to_vec();
        debug!(
            "segment: vaddr={:#x} offset={:#x} filesz={:#x} memsz={:#x}",
            ph.p_vaddr, ph.p_offset, ph.p_filesz, ph.p_memsz
        );
        segments.push(ProgramSegment {
            address: ph.p_vaddr,
            content,
            mem_size: ph.p_memsz.max(ph.p_filesz),
        });
    }

    let global_pointer = elf.syms.iter().find_map(|sym| {
        match elf.strtab.get_at(sym.st_name) {
            Some("__global_pointer$") => Some(sym.st_value),
            _ => None,
        }
    });

    Ok(Program {
        entry: elf.entry,
        xlen,
        segments,
        global_pointer,
    })
}
