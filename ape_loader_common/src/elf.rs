// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! ELF64 definitions used by the loader.

use object::LittleEndian;

pub use object::elf::{
    ELFCLASS64, ELFDATA2LSB, ELFMAG, EM_AARCH64, ET_EXEC, PF_R, PF_W, PF_X, PT_DYNAMIC, PT_LOAD,
};

/// Byte order of every header the loader accepts.
pub const ENDIAN: LittleEndian = LittleEndian;

/// The ELF file header.
pub type Ehdr = object::elf::FileHeader64<LittleEndian>;

/// One program header.
pub type Phdr = object::elf::ProgramHeader64<LittleEndian>;

/// Size of [`Ehdr`] on disk.
pub const EHDR_SIZE: usize = size_of::<Ehdr>();

/// Size of [`Phdr`] on disk.
pub const PHDR_SIZE: usize = size_of::<Phdr>();

/// The one machine this loader runs.
pub const TARGET_MACHINE: u16 = EM_AARCH64;

/// Convenience accessors over the endian-wrapped program header fields.
pub trait PhdrExt {
    fn kind(&self) -> u32;
    fn flags(&self) -> u32;
    fn offset(&self) -> u64;
    fn vaddr(&self) -> u64;
    fn filesz(&self) -> u64;
    fn memsz(&self) -> u64;
}

impl PhdrExt for Phdr {
    fn kind(&self) -> u32 {
        self.p_type.get(ENDIAN)
    }
    fn flags(&self) -> u32 {
        self.p_flags.get(ENDIAN)
    }
    fn offset(&self) -> u64 {
        self.p_offset.get(ENDIAN)
    }
    fn vaddr(&self) -> u64 {
        self.p_vaddr.get(ENDIAN)
    }
    fn filesz(&self) -> u64 {
        self.p_filesz.get(ENDIAN)
    }
    fn memsz(&self) -> u64 {
        self.p_memsz.get(ENDIAN)
    }
}

const _: () = assert!(EHDR_SIZE == 64);
const _: () = assert!(PHDR_SIZE == 56);
