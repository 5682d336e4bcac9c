// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Fixtures shared by the unit tests.

use std::vec::Vec;

use object::U16;
use object::U32;
use object::U64;
use object::elf::{FileHeader64, Ident, ProgramHeader64};

use crate::classify::ReadAt;
use crate::consts::HEADER_BUF_SIZE;
use crate::elf::{
    EHDR_SIZE, ELFCLASS64, ELFDATA2LSB, ELFMAG, ENDIAN, ET_EXEC, PHDR_SIZE, PT_LOAD,
    TARGET_MACHINE,
};

/// Builds the first [`HEADER_BUF_SIZE`] bytes of an ELF file with its program headers right
/// after the file header.
pub(crate) struct ElfBuilder {
    entry: u64,
    e_type: u16,
    machine: u16,
    phdrs: Vec<ProgramHeader64<object::LittleEndian>>,
}

impl ElfBuilder {
    pub(crate) fn new() -> Self {
        Self {
            entry: 0x10_0000,
            e_type: ET_EXEC,
            machine: TARGET_MACHINE,
            phdrs: Vec::new(),
        }
    }

    pub(crate) fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    pub(crate) fn e_type(mut self, e_type: u16) -> Self {
        self.e_type = e_type;
        self
    }

    pub(crate) fn machine(mut self, machine: u16) -> Self {
        self.machine = machine;
        self
    }

    pub(crate) fn phdr(
        mut self,
        kind: u32,
        flags: u32,
        vaddr: u64,
        offset: u64,
        filesz: u64,
        memsz: u64,
    ) -> Self {
        self.phdrs.push(ProgramHeader64 {
            p_type: U32::new(ENDIAN, kind),
            p_flags: U32::new(ENDIAN, flags),
            p_offset: U64::new(ENDIAN, offset),
            p_vaddr: U64::new(ENDIAN, vaddr),
            p_paddr: U64::new(ENDIAN, vaddr),
            p_filesz: U64::new(ENDIAN, filesz),
            p_memsz: U64::new(ENDIAN, memsz),
            p_align: U64::new(ENDIAN, 0x4000),
        });
        self
    }

    pub(crate) fn load(self, vaddr: u64, offset: u64, filesz: u64, memsz: u64, flags: u32) -> Self {
        self.phdr(PT_LOAD, flags, vaddr, offset, filesz, memsz)
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let ehdr = FileHeader64::<object::LittleEndian> {
            e_ident: Ident {
                magic: ELFMAG,
                class: ELFCLASS64,
                data: ELFDATA2LSB,
                version: 1,
                os_abi: 0,
                abi_version: 0,
                padding: [0; 7],
            },
            e_type: U16::new(ENDIAN, self.e_type),
            e_machine: U16::new(ENDIAN, self.machine),
            e_version: U32::new(ENDIAN, 1),
            e_entry: U64::new(ENDIAN, self.entry),
            e_phoff: U64::new(ENDIAN, EHDR_SIZE as u64),
            e_shoff: U64::new(ENDIAN, 0),
            e_flags: U32::new(ENDIAN, 0),
            e_ehsize: U16::new(ENDIAN, EHDR_SIZE as u16),
            e_phentsize: U16::new(ENDIAN, PHDR_SIZE as u16),
            e_phnum: U16::new(ENDIAN, self.phdrs.len() as u16),
            e_shentsize: U16::new(ENDIAN, 0),
            e_shnum: U16::new(ENDIAN, 0),
            e_shstrndx: U16::new(ENDIAN, 0),
        };
        let mut out = Vec::with_capacity(HEADER_BUF_SIZE);
        out.extend_from_slice(object::pod::bytes_of(&ehdr));
        for phdr in &self.phdrs {
            out.extend_from_slice(object::pod::bytes_of(phdr));
        }
        out.resize(HEADER_BUF_SIZE, 0);
        out
    }
}

/// A `printf '...'` statement printing `bytes`, every byte as a three digit octal escape.
pub(crate) fn printf_statement(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::from(&b"printf '"[..]);
    for &b in bytes {
        out.extend_from_slice(&[b'\\', b'0' + (b >> 6), b'0' + ((b >> 3) & 7), b'0' + (b & 7)]);
    }
    out.push(b'\'');
    out
}

/// A simple reader that reads from a byte slice.
pub(crate) struct SliceReader<'a> {
    data: &'a [u8],
}

impl<'a> SliceReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

#[derive(Debug)]
pub(crate) struct ShortRead;

impl ReadAt for SliceReader<'_> {
    type Error = ShortRead;

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let start = usize::try_from(offset).map_err(|_| ShortRead)?;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(ShortRead);
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}
