// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Program files and helpers shared by the runner tests.

#![allow(dead_code, reason = "not every test file uses every fixture")]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use object::elf::{
    ELFCLASS64, ELFDATA2LSB, ELFMAG, EM_AARCH64, ET_EXEC, FileHeader64, Ident, PF_R, PF_X,
    PT_LOAD, ProgramHeader64,
};
use object::{LittleEndian as LE, U16, U32, U64};

/// Length of every fixture file, comfortably more than the header the loader reads.
pub const FILE_LEN: usize = 0x2000;

/// Where launcher script fixtures keep their program headers.
pub const SCRIPT_PHOFF: usize = 0x1000;

/// Get the path to the ape_loader_runner binary.
pub fn runner_binary() -> String {
    std::env::var("NEXTEST_BIN_EXE_ape_loader_runner")
        .unwrap_or_else(|_| env!("CARGO_BIN_EXE_ape_loader_runner").to_string())
}

/// Runs the loader with `args` and no `APE_LOADER_LOG`.
pub fn run_loader<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<std::ffi::OsStr>,
{
    Command::new(runner_binary())
        .args(args)
        .env_remove("APE_LOADER_LOG")
        .output()
        .expect("Failed to execute runner binary")
}

pub fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Asserts a fatal exit whose only output is `ape error: {context}: {message}`.
pub fn assert_fatal(output: &Output, context: &Path, message: &str) {
    let stderr = stderr_of(output);
    assert!(
        !stderr.contains("panicked at"),
        "Loader panicked instead of reporting an error.\nStderr: {stderr}"
    );
    assert_eq!(output.status.code(), Some(127), "Stderr: {stderr}");
    assert_eq!(
        stderr,
        format!("ape error: {}: {message}\n", context.display())
    );
}

/// One program header.
#[derive(Clone, Copy)]
pub struct Segment {
    pub kind: u32,
    pub flags: u32,
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl Segment {
    pub fn load(vaddr: u64, offset: u64, filesz: u64, memsz: u64, flags: u32) -> Self {
        Self {
            kind: PT_LOAD,
            flags,
            vaddr,
            offset,
            filesz,
            memsz,
        }
    }

    /// A small read-execute segment at the usual text address.
    pub fn text() -> Self {
        Self::load(0x40_0000, 0, 0x1000, 0x1000, PF_R | PF_X)
    }
}

pub fn elf_header(machine: u16, phoff: u64, phnum: usize) -> Vec<u8> {
    let ehdr = FileHeader64::<LE> {
        e_ident: Ident {
            magic: ELFMAG,
            class: ELFCLASS64,
            data: ELFDATA2LSB,
            version: 1,
            os_abi: 0,
            abi_version: 0,
            padding: [0; 7],
        },
        e_type: U16::new(LE, ET_EXEC),
        e_machine: U16::new(LE, machine),
        e_version: U32::new(LE, 1),
        e_entry: U64::new(LE, 0x40_0000),
        e_phoff: U64::new(LE, phoff),
        e_shoff: U64::new(LE, 0),
        e_flags: U32::new(LE, 0),
        e_ehsize: U16::new(LE, 64),
        e_phentsize: U16::new(LE, 56),
        e_phnum: U16::new(LE, u16::try_from(phnum).unwrap()),
        e_shentsize: U16::new(LE, 0),
        e_shnum: U16::new(LE, 0),
        e_shstrndx: U16::new(LE, 0),
    };
    object::pod::bytes_of(&ehdr).to_vec()
}

pub fn program_headers(segments: &[Segment]) -> Vec<u8> {
    let mut out = Vec::new();
    for s in segments {
        let phdr = ProgramHeader64::<LE> {
            p_type: U32::new(LE, s.kind),
            p_flags: U32::new(LE, s.flags),
            p_offset: U64::new(LE, s.offset),
            p_vaddr: U64::new(LE, s.vaddr),
            p_paddr: U64::new(LE, s.vaddr),
            p_filesz: U64::new(LE, s.filesz),
            p_memsz: U64::new(LE, s.memsz),
            p_align: U64::new(LE, 0x4000),
        };
        out.extend_from_slice(object::pod::bytes_of(&phdr));
    }
    out
}

/// A plain ELF executable for `machine`.
pub fn plain_elf(machine: u16, segments: &[Segment]) -> Vec<u8> {
    let mut out = elf_header(machine, 64, segments.len());
    out.extend(program_headers(segments));
    out.resize(FILE_LEN, 0);
    out
}

pub fn aarch64_elf(segments: &[Segment]) -> Vec<u8> {
    plain_elf(EM_AARCH64, segments)
}

/// A `printf '...'` statement printing `bytes` as octal escapes.
pub fn printf_statement(bytes: &[u8]) -> Vec<u8> {
    let mut out = b"printf '".to_vec();
    for &b in bytes {
        out.extend(format!("\\{b:03o}").bytes());
    }
    out.push(b'\'');
    out
}

/// A launcher script that prints a truncated header first, then the real one. The program
/// headers sit at [`SCRIPT_PHOFF`].
pub fn ape_script(segments: &[Segment]) -> Vec<u8> {
    let mut out = b"MZqFpD='\n\n' >/dev/null\n".to_vec();
    out.extend(printf_statement(b"\x7fELF"));
    out.extend(b" >/dev/null\n");
    out.extend(printf_statement(&elf_header(
        EM_AARCH64,
        SCRIPT_PHOFF as u64,
        segments.len(),
    )));
    out.extend(b" >\"$o\"\nexit 1\n");
    assert!(out.len() < SCRIPT_PHOFF);
    out.resize(SCRIPT_PHOFF, b'\n');
    out.extend(program_headers(segments));
    out.resize(FILE_LEN, 0);
    out
}

/// Writes an executable file named `name` into `dir`.
pub fn install(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    use std::os::unix::fs::PermissionsExt as _;
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
