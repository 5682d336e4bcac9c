// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Deciding whether the front of a file is something this loader can run.
//!
//! A candidate is either a plain ELF64 AArch64 executable, or an APE launcher script: a shell
//! script that starts with one of two fixed signatures and carries one or more
//! `printf '<octal escapes>'` statements within its first [`HEADER_BUF_SIZE`] bytes, each of which
//! prints an ELF header when run by a shell. [`candidates`] produces every header worth trying, in
//! the order they should be tried.

use thiserror::Error;

use crate::consts::{HEADER_BUF_SIZE, PHDR_BUF_SIZE};
use crate::elf::{
    EHDR_SIZE, ELFCLASS64, ELFDATA2LSB, ELFMAG, ENDIAN, ET_EXEC, Ehdr, PHDR_SIZE, Phdr,
    TARGET_MACHINE,
};
use crate::primitives::read64_le;

/// The two launcher script signatures, as the first eight bytes of the file.
pub const APE_SIGNATURES: [&[u8; 8]; 2] = [b"MZqFpD='", b"jartsr='"];

const PRINTF_MARKER: &[u8; 8] = b"printf '";

/// Reasons a header is not directly acceptable.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("header is shorter than an ELF header")]
    TooShort,
    #[error("bad ELF magic")]
    BadMagic,
    #[error("not a fixed-address executable (e_type {0})")]
    NotExecutable(u16),
    #[error("wrong machine type {0}")]
    WrongMachine(u16),
    #[error("not a 64-bit ELF (class {0})")]
    WrongClass(u8),
    #[error("not a little-endian ELF (data {0})")]
    WrongEncoding(u8),
}

/// Reasons the program header table could not be obtained.
#[derive(Debug, Error)]
pub enum ProgramHeaderError<E> {
    #[error("program header table does not fit in {PHDR_BUF_SIZE} bytes")]
    TooLarge,
    #[error("unexpected program header entry size {0}")]
    BadEntrySize(u16),
    #[error("program header table offset overflows")]
    BadOffset,
    #[error("failed to read program headers")]
    Io(#[source] E),
}

/// A trait for reading bytes at a specific offset.
pub trait ReadAt {
    /// Error type for read operations.
    type Error;
    /// Fill all of `buf` from the given offset, failing on a short read.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// Checks `buf` for an ELF header this loader can run and returns a view of it.
pub fn accept_header(buf: &[u8]) -> Result<&Ehdr, ClassifyError> {
    let (ehdr, _) =
        object::pod::from_bytes::<Ehdr>(buf).map_err(|()| ClassifyError::TooShort)?;
    if ehdr.e_ident.magic != ELFMAG {
        return Err(ClassifyError::BadMagic);
    }
    let e_type = ehdr.e_type.get(ENDIAN);
    if e_type != ET_EXEC {
        return Err(ClassifyError::NotExecutable(e_type));
    }
    let machine = ehdr.e_machine.get(ENDIAN);
    if machine != TARGET_MACHINE {
        return Err(ClassifyError::WrongMachine(machine));
    }
    if ehdr.e_ident.class != ELFCLASS64 {
        return Err(ClassifyError::WrongClass(ehdr.e_ident.class));
    }
    if ehdr.e_ident.data != ELFDATA2LSB {
        return Err(ClassifyError::WrongEncoding(ehdr.e_ident.data));
    }
    Ok(ehdr)
}

/// Reads the program header table described by `ehdr` into `buf`.
///
/// The table must fit in [`PHDR_BUF_SIZE`] bytes and be read in full.
pub fn read_program_headers<'b, R: ReadAt>(
    ehdr: &Ehdr,
    reader: &mut R,
    buf: &'b mut [u8; PHDR_BUF_SIZE],
) -> Result<&'b [Phdr], ProgramHeaderError<R::Error>> {
    let phnum = usize::from(ehdr.e_phnum.get(ENDIAN));
    let phentsize = ehdr.e_phentsize.get(ENDIAN);
    if phnum > 0 && usize::from(phentsize) != PHDR_SIZE {
        return Err(ProgramHeaderError::BadEntrySize(phentsize));
    }
    let len = phnum * PHDR_SIZE;
    if len > buf.len() {
        return Err(ProgramHeaderError::TooLarge);
    }
    let phoff = ehdr.e_phoff.get(ENDIAN);
    u64::try_from(len)
        .ok()
        .and_then(|len| phoff.checked_add(len))
        .ok_or(ProgramHeaderError::BadOffset)?;
    reader
        .read_at(phoff, &mut buf[..len])
        .map_err(ProgramHeaderError::Io)?;
    let (phdrs, _) = object::pod::slice_from_bytes::<Phdr>(&buf[..len], phnum)
        .map_err(|()| ProgramHeaderError::TooLarge)?;
    Ok(phdrs)
}

/// Whether `buf` starts with an APE launcher script signature.
#[must_use]
pub fn is_ape_script(buf: &[u8]) -> bool {
    let head = read64_le(buf);
    head.is_some() && APE_SIGNATURES.iter().any(|sig| read64_le(*sig) == head)
}

/// The payload of one `printf '...'` statement.
///
/// Only the first [`EHDR_SIZE`] bytes are kept; `len` counts every decoded byte.
#[derive(Clone, Copy)]
pub struct DecodedHeader {
    bytes: [u8; EHDR_SIZE],
    len: usize,
}

impl DecodedHeader {
    /// Number of bytes the statement decoded to.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The decoded header, if the statement produced at least a full ELF header.
    #[must_use]
    pub fn header(&self) -> Option<&[u8; EHDR_SIZE]> {
        (self.len >= EHDR_SIZE).then_some(&self.bytes)
    }
}

impl core::fmt::Debug for DecodedHeader {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DecodedHeader")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

/// Every `printf '...'` statement in a launcher script, decoded in file order.
pub struct EmbeddedHeaders<'a> {
    script: &'a [u8],
    pos: usize,
}

impl<'a> EmbeddedHeaders<'a> {
    /// Scans at most the first [`HEADER_BUF_SIZE`] bytes of `script`.
    #[must_use]
    pub fn new(script: &'a [u8]) -> Self {
        Self {
            script: &script[..script.len().min(HEADER_BUF_SIZE)],
            pos: 0,
        }
    }

    fn decode_at(&mut self, start: usize) -> DecodedHeader {
        let buf = self.script;
        let is_octal = |c: u8| (b'0'..=b'7').contains(&c);
        let mut out = DecodedHeader {
            bytes: [0; EHDR_SIZE],
            len: 0,
        };
        let mut p = start;
        while p + 3 < buf.len() {
            let mut c = buf[p];
            p += 1;
            if c == b'\'' {
                break;
            }
            if c == b'\\' && is_octal(buf[p]) {
                c = buf[p] - b'0';
                p += 1;
                if is_octal(buf[p]) {
                    c = c.wrapping_mul(8).wrapping_add(buf[p] - b'0');
                    p += 1;
                    if is_octal(buf[p]) {
                        c = c.wrapping_mul(8).wrapping_add(buf[p] - b'0');
                        p += 1;
                    }
                }
            }
            if let Some(slot) = out.bytes.get_mut(out.len) {
                *slot = c;
            }
            out.len += 1;
        }
        // The scan resumes one byte past wherever decoding stopped.
        self.pos = p + 1;
        out
    }
}

impl Iterator for EmbeddedHeaders<'_> {
    type Item = DecodedHeader;

    fn next(&mut self) -> Option<DecodedHeader> {
        while self.pos + PRINTF_MARKER.len() <= self.script.len() {
            let at = self.pos;
            if self.script[at..].starts_with(PRINTF_MARKER) {
                return Some(self.decode_at(at + PRINTF_MARKER.len()));
            }
            self.pos += 1;
        }
        None
    }
}

/// A header worth handing to [`accept_header`].
#[derive(Debug, Clone, Copy)]
pub enum Candidate<'a> {
    /// Decoded from a `printf` statement of a launcher script.
    Embedded([u8; EHDR_SIZE]),
    /// The front of the file itself.
    Raw(&'a [u8]),
}

impl Candidate<'_> {
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match self {
            Candidate::Embedded(bytes) => bytes,
            Candidate::Raw(bytes) => bytes,
        }
    }
}

/// Lazily yields every candidate header in `buf`.
///
/// For a launcher script that is each complete embedded header in order; the raw buffer always
/// comes last.
pub struct Candidates<'a> {
    buf: &'a [u8],
    embedded: Option<EmbeddedHeaders<'a>>,
    raw_done: bool,
}

impl<'a> Iterator for Candidates<'a> {
    type Item = Candidate<'a>;

    fn next(&mut self) -> Option<Candidate<'a>> {
        if let Some(embedded) = &mut self.embedded {
            if let Some(bytes) = embedded.find_map(|decoded| decoded.header().copied()) {
                return Some(Candidate::Embedded(bytes));
            }
            self.embedded = None;
        }
        if self.raw_done {
            return None;
        }
        self.raw_done = true;
        Some(Candidate::Raw(self.buf))
    }
}

/// Candidate headers for a file whose first bytes are `buf`.
#[must_use]
pub fn candidates(buf: &[u8]) -> Candidates<'_> {
    Candidates {
        buf,
        embedded: is_ape_script(buf).then(|| EmbeddedHeaders::new(buf)),
        raw_done: false,
    }
}
