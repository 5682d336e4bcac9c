// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Turning program headers into fixed-address mappings.
//!
//! [`LoadPlan::new`] validates every loadable segment without touching memory; only a plan that
//! passed validation in full can be handed to a [`MapSegments`] implementation.

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::consts::{PAGE_SIZE, PHDR_BUF_SIZE};
use crate::elf::{PF_R, PF_W, PF_X, PHDR_SIZE, PT_DYNAMIC, PT_LOAD, Phdr, PhdrExt};
use crate::primitives::round_up;

/// Most program headers that fit in the program header buffer.
pub const MAX_SEGMENTS: usize = PHDR_BUF_SIZE / PHDR_SIZE;

const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

bitflags::bitflags! {
    /// Access rights of a mapped segment.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SegmentProt: u32 {
        /// Readable.
        const READ = 1 << 0;
        /// Writable.
        const WRITE = 1 << 1;
        /// Executable.
        const EXEC = 1 << 2;
    }
}

impl SegmentProt {
    /// Translates ELF `PF_*` flags.
    #[must_use]
    pub fn from_elf_flags(flags: u32) -> Self {
        let mut prot = Self::empty();
        prot.set(Self::READ, flags & PF_R != 0);
        prot.set(Self::WRITE, flags & PF_W != 0);
        prot.set(Self::EXEC, flags & PF_X != 0);
        prot
    }
}

/// Reasons a program cannot be loaded.
///
/// The messages are what the user sees after the program path.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    #[error("not a real executable")]
    Dynamic,
    #[error("APE phdr addr must be 16384-aligned")]
    MisalignedAddress { vaddr: u64 },
    #[error("APE phdr offset must be 16384-aligned")]
    MisalignedOffset { offset: u64 },
    #[error("Apple Silicon doesn't allow RWX memory")]
    WriteExecute { vaddr: u64 },
    #[error("APE phdr filesz exceeds memsz")]
    FileSizeExceedsMemSize { vaddr: u64 },
    #[error("APE phdr exceeds address space")]
    OutOfRange { vaddr: u64 },
    #[error("ELF needs PT_LOAD phdr w/ PF_X")]
    NoExecutableSegment,
    #[error("too many loadable segments")]
    TooManySegments,
}

/// One validated `PT_LOAD` segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentMapping {
    pub vaddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub prot: SegmentProt,
}

impl SegmentMapping {
    /// The part of the last file page past the file contents that must read as zeros, as
    /// `(address, length)`.
    #[must_use]
    pub fn zero_fill(&self) -> Option<(u64, u64)> {
        if self.filesz == 0 {
            return None;
        }
        let len = (self.filesz.wrapping_neg() & PAGE_MASK).min(self.memsz - self.filesz);
        (len > 0).then(|| (self.vaddr + self.filesz, len))
    }

    /// Whole anonymous pages needed past the file pages, as `(address, length)`.
    #[must_use]
    pub fn bss(&self) -> Option<(u64, u64)> {
        let file_end = round_up(self.filesz, PAGE_SIZE as u64);
        let mem_end = round_up(self.memsz, PAGE_SIZE as u64);
        (mem_end > file_end).then(|| (self.vaddr + file_end, mem_end - file_end))
    }
}

/// Host memory operations a [`LoadPlan`] needs.
///
/// All addresses are absolute and page aligned except for [`MapSegments::zero_fill`].
pub trait MapSegments {
    type Error;

    /// Maps `len` bytes of the program file at `offset` to exactly `addr`, privately.
    ///
    /// # Safety
    ///
    /// Whatever was mapped at `addr` is replaced.
    unsafe fn map_file(
        &mut self,
        addr: u64,
        len: u64,
        prot: SegmentProt,
        offset: u64,
    ) -> Result<(), Self::Error>;

    /// Writes `len` zero bytes at `addr`, inside a mapping made by [`MapSegments::map_file`]
    /// with `prot`.
    ///
    /// # Safety
    ///
    /// The range must be mapped and not referenced by the caller.
    unsafe fn zero_fill(&mut self, addr: u64, len: u64, prot: SegmentProt)
    -> Result<(), Self::Error>;

    /// Maps `len` bytes of fresh zero pages to exactly `addr`.
    ///
    /// # Safety
    ///
    /// Whatever was mapped at `addr` is replaced.
    unsafe fn map_anonymous(
        &mut self,
        addr: u64,
        len: u64,
        prot: SegmentProt,
    ) -> Result<(), Self::Error>;
}

/// Failures while carrying out a [`LoadPlan`].
#[derive(Debug, Error)]
pub enum MapError<E> {
    #[error("image mmap()")]
    Image(#[source] E),
    #[error("image zero fill")]
    ZeroFill(#[source] E),
    #[error("bss mmap()")]
    Bss(#[source] E),
}

impl<E> MapError<E> {
    /// The host error behind the failure.
    pub fn source_error(&self) -> &E {
        match self {
            MapError::Image(e) | MapError::ZeroFill(e) | MapError::Bss(e) => e,
        }
    }
}

/// Validated segments, in the order they are mapped.
#[derive(Debug)]
pub struct LoadPlan {
    segments: ArrayVec<SegmentMapping, MAX_SEGMENTS>,
    code: usize,
}

impl LoadPlan {
    /// Validates `phdrs`, last to first.
    ///
    /// A `PT_DYNAMIC` header rejects the program outright. Other non-`PT_LOAD` headers and empty
    /// segments are skipped. At least one segment must be executable.
    pub fn new(phdrs: &[Phdr]) -> Result<Self, SegmentError> {
        let mut segments = ArrayVec::new();
        let mut code = None;
        for phdr in phdrs.iter().rev() {
            if phdr.kind() == PT_DYNAMIC {
                return Err(SegmentError::Dynamic);
            }
            if phdr.kind() != PT_LOAD || phdr.memsz() == 0 {
                continue;
            }
            let vaddr = phdr.vaddr();
            if vaddr & PAGE_MASK != 0 {
                return Err(SegmentError::MisalignedAddress { vaddr });
            }
            let offset = phdr.offset();
            if offset & PAGE_MASK != 0 {
                return Err(SegmentError::MisalignedOffset { offset });
            }
            let prot = SegmentProt::from_elf_flags(phdr.flags());
            if prot.contains(SegmentProt::WRITE | SegmentProt::EXEC) {
                return Err(SegmentError::WriteExecute { vaddr });
            }
            if phdr.filesz() > phdr.memsz() {
                return Err(SegmentError::FileSizeExceedsMemSize { vaddr });
            }
            // Every page the segment touches, file and bss alike, must be addressable.
            let in_range = phdr
                .memsz()
                .checked_add(PAGE_MASK)
                .map(|end| end & !PAGE_MASK)
                .and_then(|len| vaddr.checked_add(len))
                .is_some()
                && offset.checked_add(phdr.filesz()).is_some();
            if !in_range {
                return Err(SegmentError::OutOfRange { vaddr });
            }
            if prot.contains(SegmentProt::EXEC) {
                code = Some(segments.len());
            }
            segments
                .try_push(SegmentMapping {
                    vaddr,
                    offset,
                    filesz: phdr.filesz(),
                    memsz: phdr.memsz(),
                    prot,
                })
                .map_err(|_| SegmentError::TooManySegments)?;
        }
        let code = code.ok_or(SegmentError::NoExecutableSegment)?;
        Ok(Self { segments, code })
    }

    #[must_use]
    pub fn segments(&self) -> &[SegmentMapping] {
        &self.segments
    }

    /// The executable segment that was validated last, i.e. the first one declared.
    #[must_use]
    pub fn code_segment(&self) -> &SegmentMapping {
        &self.segments[self.code]
    }

    /// Maps every segment.
    ///
    /// # Safety
    ///
    /// Every range the plan covers is replaced, so none of them may hold anything the caller
    /// still uses.
    pub unsafe fn map<M: MapSegments>(&self, mapper: &mut M) -> Result<(), MapError<M::Error>> {
        for seg in &self.segments {
            if seg.filesz > 0 {
                // SAFETY: the caller guarantees the range is free for the program.
                unsafe { mapper.map_file(seg.vaddr, seg.filesz, seg.prot, seg.offset) }
                    .map_err(MapError::Image)?;
                if let Some((addr, len)) = seg.zero_fill() {
                    // SAFETY: the range lies inside the mapping made just above.
                    unsafe { mapper.zero_fill(addr, len, seg.prot) }
                        .map_err(MapError::ZeroFill)?;
                }
            }
            if let Some((addr, len)) = seg.bss() {
                // SAFETY: the caller guarantees the range is free for the program.
                unsafe { mapper.map_anonymous(addr, len, seg.prot) }.map_err(MapError::Bss)?;
            }
        }
        Ok(())
    }
}
