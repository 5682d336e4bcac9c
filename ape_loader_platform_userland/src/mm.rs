// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Memory mappings made on behalf of the guest.

use core::ffi::c_void;
use core::num::NonZeroUsize;
use core::ptr::NonNull;
use std::os::fd::BorrowedFd;

use ape_loader_common::consts::PAGE_SIZE;
use ape_loader_common::primitives::{round_down, round_up};
use ape_loader_common::segments::{MapSegments, SegmentProt};
use nix::errno::Errno;
use nix::sys::mman::{MapFlags, ProtFlags};

/// Convert [`SegmentProt`] to [`nix::sys::mman::ProtFlags`].
fn segment_prot_to_prots(prot: SegmentProt) -> ProtFlags {
    let mut mmap_prot = ProtFlags::PROT_NONE;
    if prot.contains(SegmentProt::READ) {
        mmap_prot |= ProtFlags::PROT_READ;
    }
    if prot.contains(SegmentProt::WRITE) {
        mmap_prot |= ProtFlags::PROT_WRITE;
    }
    if prot.contains(SegmentProt::EXEC) {
        mmap_prot |= ProtFlags::PROT_EXEC;
    }
    mmap_prot
}

fn non_zero(value: u64) -> Result<NonZeroUsize, Errno> {
    usize::try_from(value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or(Errno::EINVAL)
}

/// Granule of `mprotect` on this host, which may be finer than the guest's [`PAGE_SIZE`].
fn host_page_size() -> usize {
    // SAFETY: no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(PAGE_SIZE)
}

/// Maps the guest stack: `len` bytes of private, zero-filled, read-write memory, preferably at
/// `hint`.
pub fn map_stack(hint: usize, len: usize) -> Result<NonNull<c_void>, Errno> {
    let len = NonZeroUsize::new(len).ok_or(Errno::EINVAL)?;
    // SAFETY: without `MAP_FIXED` the host never replaces an existing mapping.
    let stack = unsafe {
        nix::sys::mman::mmap_anonymous(
            NonZeroUsize::new(hint),
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
        )
    }?;
    tracing::debug!(hint = format_args!("{hint:#x}"), at = ?stack, len, "mapped guest stack");
    Ok(stack)
}

/// Maps program segments from an open file to their fixed addresses.
pub struct FixedMapper<'fd> {
    fd: BorrowedFd<'fd>,
}

impl<'fd> FixedMapper<'fd> {
    #[must_use]
    pub fn new(fd: BorrowedFd<'fd>) -> Self {
        Self { fd }
    }

    /// Runs `f` with the pages around `[addr, addr + len)` writable, restoring `prot` after.
    unsafe fn with_writable(
        addr: u64,
        len: u64,
        prot: SegmentProt,
        f: impl FnOnce(),
    ) -> Result<(), Errno> {
        if prot.contains(SegmentProt::WRITE) {
            f();
            return Ok(());
        }
        let page = host_page_size();
        let start = round_down(usize::try_from(addr).map_err(|_| Errno::EINVAL)?, page);
        let end = round_up(addr.checked_add(len).ok_or(Errno::EINVAL)?, page as u64);
        let span = usize::try_from(end).map_err(|_| Errno::EINVAL)? - start;
        let pages = NonNull::new(start as *mut c_void).ok_or(Errno::EINVAL)?;
        // SAFETY: the pages belong to a mapping the caller just made.
        unsafe {
            nix::sys::mman::mprotect(
                pages,
                span,
                segment_prot_to_prots(prot | SegmentProt::WRITE),
            )?;
        }
        f();
        // SAFETY: as above.
        unsafe { nix::sys::mman::mprotect(pages, span, segment_prot_to_prots(prot)) }
    }
}

impl MapSegments for FixedMapper<'_> {
    type Error = Errno;

    unsafe fn map_file(
        &mut self,
        addr: u64,
        len: u64,
        prot: SegmentProt,
        offset: u64,
    ) -> Result<(), Errno> {
        tracing::trace!(addr = format_args!("{addr:#x}"), len, ?prot, offset, "image mmap");
        let offset = libc::off_t::try_from(offset).map_err(|_| Errno::EINVAL)?;
        // SAFETY: the caller gives up whatever was mapped at `addr`.
        unsafe {
            nix::sys::mman::mmap(
                Some(non_zero(addr)?),
                non_zero(len)?,
                segment_prot_to_prots(prot),
                MapFlags::MAP_FIXED | MapFlags::MAP_PRIVATE,
                self.fd,
                offset,
            )
        }?;
        // With host pages smaller than the guest's, the file mapping stops short of the guest
        // page; the rest of it gets zero pages so the zero fill lands on mapped memory.
        let file_end = addr.checked_add(len).ok_or(Errno::EINVAL)?;
        let mapped_end = round_up(file_end, host_page_size() as u64);
        let guest_end = round_up(file_end, PAGE_SIZE as u64);
        if guest_end > mapped_end {
            // SAFETY: the range belongs to the guest page the caller gave up.
            unsafe { self.map_anonymous(mapped_end, guest_end - mapped_end, prot) }?;
        }
        Ok(())
    }

    unsafe fn zero_fill(&mut self, addr: u64, len: u64, prot: SegmentProt) -> Result<(), Errno> {
        tracing::trace!(addr = format_args!("{addr:#x}"), len, "zero fill");
        let count = usize::try_from(len).map_err(|_| Errno::EINVAL)?;
        // SAFETY: the range is inside a mapping the caller just made and holds no Rust values.
        unsafe {
            Self::with_writable(addr, len, prot, || {
                core::ptr::write_bytes(addr as usize as *mut u8, 0, count);
            })
        }
    }

    unsafe fn map_anonymous(
        &mut self,
        addr: u64,
        len: u64,
        prot: SegmentProt,
    ) -> Result<(), Errno> {
        tracing::trace!(addr = format_args!("{addr:#x}"), len, ?prot, "bss mmap");
        // SAFETY: the caller gives up whatever was mapped at `addr`.
        unsafe {
            nix::sys::mman::mmap_anonymous(
                Some(non_zero(addr)?),
                non_zero(len)?,
                segment_prot_to_prots(prot),
                MapFlags::MAP_FIXED | MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            )
        }?;
        Ok(())
    }
}
