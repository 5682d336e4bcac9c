// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Everything the loader keeps for the guest, in one record at the top of the guest stack.

use core::ffi::c_void;
use core::ptr::NonNull;

use ape_loader_common::consts::{ARG_MAX, HEADER_BUF_SIZE, PHDR_BUF_SIZE, RANDOM_BYTES};
use ape_loader_common::syslib::Syslib;

use crate::error::LoaderError;

/// Program header buffer, aligned for in-place views of the table.
#[repr(C, align(8))]
pub struct PhdrBuf(pub [u8; PHDR_BUF_SIZE]);

#[repr(C, align(16))]
pub struct LoaderState {
    /// First bytes of the program file.
    pub ehdr: [u8; HEADER_BUF_SIZE],
    /// Argument and environment arena; becomes the guest's initial stack.
    pub argblock: [u8; ARG_MAX],
    pub phdr: PhdrBuf,
    pub lib: Syslib,
    /// `AT_RANDOM` bytes.
    pub rando: [u8; RANDOM_BYTES],
}

impl LoaderState {
    /// Claims the highest suitably aligned spot of a fresh mapping.
    ///
    /// # Safety
    ///
    /// `mapping` must be `len` bytes of zero-filled, writable memory that nothing else uses and
    /// that is never unmapped.
    pub unsafe fn place(
        mapping: NonNull<c_void>,
        len: usize,
    ) -> Result<&'static mut LoaderState, LoaderError> {
        let start = mapping.as_ptr().addr();
        let addr = (start + len)
            .checked_sub(size_of::<LoaderState>())
            .map(|addr| addr & !(align_of::<LoaderState>() - 1))
            .filter(|&addr| addr >= start)
            .ok_or(LoaderError::StateDoesNotFit)?;
        let state = mapping
            .as_ptr()
            .cast::<u8>()
            .wrapping_add(addr - start)
            .cast::<LoaderState>();
        tracing::trace!(at = ?state, "loader state placed");
        // SAFETY: the address is aligned and in bounds of the caller's mapping, and all-zero
        // bytes are a valid `LoaderState` (`Syslib` holds only integers and nullable functions).
        Ok(unsafe { &mut *state })
    }
}
