// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Handing the CPU to the loaded program.

use ape_loader_common::syslib::Syslib;

use crate::error::LoaderError;

/// Fails unless this host can run the loaded program's code.
pub fn ensure_supported_host() -> Result<(), LoaderError> {
    if cfg!(target_arch = "aarch64") {
        Ok(())
    } else {
        Err(LoaderError::UnsupportedHost)
    }
}

/// Jumps to `entry` with the stack pointer at `sp` and the capability table in `x15`.
///
/// `x0` is zero on entry, as are all general purpose registers except `x15`, `x16` (the entry
/// point) and the platform register `x18`.
///
/// # Safety
///
/// `sp` must point at a finished argument block and `entry` into mapped executable code of the
/// program. `lib` must stay valid for as long as the program runs.
#[cfg(target_arch = "aarch64")]
pub unsafe fn transfer(
    sp: u64,
    lib: *const Syslib,
    entry: u64,
) -> Result<core::convert::Infallible, LoaderError> {
    tracing::debug!(
        sp = format_args!("{sp:#x}"),
        entry = format_args!("{entry:#x}"),
        "jumping to program"
    );
    // SAFETY: the caller guarantees `sp` and `entry`; nothing returns here.
    unsafe {
        core::arch::asm!(
            "mov x1, xzr",
            "mov x2, xzr",
            "mov x3, xzr",
            "mov x4, xzr",
            "mov x5, xzr",
            "mov x6, xzr",
            "mov x7, xzr",
            "mov x8, xzr",
            "mov x9, xzr",
            "mov x10, xzr",
            "mov x11, xzr",
            "mov x12, xzr",
            "mov x13, xzr",
            "mov x14, xzr",
            "mov x17, xzr",
            "mov x19, xzr",
            "mov x20, xzr",
            "mov x21, xzr",
            "mov x22, xzr",
            "mov x23, xzr",
            "mov x24, xzr",
            "mov x25, xzr",
            "mov x26, xzr",
            "mov x27, xzr",
            "mov x28, xzr",
            "mov x29, xzr",
            "mov x30, xzr",
            "mov sp, x0",
            "mov x0, xzr",
            "br x16",
            in("x0") sp,
            in("x15") lib,
            in("x16") entry,
            options(noreturn, nostack),
        )
    }
}

/// There is no program code this host can run.
///
/// # Safety
///
/// Always safe; `unsafe` to match hosts that do jump.
#[cfg(not(target_arch = "aarch64"))]
pub unsafe fn transfer(
    _sp: u64,
    _lib: *const Syslib,
    _entry: u64,
) -> Result<core::convert::Infallible, LoaderError> {
    Err(LoaderError::UnsupportedHost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_support_follows_the_architecture() {
        assert_eq!(ensure_supported_host().is_ok(), cfg!(target_arch = "aarch64"));
    }

    #[cfg(not(target_arch = "aarch64"))]
    #[test]
    fn refuses_to_jump_on_other_hosts() {
        // SAFETY: never jumps on this host.
        let err = unsafe { transfer(0, core::ptr::null(), 0) }.unwrap_err();
        assert!(matches!(err, LoaderError::UnsupportedHost));
    }
}
