// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Toggling write protection of JIT memory for the guest.
//!
//! On Apple Silicon a thread either writes or executes `MAP_JIT` memory, never both. The host's
//! `pthread_jit_write_protect_np` flips between the two, but it only knows about threads the
//! host's runtime started. Guests therefore get [`write_protect`], which drives the permission
//! register directly when the comm page advertises one, and falls back to the host call
//! otherwise.

use core::ffi::c_int;
use core::time::Duration;

use thiserror::Error;

/// Extra attempts after the first before giving up on a register that will not settle.
pub const MAX_RETRIES: u32 = 8192;

/// Pause between attempts.
pub const RETRY_DELAY: Duration = Duration::from_micros(10);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JitError {
    #[error("failed to set jit write protection")]
    Unsettled { attempts: u32 },
}

/// Something that can switch the calling thread between writing and executing JIT memory.
pub trait JitWriteProtect {
    fn set_write_protect(&mut self, protect: bool) -> Result<(), JitError>;
}

/// A permission register whose wanted values are published by the host.
pub trait ControlRegister {
    /// The value the host publishes for the requested state.
    fn published(&self, protect: bool) -> u64;
    /// Writes the register and synchronizes the pipeline.
    ///
    /// # Safety
    ///
    /// `value` must be one the host published for this register.
    unsafe fn write(&mut self, value: u64);
    fn read(&self) -> u64;
}

/// Writes the published value until the register reads back what is published, pausing between
/// attempts. Returns the number of extra attempts it took.
pub fn settle<R: ControlRegister>(
    register: &mut R,
    protect: bool,
    retries: u32,
    mut pause: impl FnMut(),
) -> Result<u32, JitError> {
    for attempt in 0..=retries {
        let value = register.published(protect);
        // SAFETY: the value comes straight from the host.
        unsafe { register.write(value) };
        // The host may have republished concurrently; compare against its current value.
        if register.published(protect) == register.read() {
            return Ok(attempt);
        }
        pause();
    }
    Err(JitError::Unsettled {
        attempts: retries + 1,
    })
}

/// Drives a [`ControlRegister`] directly.
pub struct RegisterToggle<R> {
    register: R,
    retries: u32,
}

impl<R: ControlRegister> RegisterToggle<R> {
    pub fn new(register: R) -> Self {
        Self {
            register,
            retries: MAX_RETRIES,
        }
    }
}

impl<R: ControlRegister> JitWriteProtect for RegisterToggle<R> {
    fn set_write_protect(&mut self, protect: bool) -> Result<(), JitError> {
        settle(&mut self.register, protect, self.retries, || {
            std::thread::sleep(RETRY_DELAY);
        })
        .map(drop)
    }
}

/// Defers to the host's own toggle. Hosts without JIT write protection have nothing to toggle.
pub struct SoftwareToggle;

impl JitWriteProtect for SoftwareToggle {
    fn set_write_protect(&mut self, protect: bool) -> Result<(), JitError> {
        cfg_if::cfg_if! {
            if #[cfg(target_vendor = "apple")] {
                crate::host::darwin::pthread_jit_write_protect_np(c_int::from(protect));
            } else {
                let _ = protect;
            }
        }
        Ok(())
    }
}

#[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
mod aprr {
    use super::ControlRegister;

    const COMM_PAGE_START: usize = 0x0000_000f_ffff_c000;
    const APRR_SUPPORT: usize = COMM_PAGE_START + 0x10c;
    const APRR_WRITE_ENABLE: usize = COMM_PAGE_START + 0x110;
    const APRR_WRITE_DISABLE: usize = COMM_PAGE_START + 0x118;

    /// The two register encodings the comm page can advertise.
    #[derive(Clone, Copy, Debug)]
    pub(super) enum CommPageAprr {
        /// Support byte 1: `S3_4_c15_c2_7`.
        V1,
        /// Support byte 3: `S3_6_c15_c1_5`.
        V3,
    }

    impl CommPageAprr {
        pub(super) fn detect() -> Option<Self> {
            // SAFETY: the comm page is mapped read-only into every process.
            let support = unsafe { core::ptr::read_volatile(APRR_SUPPORT as *const u8) };
            match support {
                1 => Some(Self::V1),
                3 => Some(Self::V3),
                _ => None,
            }
        }
    }

    impl ControlRegister for CommPageAprr {
        fn published(&self, protect: bool) -> u64 {
            let word = if protect {
                APRR_WRITE_DISABLE
            } else {
                APRR_WRITE_ENABLE
            };
            // SAFETY: as in `detect`.
            unsafe { core::ptr::read_volatile(word as *const u64) }
        }

        unsafe fn write(&mut self, value: u64) {
            // SAFETY: the caller passes a value the host published for this register.
            unsafe {
                match self {
                    Self::V1 => core::arch::asm!(
                        "msr S3_4_c15_c2_7, {0}",
                        "isb sy",
                        in(reg) value,
                        options(nostack),
                    ),
                    Self::V3 => core::arch::asm!(
                        "msr S3_6_c15_c1_5, {0}",
                        "isb sy",
                        in(reg) value,
                        options(nostack),
                    ),
                }
            }
        }

        fn read(&self) -> u64 {
            let value: u64;
            // SAFETY: reading the register has no side effects.
            unsafe {
                match self {
                    Self::V1 => core::arch::asm!(
                        "mrs {0}, S3_4_c15_c2_7",
                        out(reg) value,
                        options(nostack, nomem),
                    ),
                    Self::V3 => core::arch::asm!(
                        "mrs {0}, S3_6_c15_c1_5",
                        out(reg) value,
                        options(nostack, nomem),
                    ),
                }
            }
            value
        }
    }
}

/// Toggles write protection on the calling thread with whatever this host offers.
#[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
pub fn set_host_write_protect(protect: bool) -> Result<(), JitError> {
    match aprr::CommPageAprr::detect() {
        Some(register) => RegisterToggle::new(register).set_write_protect(protect),
        None => SoftwareToggle.set_write_protect(protect),
    }
}

/// Toggles write protection on the calling thread with whatever this host offers.
#[cfg(not(all(target_vendor = "apple", target_arch = "aarch64")))]
pub fn set_host_write_protect(protect: bool) -> Result<(), JitError> {
    SoftwareToggle.set_write_protect(protect)
}

/// The guest's `jit_write_protect` capability. Failure is fatal.
pub unsafe extern "C" fn write_protect(enabled: c_int) {
    if let Err(err) = set_host_write_protect(enabled != 0) {
        crate::diag::pexit(b"ape-loader", None, err_message(err));
    }
}

fn err_message(err: JitError) -> &'static [u8] {
    match err {
        JitError::Unsettled { .. } => b"failed to set jit write protection",
    }
}

/// The guest's `jit_write_protect_supported` capability on hosts without JIT write protection.
pub unsafe extern "C" fn write_protect_unsupported() -> c_int {
    0
}
