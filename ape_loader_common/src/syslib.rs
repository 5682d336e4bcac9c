// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The host capability table.
//!
//! Programs loaded on this host cannot make raw system calls for everything they need; some
//! services are only reachable through the host's own libraries. The loader hands the guest a
//! pointer to a [`Syslib`] in `x15`, and the guest calls through it. The layout is an ABI shared
//! with every guest runtime: fields are only ever appended, and consumers check
//! [`Syslib::magic`] and [`Syslib::version`] before using the rest.
//!
//! Forwarders that mirror a system call return the result, or `-errno` on failure.

use core::ffi::{c_char, c_int, c_long, c_void};

use thiserror::Error;

/// `"slib"` read as a little-endian word.
pub const SYSLIB_MAGIC: u32 = u32::from_le_bytes(*b"slib");

/// Version of the table layout this crate produces.
pub const SYSLIB_VERSION: u32 = 1;

/// `struct timespec` of the host.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timespec {
    pub tv_sec: i64,
    pub tv_nsec: c_long,
}

/// Entry point of a thread made by [`Syslib::thread_create`].
pub type ThreadStart = unsafe extern "C" fn(*mut c_void) -> *mut c_void;

/// The capability table.
///
/// Handles of host objects (threads, attributes, signal sets, semaphores) are opaque pointers.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Syslib {
    pub magic: u32,
    pub version: u32,
    pub fork: Option<unsafe extern "C" fn() -> c_long>,
    pub pipe: Option<unsafe extern "C" fn(fds: *mut c_int) -> c_long>,
    pub clock_gettime: Option<unsafe extern "C" fn(clock: c_int, ts: *mut Timespec) -> c_long>,
    pub nanosleep: Option<unsafe extern "C" fn(req: *const Timespec, rem: *mut Timespec) -> c_long>,
    pub mmap: Option<
        unsafe extern "C" fn(
            addr: *mut c_void,
            len: usize,
            prot: c_int,
            flags: c_int,
            fd: c_int,
            off: i64,
        ) -> c_long,
    >,
    pub jit_write_protect_supported: Option<unsafe extern "C" fn() -> c_int>,
    pub jit_write_protect: Option<unsafe extern "C" fn(enabled: c_int)>,
    pub icache_invalidate: Option<unsafe extern "C" fn(start: *mut c_void, len: usize)>,
    pub thread_create: Option<
        unsafe extern "C" fn(
            thread: *mut *mut c_void,
            attr: *const c_void,
            start: ThreadStart,
            arg: *mut c_void,
        ) -> c_int,
    >,
    pub thread_exit: Option<unsafe extern "C" fn(value: *mut c_void) -> !>,
    pub thread_kill: Option<unsafe extern "C" fn(thread: *mut c_void, sig: c_int) -> c_int>,
    pub thread_sigmask:
        Option<unsafe extern "C" fn(how: c_int, set: *const c_void, old: *mut c_void) -> c_int>,
    pub thread_setname: Option<unsafe extern "C" fn(name: *const c_char) -> c_int>,
    pub semaphore_create: Option<unsafe extern "C" fn(value: c_long) -> *mut c_void>,
    pub semaphore_signal: Option<unsafe extern "C" fn(sem: *mut c_void) -> c_long>,
    pub semaphore_wait: Option<unsafe extern "C" fn(sem: *mut c_void, timeout: u64) -> c_long>,
    pub walltime: Option<unsafe extern "C" fn(when: *const Timespec, delta: i64) -> u64>,
}

/// Reasons a table may not be used.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SyslibError {
    #[error("bad capability table magic {0:#x}")]
    BadMagic(u32),
    #[error("unsupported capability table version {0}")]
    UnsupportedVersion(u32),
}

impl Syslib {
    /// A table with the right header and no capabilities.
    pub const EMPTY: Self = Self {
        magic: SYSLIB_MAGIC,
        version: SYSLIB_VERSION,
        fork: None,
        pipe: None,
        clock_gettime: None,
        nanosleep: None,
        mmap: None,
        jit_write_protect_supported: None,
        jit_write_protect: None,
        icache_invalidate: None,
        thread_create: None,
        thread_exit: None,
        thread_kill: None,
        thread_sigmask: None,
        thread_setname: None,
        semaphore_create: None,
        semaphore_signal: None,
        semaphore_wait: None,
        walltime: None,
    };

    /// Checks the header a consumer must check before calling through the table.
    pub fn validate(&self) -> Result<(), SyslibError> {
        if self.magic != SYSLIB_MAGIC {
            return Err(SyslibError::BadMagic(self.magic));
        }
        if self.version < SYSLIB_VERSION {
            return Err(SyslibError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

impl Default for Syslib {
    fn default() -> Self {
        Self::EMPTY
    }
}
