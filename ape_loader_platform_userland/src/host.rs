// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host services exposed to the guest, and the host facts the loader reports to it.

use core::ffi::{c_char, c_int, c_long, c_void};

use ape_loader_common::syslib::{Syslib, ThreadStart, Timespec};
use nix::errno::Errno;

use crate::jit;

/// System libraries only Apple hosts have.
#[cfg(target_vendor = "apple")]
pub mod darwin {
    use core::ffi::{c_int, c_long, c_void};

    use ape_loader_common::syslib::Timespec;

    unsafe extern "C" {
        pub safe fn pthread_jit_write_protect_np(enabled: c_int);
        pub fn pthread_jit_write_protect_supported_np() -> c_int;
        pub fn sys_icache_invalidate(start: *mut c_void, len: usize);
        pub fn dispatch_semaphore_create(value: c_long) -> *mut c_void;
        pub fn dispatch_semaphore_signal(sem: *mut c_void) -> c_long;
        pub fn dispatch_semaphore_wait(sem: *mut c_void, timeout: u64) -> c_long;
        pub fn dispatch_walltime(when: *const Timespec, delta: i64) -> u64;
    }
}

/// The host's result convention: `-1` becomes `-errno`.
fn sysret(rc: c_long) -> c_long {
    if rc == -1 {
        -c_long::from(Errno::last_raw())
    } else {
        rc
    }
}

unsafe extern "C" fn sys_fork() -> c_long {
    // SAFETY: the guest owns the consequences of forking.
    sysret(c_long::from(unsafe { libc::fork() }))
}

unsafe extern "C" fn sys_pipe(fds: *mut c_int) -> c_long {
    // SAFETY: the guest passes room for two descriptors.
    sysret(c_long::from(unsafe { libc::pipe(fds) }))
}

unsafe extern "C" fn sys_clock_gettime(clock: c_int, ts: *mut Timespec) -> c_long {
    // SAFETY: `Timespec` has the layout of the host's `timespec`.
    sysret(c_long::from(unsafe {
        libc::clock_gettime(clock as libc::clockid_t, ts.cast())
    }))
}

unsafe extern "C" fn sys_nanosleep(req: *const Timespec, rem: *mut Timespec) -> c_long {
    // SAFETY: as above.
    sysret(c_long::from(unsafe { libc::nanosleep(req.cast(), rem.cast()) }))
}

unsafe extern "C" fn sys_mmap(
    addr: *mut c_void,
    len: usize,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    off: i64,
) -> c_long {
    // SAFETY: the guest manages its own address space.
    let p = unsafe { libc::mmap(addr, len, prot, flags, fd, off as libc::off_t) };
    if p == libc::MAP_FAILED {
        -c_long::from(Errno::last_raw())
    } else {
        p.addr() as c_long
    }
}

unsafe extern "C" fn thread_create(
    thread: *mut *mut c_void,
    attr: *const c_void,
    start: ThreadStart,
    arg: *mut c_void,
) -> c_int {
    // SAFETY: a thread handle fits in a pointer on every supported host, and the start routine
    // has the signature the host expects.
    unsafe {
        libc::pthread_create(
            thread.cast(),
            attr.cast(),
            core::mem::transmute::<ThreadStart, extern "C" fn(*mut c_void) -> *mut c_void>(start),
            arg,
        )
    }
}

unsafe extern "C" fn thread_exit(value: *mut c_void) -> ! {
    // SAFETY: called on a guest thread.
    unsafe { libc::pthread_exit(value) }
}

unsafe extern "C" fn thread_kill(thread: *mut c_void, sig: c_int) -> c_int {
    // SAFETY: `thread` came from `thread_create`.
    unsafe { libc::pthread_kill(thread as libc::pthread_t, sig) }
}

unsafe extern "C" fn thread_sigmask(how: c_int, set: *const c_void, old: *mut c_void) -> c_int {
    // SAFETY: the guest passes host signal sets.
    unsafe { libc::pthread_sigmask(how, set.cast(), old.cast()) }
}

unsafe extern "C" fn thread_setname(name: *const c_char) -> c_int {
    cfg_if::cfg_if! {
        if #[cfg(target_vendor = "apple")] {
            // SAFETY: `name` is a C string; Apple names only the calling thread.
            unsafe { libc::pthread_setname_np(name) }
        } else {
            // SAFETY: `name` is a C string.
            unsafe { libc::pthread_setname_np(libc::pthread_self(), name) }
        }
    }
}

/// The capability table for this host.
#[must_use]
pub fn syslib() -> Syslib {
    let mut lib = Syslib {
        fork: Some(sys_fork),
        pipe: Some(sys_pipe),
        clock_gettime: Some(sys_clock_gettime),
        nanosleep: Some(sys_nanosleep),
        mmap: Some(sys_mmap),
        jit_write_protect_supported: Some(jit::write_protect_unsupported),
        jit_write_protect: Some(jit::write_protect),
        thread_create: Some(thread_create),
        thread_exit: Some(thread_exit),
        thread_kill: Some(thread_kill),
        thread_sigmask: Some(thread_sigmask),
        thread_setname: Some(thread_setname),
        ..Syslib::EMPTY
    };
    add_apple_services(&mut lib);
    tracing::debug!(magic = lib.magic, version = lib.version, "capability table ready");
    lib
}

#[cfg(target_vendor = "apple")]
fn add_apple_services(lib: &mut Syslib) {
    lib.jit_write_protect_supported = Some(darwin::pthread_jit_write_protect_supported_np);
    lib.icache_invalidate = Some(darwin::sys_icache_invalidate);
    lib.semaphore_create = Some(darwin::dispatch_semaphore_create);
    lib.semaphore_signal = Some(darwin::dispatch_semaphore_signal);
    lib.semaphore_wait = Some(darwin::dispatch_semaphore_wait);
    lib.walltime = Some(darwin::dispatch_walltime);
}

#[cfg(not(target_vendor = "apple"))]
fn add_apple_services(_lib: &mut Syslib) {}

/// Identity of the loader process, as reported to the guest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub euid: u32,
    pub gid: u32,
    pub egid: u32,
    /// The process runs with privileges it did not inherit from its caller.
    pub secure: bool,
}

impl Credentials {
    #[must_use]
    pub fn current() -> Self {
        let uid = nix::unistd::getuid().as_raw();
        let euid = nix::unistd::geteuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        let egid = nix::unistd::getegid().as_raw();
        Self {
            uid,
            euid,
            gid,
            egid,
            secure: is_setugid(),
        }
    }
}

fn is_setugid() -> bool {
    cfg_if::cfg_if! {
        if #[cfg(any(
            target_vendor = "apple",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd"
        ))] {
            // SAFETY: no preconditions.
            unsafe { libc::issetugid() != 0 }
        } else if #[cfg(target_os = "linux")] {
            // SAFETY: no preconditions.
            unsafe { libc::getauxval(libc::AT_SECURE) != 0 }
        } else {
            nix::unistd::getuid() != nix::unistd::geteuid()
                || nix::unistd::getgid() != nix::unistd::getegid()
        }
    }
}
