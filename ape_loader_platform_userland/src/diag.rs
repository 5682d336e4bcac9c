// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Fatal error reporting.
//!
//! These write straight to file descriptor 2 and leave with `_exit`, so they work no matter how
//! much of the process has already been handed to the guest: no buffering, no allocation, no
//! destructors or exit handlers.

use ape_loader_common::consts::{EXIT_FATAL, EXIT_USAGE};
use ape_loader_common::primitives::{DecimalBuf, itoa};
use nix::errno::Errno;

/// Prefix of every loader error line.
pub const ERROR_PREFIX: &[u8] = b"ape error: ";

/// Usage text for a malformed command line.
pub const USAGE: &[u8] = concat!(
    "usage: ape_loader_runner   PROG [ARGV1,ARGV2,...]\n",
    "       ape_loader_runner - PROG [ARGV0,ARGV1,...]\n",
    "actually portable executable loader (apple arm)\n",
)
.as_bytes();

/// Writes all of `s` to standard error, ignoring failures.
pub fn emit(s: &[u8]) {
    let mut rest = s;
    while !rest.is_empty() {
        // SAFETY: `rest` is a valid buffer of the given length.
        let n = unsafe { libc::write(libc::STDERR_FILENO, rest.as_ptr().cast(), rest.len()) };
        match usize::try_from(n) {
            Ok(n) if n > 0 => rest = &rest[n..],
            Err(_) if Errno::last() == Errno::EINTR => {}
            _ => return,
        }
    }
}

/// Reports `ape error: <context>: <message>`, followed by ` failed errno=<n>` when the failure
/// came from the host.
pub fn perror(context: &[u8], errno: Option<Errno>, message: &[u8]) {
    emit(ERROR_PREFIX);
    emit(context);
    emit(b": ");
    emit(message);
    if let Some(errno) = errno {
        let mut digits: DecimalBuf = [0; 21];
        let n = itoa(&mut digits, i64::from(errno as i32));
        emit(b" failed errno=");
        emit(&digits[..n]);
    }
    emit(b"\n");
}

/// [`perror`], then exit with status 127.
pub fn pexit(context: &[u8], errno: Option<Errno>, message: &[u8]) -> ! {
    perror(context, errno, message);
    // SAFETY: `_exit` is always safe to call; it skips every exit handler.
    unsafe { libc::_exit(EXIT_FATAL) }
}

/// Prints the usage text and exits with status 1.
pub fn usage() -> ! {
    emit(USAGE);
    // SAFETY: as above.
    unsafe { libc::_exit(EXIT_USAGE) }
}
