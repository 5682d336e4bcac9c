// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Startup randomness.

use nix::errno::Errno;

/// Most bytes a single `getentropy` call may return.
pub const GETENTROPY_MAX: usize = 256;

/// Fills `buf` with bytes from the host's entropy source.
pub fn fill(buf: &mut [u8]) -> Result<(), Errno> {
    for chunk in buf.chunks_mut(GETENTROPY_MAX) {
        // SAFETY: `chunk` is a valid, writable buffer of the given length.
        let rc = unsafe { libc::getentropy(chunk.as_mut_ptr().cast(), chunk.len()) };
        Errno::result(rc)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_large_buffers() {
        let mut buf = [0u8; 600];
        fill(&mut buf).unwrap();
        // 600 zero bytes from a working entropy source is not a realistic outcome
        assert!(buf.iter().any(|&b| b != 0));
    }
}
