// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! String and memory helpers that work on borrowed byte buffers.
//!
//! C strings here are byte slices that end at the first NUL, or at the end of the slice if there
//! is none. None of these helpers allocate or touch any runtime state, so they are usable before
//! anything else in the process has been set up.

/// Length of the C string at the start of `s`.
#[must_use]
pub fn strlen(s: &[u8]) -> usize {
    s.iter().position(|&c| c == 0).unwrap_or(s.len())
}

/// The C string at the start of `s`, without its terminator.
#[must_use]
pub fn cstr(s: &[u8]) -> &[u8] {
    &s[..strlen(s)]
}

/// Compares two C strings byte-wise, returning a negative, zero, or positive value.
#[must_use]
pub fn strcmp(l: &[u8], r: &[u8]) -> i32 {
    let at = |s: &[u8], i: usize| s.get(i).copied().unwrap_or(0);
    let mut i = 0;
    while at(l, i) == at(r, i) && at(r, i) != 0 {
        i += 1;
    }
    i32::from(at(l, i)) - i32::from(at(r, i))
}

/// ASCII-only lowercase.
#[must_use]
pub const fn to_lower(c: u8) -> u8 {
    if c.is_ascii_uppercase() { c + (b'a' - b'A') } else { c }
}

/// Whether `p` ends with `suffix`, comparing `p` case-insensitively.
///
/// `suffix` must already be lowercase.
#[must_use]
pub fn ends_with_ignore_case(p: &[u8], suffix: &[u8]) -> bool {
    p.len() >= suffix.len()
        && p[p.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(&a, &b)| to_lower(a) == b)
}

/// Fills `d` with `c`.
pub fn memset(d: &mut [u8], c: u8) {
    for b in d {
        *b = c;
    }
}

/// Copies `n` bytes from offset `src` to offset `dst` within `buf`.
///
/// The regions may overlap; the copy direction is picked from their relative position so that no
/// source byte is overwritten before it is read.
///
/// # Panics
///
/// Panics if either region extends past the end of `buf`.
pub fn memmove(buf: &mut [u8], dst: usize, src: usize, n: usize) {
    assert!(dst + n <= buf.len() && src + n <= buf.len());
    if dst > src {
        for i in (0..n).rev() {
            buf[dst + i] = buf[src + i];
        }
    } else {
        for i in 0..n {
            buf[dst + i] = buf[src + i];
        }
    }
}

/// Offset of the first `c` in `s`.
#[must_use]
pub fn memchr(s: &[u8], c: u8) -> Option<usize> {
    s.iter().position(|&b| b == c)
}

/// Looks up `name` in a list of `KEY=value` entries, returning the value of the first match.
#[must_use]
pub fn getenv<'a>(envp: impl IntoIterator<Item = &'a [u8]>, name: &[u8]) -> Option<&'a [u8]> {
    envp.into_iter().find_map(|entry| {
        let entry = cstr(entry);
        entry
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(b"="))
    })
}

/// Buffer large enough for any `u64`/`i64` in decimal plus a NUL terminator.
pub type DecimalBuf = [u8; 21];

/// Writes `x` in decimal followed by a NUL, returning the number of digits written.
pub fn utoa(p: &mut DecimalBuf, x: u64) -> usize {
    utoa_into(p, x)
}

/// Writes `x` in decimal (with a leading `-` when negative) followed by a NUL, returning the
/// number of characters written.
pub fn itoa(p: &mut DecimalBuf, x: i64) -> usize {
    if x < 0 {
        p[0] = b'-';
        1 + utoa_into(&mut p[1..], x.unsigned_abs())
    } else {
        utoa_into(p, x.unsigned_abs())
    }
}

// Digits are produced least-significant first and then reversed in place.
fn utoa_into(p: &mut [u8], mut x: u64) -> usize {
    let mut i = 0;
    loop {
        p[i] = b'0' + u8::try_from(x % 10).unwrap_or_default();
        i += 1;
        x /= 10;
        if x == 0 {
            break;
        }
    }
    p[i] = 0;
    p[..i].reverse();
    i
}

/// Reads a little-endian `u32` from the first four bytes of `s`, if there are that many.
#[must_use]
pub fn read32_le(s: &[u8]) -> Option<u32> {
    Some(u32::from_le_bytes(s.get(..4)?.try_into().ok()?))
}

/// Reads a little-endian `u64` from the first eight bytes of `s`, if there are that many.
#[must_use]
pub fn read64_le(s: &[u8]) -> Option<u64> {
    Some(u64::from_le_bytes(s.get(..8)?.try_into().ok()?))
}

/// Rounds `x` up to a multiple of the power of two `k`.
#[must_use]
pub const fn round_up(x: u64, k: u64) -> u64 {
    debug_assert!(k.is_power_of_two());
    x.wrapping_add(k - 1) & !(k - 1)
}

/// Rounds `x` down to a multiple of the power of two `k`.
#[must_use]
pub const fn round_down(x: usize, k: usize) -> usize {
    debug_assert!(k.is_power_of_two());
    x & !(k - 1)
}
