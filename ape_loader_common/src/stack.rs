// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The argument block the guest finds at its initial stack pointer.
//!
//! The block is built inside an arena the caller owns (it ends up at the top of the guest stack
//! mapping). Pointer words grow up from the bottom of the arena and string bytes grow down from
//! the top:
//!
//! ```text
//! arena start                                                        arena end
//! | argc | argv... | 0 | envp... | 0 |  ...free...  | strings (last pushed first) |
//! ```
//!
//! Every pointer word holds an absolute address inside the arena, so the words can be handed to
//! the guest unchanged. [`ArgBlock::finalize`] moves the words up against the strings, leaving
//! room for the auxiliary vector right after them, and aligns the result for the guest's stack
//! pointer.

use thiserror::Error;

use crate::auxv::{AUXV_BYTES, AUXV_ENTRIES, AuxEntry};
use crate::consts::STACK_ALIGN;
use crate::primitives::{cstr, getenv, memmove, round_down, strcmp};

const WORD: usize = size_of::<u64>();

/// Errors building the argument block.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArgBlockError {
    #[error("argument arena is not {STACK_ALIGN}-byte aligned")]
    Misaligned,
    #[error("arguments and environment do not fit in the argument arena")]
    TooBig,
    #[error("no program named on the command line")]
    Usage,
}

/// An argument block under construction.
pub struct ArgBlock<'a> {
    arena: &'a mut [u8],
    base: u64,
    /// Word index of the current `argc`.
    sp: usize,
    /// Word index one past the environment terminator.
    bp: usize,
    /// Byte offset of the lowest string byte.
    tp: usize,
    /// Address of the program name picked by [`ArgBlock::shift_loader_args`].
    prog: u64,
}

impl<'a> ArgBlock<'a> {
    /// Copies the host's arguments and environment into `arena`.
    ///
    /// Strings are copied back to front in the order given, each with its terminator.
    pub fn build<'s>(
        arena: &'a mut [u8],
        argv: impl IntoIterator<Item = &'s [u8]>,
        envp: impl IntoIterator<Item = &'s [u8]>,
    ) -> Result<Self, ArgBlockError> {
        let base = arena.as_ptr().addr();
        if base % STACK_ALIGN != 0 {
            return Err(ArgBlockError::Misaligned);
        }
        let tp = arena.len();
        let mut block = Self {
            arena,
            base: base as u64,
            sp: 0,
            bp: 0,
            tp,
            prog: 0,
        };
        block.push_word(0)?;
        let mut argc = 0u64;
        for arg in argv {
            let addr = block.push_string(arg)?;
            block.push_word(addr)?;
            argc += 1;
        }
        block.push_word(0)?;
        for var in envp {
            let addr = block.push_string(var)?;
            block.push_word(addr)?;
        }
        block.push_word(0)?;
        block.write_word(0, argc);
        Ok(block)
    }

    fn push_word(&mut self, value: u64) -> Result<(), ArgBlockError> {
        if (self.bp + 1) * WORD > self.tp {
            return Err(ArgBlockError::TooBig);
        }
        self.write_word(self.bp, value);
        self.bp += 1;
        Ok(())
    }

    /// Copies `s` up to its first NUL, plus a terminator, below the existing strings.
    fn push_string(&mut self, s: &[u8]) -> Result<u64, ArgBlockError> {
        let s = cstr(s);
        let n = s.len() + 1;
        let floor = (self.bp + 1) * WORD;
        if self.tp < floor + n {
            return Err(ArgBlockError::TooBig);
        }
        self.tp -= n;
        self.arena[self.tp..self.tp + s.len()].copy_from_slice(s);
        self.arena[self.tp + s.len()] = 0;
        Ok(self.base + self.tp as u64)
    }

    fn write_word(&mut self, index: usize, value: u64) {
        self.arena[index * WORD..(index + 1) * WORD].copy_from_slice(&value.to_ne_bytes());
    }

    fn word(&self, index: usize) -> u64 {
        read_word(self.arena, index * WORD)
    }

    fn string_at(&self, addr: u64) -> &[u8] {
        string_at(self.arena, self.base, addr)
    }

    /// Current argument count.
    #[must_use]
    pub fn argc(&self) -> usize {
        usize::try_from(self.word(self.sp)).unwrap_or(usize::MAX)
    }

    /// Current arguments, without terminators.
    pub fn argv(&self) -> impl Iterator<Item = &[u8]> {
        let first = self.sp + 1;
        (first..first + self.argc()).map(|i| self.string_at(self.word(i)))
    }

    /// Environment entries, without terminators.
    pub fn envp(&self) -> impl Iterator<Item = &[u8]> {
        let first = self.sp + 1 + self.argc() + 1;
        (first..self.bp)
            .map(|i| self.word(i))
            .take_while(|&addr| addr != 0)
            .map(|addr| self.string_at(addr))
    }

    /// Value of the environment variable `name`.
    #[must_use]
    pub fn getenv(&self, name: &[u8]) -> Option<&[u8]> {
        getenv(self.envp(), name)
    }

    /// Address of the program file name the host reported: the value of the first `_=` entry,
    /// else `argv[0]`, else zero.
    ///
    /// Only meaningful before [`ArgBlock::shift_loader_args`].
    #[must_use]
    pub fn execfn_addr(&self) -> u64 {
        let first_env = self.sp + 1 + self.argc() + 1;
        let from_env = (first_env..self.bp)
            .map(|i| self.word(i))
            .take_while(|&addr| addr != 0)
            .find(|&addr| self.string_at(addr).starts_with(b"_="));
        match from_env {
            Some(addr) => addr + 2,
            None if self.argc() > 0 => self.word(self.sp + 1),
            None => 0,
        }
    }

    /// Drops the loader's own arguments so that the block describes the guest's command line.
    ///
    /// `loader - PROG ARGV0 ARGV1...` runs `PROG` with arguments `ARGV0 ARGV1...`, which lets the
    /// caller pick or omit `argv[0]`. `PROG` itself is not part of the guest's arguments in that
    /// form. `loader PROG ARGV1...` runs `PROG` with arguments `PROG ARGV1...`.
    pub fn shift_loader_args(&mut self) -> Result<(), ArgBlockError> {
        let argc = self.argc();
        let hyphen = argc >= 3 && strcmp(self.string_at(self.word(self.sp + 2)), b"-") == 0;
        let (prog_index, drop) = if hyphen {
            (3, 3)
        } else if argc < 2 {
            return Err(ArgBlockError::Usage);
        } else {
            (2, 1)
        };
        self.prog = self.word(self.sp + prog_index);
        self.sp += drop;
        self.write_word(self.sp, (argc - drop) as u64);
        Ok(())
    }

    /// The program to run, as picked by [`ArgBlock::shift_loader_args`].
    #[must_use]
    pub fn program(&self) -> &[u8] {
        self.string_at(self.prog)
    }

    /// Points `argv[0]` at the resolved path when the program was found through a search.
    ///
    /// This happens only when the program name is not absolute, the resolved path is, and the
    /// guest's `argv[0]` is the program name. Returns whether `argv[0]` changed.
    pub fn resolve_argv0(&mut self, exe: &[u8]) -> Result<bool, ArgBlockError> {
        let exe = cstr(exe);
        let prog = self.program();
        if self.argc() == 0
            || prog.first() == Some(&b'/')
            || exe.first() != Some(&b'/')
            || strcmp(prog, self.string_at(self.word(self.sp + 1))) != 0
        {
            return Ok(false);
        }
        let addr = self.push_string(exe)?;
        self.write_word(self.sp + 1, addr);
        Ok(true)
    }

    /// Moves the pointer words up against the strings, leaving [`AUXV_BYTES`] between them, and
    /// aligns the start to [`STACK_ALIGN`].
    pub fn finalize(self) -> Result<FinalBlock<'a>, ArgBlockError> {
        let words = self.bp - self.sp;
        let top = self.tp.checked_sub(AUXV_BYTES).ok_or(ArgBlockError::TooBig)?;
        let ip = round_down(top, WORD)
            .checked_sub(words * WORD)
            .map(|ip| round_down(ip, STACK_ALIGN))
            .ok_or(ArgBlockError::TooBig)?;
        memmove(self.arena, ip, self.sp * WORD, words * WORD);
        Ok(FinalBlock {
            arena: self.arena,
            base: self.base,
            sp: ip,
            words,
        })
    }
}

/// The argument block in its final position, ready for the auxiliary vector.
pub struct FinalBlock<'a> {
    arena: &'a mut [u8],
    base: u64,
    /// Byte offset of `argc`.
    sp: usize,
    words: usize,
}

impl FinalBlock<'_> {
    /// The guest's initial stack pointer.
    #[must_use]
    pub fn stack_pointer(&self) -> u64 {
        self.base + self.sp as u64
    }

    fn auxv_offset(&self) -> usize {
        self.sp + self.words * WORD
    }

    /// Writes the auxiliary vector directly after the environment terminator.
    pub fn write_auxv(&mut self, entries: &[AuxEntry; AUXV_ENTRIES]) {
        let mut at = self.auxv_offset();
        for value in entries.iter().flatten() {
            self.arena[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
            at += WORD;
        }
    }

    /// Reads the auxiliary vector back.
    #[must_use]
    pub fn auxv(&self) -> [AuxEntry; AUXV_ENTRIES] {
        let at = self.auxv_offset();
        core::array::from_fn(|i| {
            let entry = at + i * 2 * WORD;
            [read_word(self.arena, entry), read_word(self.arena, entry + WORD)]
        })
    }

    #[must_use]
    pub fn argc(&self) -> usize {
        usize::try_from(read_word(self.arena, self.sp)).unwrap_or(usize::MAX)
    }

    /// The guest's arguments, without terminators.
    pub fn argv(&self) -> impl Iterator<Item = &[u8]> {
        (1..=self.argc()).map(|i| {
            string_at(self.arena, self.base, read_word(self.arena, self.sp + i * WORD))
        })
    }
}

fn read_word(arena: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; WORD];
    bytes.copy_from_slice(&arena[offset..offset + WORD]);
    u64::from_ne_bytes(bytes)
}

fn string_at(arena: &[u8], base: u64, addr: u64) -> &[u8] {
    addr.checked_sub(base)
        .and_then(|off| usize::try_from(off).ok())
        .and_then(|off| arena.get(off..))
        .map_or(&[][..], cstr)
}
