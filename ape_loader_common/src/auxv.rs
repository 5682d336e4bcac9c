// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The auxiliary vector handed to the guest after its environment pointers.

/// Auxiliary vector keys the loader emits.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u64)]
pub enum AuxKey {
    /// end of vector
    AT_NULL = 0,
    /// program headers for program
    AT_PHDR = 3,
    /// size of program header entry
    AT_PHENT = 4,
    /// number of program headers
    AT_PHNUM = 5,
    /// system page size
    AT_PAGESZ = 6,
    /// entry point of program
    AT_ENTRY = 9,
    /// real uid
    AT_UID = 11,
    /// effective uid
    AT_EUID = 12,
    /// real gid
    AT_GID = 13,
    /// effective gid
    AT_EGID = 14,
    /// arch dependent hints at CPU capabilities
    AT_HWCAP = 16,
    /// secure mode boolean
    AT_SECURE = 23,
    /// address of 16 random bytes
    AT_RANDOM = 25,
    /// extension of AT_HWCAP
    AT_HWCAP2 = 26,
    /// filename of program
    AT_EXECFN = 31,
}

/// Number of `(key, value)` pairs, including the terminating `AT_NULL`.
pub const AUXV_ENTRIES: usize = 15;

/// Bytes the auxiliary vector occupies on the guest stack.
pub const AUXV_BYTES: usize = AUXV_ENTRIES * 2 * size_of::<u64>();

/// CPU features advertised to the guest.
pub const HWCAP: u64 = 0xffb3_ffff;

/// Extended CPU features advertised to the guest.
pub const HWCAP2: u64 = 0x181;

/// One auxiliary vector entry as laid out in memory.
pub type AuxEntry = [u64; 2];

/// Everything the auxiliary vector reports, gathered from the loaded program and the host.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuxValues {
    /// Address of the program header table in loader memory.
    pub phdr: u64,
    pub phnum: u64,
    pub entry: u64,
    pub uid: u64,
    pub euid: u64,
    pub gid: u64,
    pub egid: u64,
    /// Non-zero when the loader runs with elevated privileges.
    pub secure: u64,
    /// Address of the 16 random bytes.
    pub random: u64,
    /// Address of the NUL terminated program file name.
    pub execfn: u64,
}

impl AuxValues {
    /// The vector in its fixed order.
    #[must_use]
    pub fn entries(&self) -> [AuxEntry; AUXV_ENTRIES] {
        use crate::consts::PAGE_SIZE;
        use crate::elf::PHDR_SIZE;
        [
            [AuxKey::AT_PHDR as u64, self.phdr],
            [AuxKey::AT_PHENT as u64, PHDR_SIZE as u64],
            [AuxKey::AT_PHNUM as u64, self.phnum],
            [AuxKey::AT_ENTRY as u64, self.entry],
            [AuxKey::AT_PAGESZ as u64, PAGE_SIZE as u64],
            [AuxKey::AT_UID as u64, self.uid],
            [AuxKey::AT_EUID as u64, self.euid],
            [AuxKey::AT_GID as u64, self.gid],
            [AuxKey::AT_EGID as u64, self.egid],
            [AuxKey::AT_HWCAP as u64, HWCAP],
            [AuxKey::AT_HWCAP2 as u64, HWCAP2],
            [AuxKey::AT_SECURE as u64, self.secure],
            [AuxKey::AT_RANDOM as u64, self.random],
            [AuxKey::AT_EXECFN as u64, self.execfn],
            [AuxKey::AT_NULL as u64, 0],
        ]
    }
}
