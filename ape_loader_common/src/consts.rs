// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Sizes and limits shared between the loader crates.

/// Size of the anonymous mapping that becomes the guest's stack.
pub const STACK_SIZE: usize = 8 * 1024 * 1024;

/// Minimum stack alignment of the AArch64 procedure call standard.
pub const STACK_ALIGN: usize = 2 * size_of::<u64>();

/// Capacity of the argument/environment arena (the host's `ARG_MAX`).
pub const ARG_MAX: usize = 1024 * 1024;

/// Bytes read from the front of a candidate file; also the scan window for launcher scripts.
pub const HEADER_BUF_SIZE: usize = 0x1000;

/// Capacity of the program header buffer.
pub const PHDR_BUF_SIZE: usize = 0x1000;

/// Capacity of the resolved path buffer, including the NUL terminator.
pub const PATH_BUF_SIZE: usize = 1024;

/// Page granule of the host. Segment addresses and offsets must be multiples of this.
pub const PAGE_SIZE: usize = 0x4000;

/// Number of random bytes exposed to the guest through `AT_RANDOM`.
pub const RANDOM_BYTES: usize = 16;

/// Bytes of entropy requested at startup. The spare bytes pick the stack placement.
pub const ENTROPY_BYTES: usize = 24;

/// Base of the address hint for the guest stack mapping.
pub const STACK_HINT_BASE: usize = 0x7f00_0000_0000;

/// Exit status for every loader-internal failure.
pub const EXIT_FATAL: i32 = 127;

/// Exit status for a malformed command line.
pub const EXIT_USAGE: i32 = 1;
