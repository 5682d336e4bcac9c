// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host-independent pieces of the APE loader.
//!
//! Everything in this crate runs before the guest program exists, on buffers the loader owns, so
//! it is `no_std` and never allocates. The host-facing halves (file access, memory mapping,
//! capability forwarding) live in `ape_loader_platform_userland`; this crate only describes them
//! through traits.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod auxv;
pub mod classify;
pub mod consts;
pub mod elf;
pub mod primitives;
pub mod search;
pub mod segments;
pub mod stack;
pub mod syslib;

#[cfg(test)]
mod testutil;
