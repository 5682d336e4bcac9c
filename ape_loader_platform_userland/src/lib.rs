// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Host side of the APE loader for userland Unix.
//!
//! Everything here talks to the host kernel or its system libraries: fatal reporting, entropy,
//! credentials, fixed-address mappings, the capability table handed to the guest, and the JIT
//! write-protect toggle. Apple-only services are compiled only for Apple targets; elsewhere the
//! matching capability slots stay empty.

// The loader relies on `mmap`, `access` and friends; there is no non-Unix story.
#![cfg(unix)]

pub mod diag;
pub mod entropy;
pub mod host;
pub mod jit;
pub mod mm;
