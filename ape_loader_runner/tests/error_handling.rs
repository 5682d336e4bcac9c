// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The loader refuses bad command lines and bad programs with one line on standard error.
//!
//! Every program here is rejected before anything is mapped, so these run on any host.

mod common;

use common::{Segment, aarch64_elf, assert_fatal, install, plain_elf, run_loader, stderr_of};
use object::elf::{EM_X86_64, PF_R, PF_W, PF_X, PT_DYNAMIC};

#[test]
fn test_missing_program_prints_usage() {
    let output = run_loader::<[&str; 0], &str>([]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = stderr_of(&output);
    assert!(stderr.starts_with("usage: "), "Stderr: {stderr}");
    assert!(!stderr.contains("ape error"), "Stderr: {stderr}");
}

#[test]
fn test_hyphen_without_program_is_not_found() {
    let output = run_loader(["-"]);
    assert_eq!(output.status.code(), Some(127));
    assert_eq!(stderr_of(&output), "ape error: -: not found (maybe chmod +x)\n");
}

#[test]
fn test_nonexistent_program_is_not_found() {
    let output = run_loader(["/nonexistent/path/to/program"]);
    assert_eq!(output.status.code(), Some(127));
    assert_eq!(
        stderr_of(&output),
        "ape error: /nonexistent/path/to/program: not found (maybe chmod +x)\n"
    );
}

#[test]
fn test_short_file_is_too_small() {
    let dir = tempfile::tempdir().unwrap();
    let prog = install(dir.path(), "tiny", &[0x7f; 100]);
    assert_fatal(&run_loader([&prog]), &prog, "too small");
}

#[test]
fn test_garbage_is_not_acceptable() {
    let dir = tempfile::tempdir().unwrap();
    let prog = install(dir.path(), "garbage", &[0x5a; 0x2000]);
    assert_fatal(
        &run_loader([&prog]),
        &prog,
        "Not an acceptable APE/ELF executable for AARCH64",
    );
}

#[test]
fn test_wrong_machine_is_not_acceptable() {
    let dir = tempfile::tempdir().unwrap();
    let prog = install(dir.path(), "x86", &plain_elf(EM_X86_64, &[Segment::text()]));
    assert_fatal(
        &run_loader([&prog]),
        &prog,
        "Not an acceptable APE/ELF executable for AARCH64",
    );
}

#[test]
fn test_dynamic_program_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let dynamic = Segment {
        kind: PT_DYNAMIC,
        flags: PF_R,
        vaddr: 0x40_0800,
        offset: 0x800,
        filesz: 0x100,
        memsz: 0x100,
    };
    let prog = install(dir.path(), "dyn", &aarch64_elf(&[Segment::text(), dynamic]));
    assert_fatal(&run_loader([&prog]), &prog, "not a real executable");
}

#[test]
fn test_misaligned_segment_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::load(0x40_1000, 0, 0x1000, 0x1000, PF_R | PF_X);
    let prog = install(dir.path(), "misaligned", &aarch64_elf(&[segment]));
    assert_fatal(
        &run_loader([&prog]),
        &prog,
        "APE phdr addr must be 16384-aligned",
    );
}

#[test]
fn test_misaligned_offset_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::load(0x40_0000, 0x1000, 0x1000, 0x1000, PF_R | PF_X);
    let prog = install(dir.path(), "offset", &aarch64_elf(&[segment]));
    assert_fatal(
        &run_loader([&prog]),
        &prog,
        "APE phdr offset must be 16384-aligned",
    );
}

#[test]
fn test_writable_code_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let segment = Segment::load(0x40_0000, 0, 0x1000, 0x1000, PF_R | PF_W | PF_X);
    let prog = install(dir.path(), "rwx", &aarch64_elf(&[segment]));
    assert_fatal(
        &run_loader([&prog]),
        &prog,
        "Apple Silicon doesn't allow RWX memory",
    );
}

#[test]
fn test_program_without_code_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let data = Segment::load(0x40_0000, 0, 0x1000, 0x2000, PF_R | PF_W);
    let prog = install(dir.path(), "data", &aarch64_elf(&[data]));
    assert_fatal(
        &run_loader([&prog]),
        &prog,
        "ELF needs PT_LOAD phdr w/ PF_X",
    );
}

#[test]
fn test_later_segments_are_checked_first() {
    let dir = tempfile::tempdir().unwrap();
    let misaligned = Segment::load(0x40_1000, 0, 0x1000, 0x1000, PF_R | PF_X);
    let rwx = Segment::load(0x80_0000, 0, 0x1000, 0x1000, PF_R | PF_W | PF_X);
    let prog = install(dir.path(), "both", &aarch64_elf(&[misaligned, rwx]));
    assert_fatal(
        &run_loader([&prog]),
        &prog,
        "Apple Silicon doesn't allow RWX memory",
    );
}

#[test]
fn test_guest_flags_are_not_loader_flags() {
    let output = run_loader(["--help"]);
    assert_eq!(output.status.code(), Some(127));
    assert_eq!(stderr_of(&output), "ape error: --help: not found (maybe chmod +x)\n");
}

#[test]
fn test_double_dash_is_a_program_name() {
    let output = run_loader(["--"]);
    assert_eq!(output.status.code(), Some(127));
    assert_eq!(stderr_of(&output), "ape error: --: not found (maybe chmod +x)\n");

    let output = run_loader(["--", "prog", "x"]);
    assert_eq!(output.status.code(), Some(127));
    assert_eq!(stderr_of(&output), "ape error: --: not found (maybe chmod +x)\n");
}
