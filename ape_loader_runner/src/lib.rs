// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Loads an Actually Portable Executable, or a plain static AArch64 ELF, into this process and
//! runs it.

use core::convert::Infallible;
use std::ffi::OsString;
use std::os::fd::AsFd as _;
use std::os::unix::ffi::{OsStrExt as _, OsStringExt as _};

use anyhow::{Context as _, Result};
use ape_loader_common::auxv::AuxValues;
use ape_loader_common::classify::{accept_header, candidates, read_program_headers};
use ape_loader_common::consts::{ENTROPY_BYTES, RANDOM_BYTES, STACK_HINT_BASE, STACK_SIZE};
use ape_loader_common::elf::{ENDIAN, Phdr};
use ape_loader_common::search::PathSearcher;
use ape_loader_common::segments::LoadPlan;
use ape_loader_common::stack::ArgBlock;
use ape_loader_common::syslib::Syslib;
use ape_loader_platform_userland::entropy;
use ape_loader_platform_userland::host::{self, Credentials};
use ape_loader_platform_userland::mm::{self, FixedMapper};
use clap::Parser;
use tracing::{debug, trace};
use zeroize::Zeroize as _;

pub mod error;
pub mod fs;
pub mod logging;
pub mod state;
pub mod transfer;

use error::{LoaderError, Subject};
use fs::{HostAccess, HostFile};
use state::LoaderState;

/// Run Actually Portable Executables on AArch64 hosts
///
/// `PROG` is looked up along `PATH` like a shell would, trying a `.com` suffix too.
#[derive(Parser, Debug)]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct CliArgs {
    /// How the loader itself was invoked.
    #[arg(skip)]
    pub loader: OsString,
    /// The program and its arguments; `- PROG ARGV0 ...` also chooses the program's `argv[0]`
    ///
    /// In the `-` form `PROG` only names the file to load and is not part of the program's argv.
    #[arg(
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "PROG"
    )]
    pub program_and_arguments: Vec<OsString>,
}

impl CliArgs {
    /// Parses a full command line, `argv[0]` included, keeping every later token as is.
    ///
    /// An escape is slipped in after `argv[0]` so that no token, not even `--`, is taken as an
    /// option.
    pub fn parse_verbatim<I>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut args = args.into_iter();
        let loader = args.next().unwrap_or_default();
        let mut cli_args = Self::try_parse_from(
            [loader.clone(), OsString::from("--")].into_iter().chain(args),
        )?;
        cli_args.loader = loader;
        Ok(cli_args)
    }

    /// The command line as the program's argument block starts out.
    pub fn argv(&self) -> impl Iterator<Item = &OsString> {
        core::iter::once(&self.loader).chain(&self.program_and_arguments)
    }
}

/// The environment as `KEY=VALUE` strings, in host order.
fn environment() -> Vec<Vec<u8>> {
    std::env::vars_os()
        .map(|(key, value)| {
            let mut var = key.into_vec();
            var.push(b'=');
            var.extend_from_slice(value.as_bytes());
            var
        })
        .collect()
}

/// Copies the `AT_RANDOM` bytes out of the entropy seed and wipes the seed.
fn install_random(random: &mut [u8; RANDOM_BYTES], seed: &mut [u8; ENTROPY_BYTES]) {
    random.copy_from_slice(&seed[..RANDOM_BYTES]);
    seed.zeroize();
}

/// Loads the program named by `cli_args` and transfers control to it.
///
/// Only returns on failure. The caller is expected to report the failure with [`error::exit`],
/// since by then the process may be in no state to unwind.
pub fn run(cli_args: &CliArgs) -> Result<Infallible> {
    let envp = environment();
    let loader = cli_args.loader.as_bytes();

    let mut rando = [0u8; ENTROPY_BYTES];
    entropy::fill(&mut rando)
        .map_err(LoaderError::Entropy)
        .with_context(|| Subject::new(loader))?;
    let hint = STACK_HINT_BASE | (usize::from(rando[ENTROPY_BYTES - 1]) << 32);
    let stack = mm::map_stack(hint, STACK_SIZE)
        .map_err(LoaderError::StackMap)
        .with_context(|| Subject::new(loader))?;
    // SAFETY: the mapping is fresh, zero-filled, and stays for the life of the process.
    let state =
        unsafe { LoaderState::place(stack, STACK_SIZE) }.with_context(|| Subject::new(loader))?;
    state.lib = host::syslib();

    let mut block = ArgBlock::build(
        &mut state.argblock,
        cli_args.argv().map(|arg| arg.as_bytes()),
        envp.iter().map(Vec::as_slice),
    )
    .map_err(LoaderError::from)
    .with_context(|| Subject::new(loader))?;
    let execfn = block.execfn_addr();
    block
        .shift_loader_args()
        .map_err(LoaderError::from)
        .with_context(|| Subject::new(loader))?;
    debug!(argc = block.argc(), "arguments copied");

    let prog = block.program().to_vec();
    let exe = PathSearcher::new(&prog, block.getenv(b"PATH"))
        .commandv(&mut HostAccess)
        .ok_or(LoaderError::NotFound)
        .with_context(|| Subject::new(&prog))?;
    let exe = exe.as_bytes();
    debug!(exe = %String::from_utf8_lossy(exe), "resolved");

    let mut file = HostFile::open(exe).with_context(|| Subject::new(exe))?;
    file.read_header(&mut state.ehdr).with_context(|| Subject::new(exe))?;
    if block
        .resolve_argv0(exe)
        .map_err(LoaderError::from)
        .with_context(|| Subject::new(exe))?
    {
        trace!("argv[0] now names the resolved path");
    }
    let mut block = block
        .finalize()
        .map_err(LoaderError::from)
        .with_context(|| Subject::new(exe))?;

    install_random(&mut state.rando, &mut rando);

    let creds = Credentials::current();
    let phdr_addr = state.phdr.0.as_ptr().addr() as u64;
    let random_addr = state.rando.as_ptr().addr() as u64;
    for candidate in candidates(&state.ehdr) {
        let ehdr = match accept_header(candidate.bytes()) {
            Ok(ehdr) => ehdr,
            Err(err) => {
                trace!(%err, "header rejected");
                continue;
            }
        };
        let phdrs = match read_program_headers(ehdr, &mut file, &mut state.phdr.0) {
            Ok(phdrs) => phdrs,
            Err(err) => {
                debug!(%err, "program headers unusable");
                continue;
            }
        };
        let entry = ehdr.e_entry.get(ENDIAN);
        debug!(
            phnum = phdrs.len(),
            entry = format_args!("{entry:#x}"),
            "header accepted"
        );
        let aux = AuxValues {
            phdr: phdr_addr,
            phnum: phdrs.len() as u64,
            entry,
            uid: creds.uid.into(),
            euid: creds.euid.into(),
            gid: creds.gid.into(),
            egid: creds.egid.into(),
            secure: creds.secure.into(),
            random: random_addr,
            execfn,
        };
        block.write_auxv(&aux.entries());
        return spawn(exe, file, phdrs, entry, block.stack_pointer(), &state.lib);
    }
    Err(LoaderError::NotAcceptable).with_context(|| Subject::new(exe))
}

/// Maps the program described by `phdrs` and jumps to it.
fn spawn(
    exe: &[u8],
    file: HostFile,
    phdrs: &[Phdr],
    entry: u64,
    sp: u64,
    lib: &Syslib,
) -> Result<Infallible> {
    let subject = || Subject::new(exe);
    let plan = LoadPlan::new(phdrs)
        .map_err(LoaderError::from)
        .with_context(subject)?;
    debug!(
        segments = plan.segments().len(),
        code = format_args!("{:#x}", plan.code_segment().vaddr),
        "segments validated"
    );
    transfer::ensure_supported_host().with_context(subject)?;
    // SAFETY: from here on the program owns the address ranges it asked for.
    unsafe { plan.map(&mut FixedMapper::new(file.as_fd())) }
        .map_err(LoaderError::from)
        .with_context(subject)?;
    drop(file);
    // SAFETY: the block at `sp` is complete, the segments are mapped, and `lib` lives in the
    // loader state, which is never unmapped.
    unsafe { transfer::transfer(sp, core::ptr::from_ref(lib), entry) }.with_context(subject)
}
