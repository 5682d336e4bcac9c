// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use ape_loader_common::segments::{MapError, SegmentError};
use ape_loader_common::stack::ArgBlockError;
use ape_loader_platform_userland::diag;
use nix::errno::Errno;
use thiserror::Error;

/// Everything that stops the loader.
///
/// The messages are the ones users see after the [`Subject`].
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("getentropy")]
    Entropy(#[source] Errno),
    #[error("stack mmap")]
    StackMap(#[source] Errno),
    #[error("loader state does not fit in the stack mapping")]
    StateDoesNotFit,
    #[error(transparent)]
    ArgBlock(#[from] ArgBlockError),
    #[error("not found (maybe chmod +x)")]
    NotFound,
    #[error("open")]
    Open(#[source] Errno),
    #[error("read")]
    Read(#[source] Errno),
    #[error("too small")]
    TooSmall,
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Map(#[from] MapError<Errno>),
    #[error("Not an acceptable APE/ELF executable for AARCH64")]
    NotAcceptable,
    #[error("cannot run AARCH64 code on this host architecture")]
    UnsupportedHost,
}

impl LoaderError {
    /// The host error to report alongside the message, if any.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            LoaderError::Entropy(e)
            | LoaderError::StackMap(e)
            | LoaderError::Open(e)
            | LoaderError::Read(e) => Some(*e),
            LoaderError::Map(e) => Some(*e.source_error()),
            _ => None,
        }
    }
}

/// What a failure happened to: the loader itself, the program name, or the program file.
///
/// Attached to errors as [`anyhow::Context`] and shown before the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject(pub Vec<u8>);

impl Subject {
    #[must_use]
    pub fn new(name: &[u8]) -> Self {
        Self(name.to_vec())
    }
}

impl core::fmt::Display for Subject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// How a failure is reported to the user.
#[derive(Debug, PartialEq, Eq)]
pub enum Diagnosis {
    /// The command line names no program.
    Usage,
    /// One `ape error:` line, then exit.
    Fatal {
        subject: Vec<u8>,
        errno: Option<Errno>,
        message: String,
    },
}

/// Reads the [`Subject`] and the [`LoaderError`] back out of a failure.
#[must_use]
pub fn diagnose(err: &anyhow::Error) -> Diagnosis {
    let error = err.downcast_ref::<LoaderError>();
    if matches!(error, Some(LoaderError::ArgBlock(ArgBlockError::Usage))) {
        return Diagnosis::Usage;
    }
    let subject = err
        .downcast_ref::<Subject>()
        .map_or_else(|| b"ape-loader".to_vec(), |subject| subject.0.clone());
    // The host error rides along as `errno`, so it is not part of the message.
    let message = error.map_or_else(|| err.root_cause().to_string(), ToString::to_string);
    Diagnosis::Fatal {
        subject,
        errno: error.and_then(LoaderError::errno),
        message,
    }
}

/// Reports `err` on standard error and exits without unwinding.
pub fn exit(err: &anyhow::Error) -> ! {
    match diagnose(err) {
        Diagnosis::Usage => diag::usage(),
        Diagnosis::Fatal {
            subject,
            errno,
            message,
        } => diag::pexit(&subject, errno, message.as_bytes()),
    }
}
