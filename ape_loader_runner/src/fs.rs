// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The program file, as seen through the host file system.

use core::ffi::CStr;
use std::fs::File;
use std::io::ErrorKind;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt as _;
use std::os::unix::fs::FileExt as _;

use ape_loader_common::classify::ReadAt;
use ape_loader_common::consts::HEADER_BUF_SIZE;
use ape_loader_common::search::AccessCheck;
use nix::errno::Errno;
use nix::unistd::AccessFlags;

use crate::error::LoaderError;

fn errno_of(err: &std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

/// Probes candidate paths for execute permission.
pub struct HostAccess;

impl AccessCheck for HostAccess {
    fn is_executable(&mut self, path: &CStr) -> bool {
        let ok = nix::unistd::access(path, AccessFlags::X_OK).is_ok();
        tracing::trace!(?path, ok, "probe");
        ok
    }
}

/// The open program file.
pub struct HostFile(File);

impl HostFile {
    pub fn open(path: &[u8]) -> Result<Self, LoaderError> {
        let path = std::ffi::OsStr::from_bytes(path);
        File::open(path)
            .map(Self)
            .map_err(|e| LoaderError::Open(errno_of(&e)))
    }

    /// Fills `buf` from the start of the file; a shorter file is [`LoaderError::TooSmall`].
    pub fn read_header(&self, buf: &mut [u8; HEADER_BUF_SIZE]) -> Result<(), LoaderError> {
        self.0.read_exact_at(buf, 0).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => LoaderError::TooSmall,
            _ => LoaderError::Read(errno_of(&e)),
        })
    }
}

impl AsFd for HostFile {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl ReadAt for HostFile {
    type Error = std::io::Error;

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.0.read_exact_at(buf, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::os::unix::ffi::OsStrExt as _;
    use std::os::unix::fs::PermissionsExt as _;

    fn path_bytes(path: &std::path::Path) -> Vec<u8> {
        path.as_os_str().as_bytes().to_vec()
    }

    #[test]
    fn short_files_are_too_small() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1; 100]).unwrap();
        let host = HostFile::open(&path_bytes(file.path())).unwrap();
        let mut buf = [0; HEADER_BUF_SIZE];
        assert!(matches!(host.read_header(&mut buf), Err(LoaderError::TooSmall)));
    }

    #[test]
    fn reads_header_and_ranges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let contents: Vec<u8> = (0..2 * HEADER_BUF_SIZE).map(|i| i as u8).collect();
        file.write_all(&contents).unwrap();
        let mut host = HostFile::open(&path_bytes(file.path())).unwrap();
        let mut buf = [0; HEADER_BUF_SIZE];
        host.read_header(&mut buf).unwrap();
        assert_eq!(buf[..], contents[..HEADER_BUF_SIZE]);
        let mut range = [0; 8];
        host.read_at(5000, &mut range).unwrap();
        assert_eq!(range[..], contents[5000..5008]);
        assert!(host.read_at(2 * HEADER_BUF_SIZE as u64 - 4, &mut range).is_err());
    }

    #[test]
    fn missing_files_report_errno() {
        let dir = tempfile::tempdir().unwrap();
        let err = HostFile::open(&path_bytes(&dir.path().join("nope"))).err().unwrap();
        assert_eq!(err.errno(), Some(Errno::ENOENT));
    }

    #[test]
    fn access_requires_execute_permission() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = std::ffi::CString::new(path_bytes(file.path())).unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!HostAccess.is_executable(&path));
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(HostAccess.is_executable(&path));
    }
}
