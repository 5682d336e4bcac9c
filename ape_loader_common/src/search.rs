// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Resolving a command name to an executable path, the way a shell would.

use core::ffi::CStr;

use crate::consts::PATH_BUF_SIZE;
use crate::primitives::{cstr, ends_with_ignore_case, memchr};

/// Search path used when the environment has no `PATH`.
pub const DEFAULT_SEARCH_PATH: &[u8] = b"/bin:/usr/local/bin:/usr/bin";

/// Suffix tried on a second pass for names that do not already carry one.
pub const COM_SUFFIX: &[u8] = b".com";

const COM_PATH_SUFFIXES: [&[u8]; 3] = [b".com", b".exe", b".com.dbg"];

/// Decides whether a candidate path names something the caller may execute.
pub trait AccessCheck {
    fn is_executable(&mut self, path: &CStr) -> bool;
}

impl<F: FnMut(&CStr) -> bool> AccessCheck for F {
    fn is_executable(&mut self, path: &CStr) -> bool {
        self(path)
    }
}

/// A successfully resolved path, NUL terminated inside a fixed buffer.
#[derive(Clone)]
pub struct ResolvedPath {
    buf: [u8; PATH_BUF_SIZE],
    len: usize,
}

impl ResolvedPath {
    /// The path without its terminator.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// The path including its terminator.
    #[must_use]
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf[..=self.len]
    }

    #[must_use]
    pub fn as_c_str(&self) -> &CStr {
        // `len` is always the offset of the terminator written by the searcher.
        CStr::from_bytes_until_nul(&self.buf).unwrap_or_default()
    }
}

impl core::fmt::Debug for ResolvedPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("ResolvedPath")
            .field(&self.as_c_str())
            .finish()
    }
}

/// Transient state of one command lookup.
pub struct PathSearcher<'a> {
    name: &'a [u8],
    syspath: &'a [u8],
    path: [u8; PATH_BUF_SIZE],
}

impl<'a> PathSearcher<'a> {
    /// Prepares a lookup of `name` along `syspath`, or along [`DEFAULT_SEARCH_PATH`] when the
    /// environment has none. Both are treated as C strings.
    #[must_use]
    pub fn new(name: &'a [u8], syspath: Option<&'a [u8]>) -> Self {
        Self {
            name: cstr(name),
            syspath: syspath.map_or(DEFAULT_SEARCH_PATH, cstr),
            path: [0; PATH_BUF_SIZE],
        }
    }

    /// Resolves the command.
    ///
    /// Every candidate is tried without a suffix first. If that finds nothing and the name does
    /// not already end in `.com`, `.exe` or `.com.dbg`, every candidate is tried again with
    /// `.com` appended.
    pub fn commandv(mut self, access: &mut impl AccessCheck) -> Option<ResolvedPath> {
        if self.name.is_empty() || self.name.len() + 1 > self.path.len() {
            return None;
        }
        let len = self
            .find_command(b"", access)
            .or_else(|| {
                if self.is_com_path() {
                    None
                } else {
                    self.find_command(COM_SUFFIX, access)
                }
            })?;
        Some(ResolvedPath {
            buf: self.path,
            len,
        })
    }

    fn is_com_path(&self) -> bool {
        COM_PATH_SUFFIXES
            .iter()
            .any(|suffix| ends_with_ignore_case(self.name, suffix))
    }

    fn find_command(&mut self, suffix: &[u8], access: &mut impl AccessCheck) -> Option<usize> {
        if memchr(self.name, b'/').is_some() {
            return self.access_command(b"", suffix, access);
        }
        let syspath = self.syspath;
        syspath
            .split(|&c| c == b':')
            .find_map(|dir| self.access_command(dir, suffix, access))
    }

    /// Builds `dir/name{suffix}` in the buffer and checks it, returning its length on success.
    ///
    /// A candidate that does not fit is rejected, never truncated.
    fn access_command(
        &mut self,
        dir: &[u8],
        suffix: &[u8],
        access: &mut impl AccessCheck,
    ) -> Option<usize> {
        if dir.len() + 1 + self.name.len() + suffix.len() + 1 > self.path.len() {
            return None;
        }
        let mut len = dir.len();
        self.path[..len].copy_from_slice(dir);
        if len > 0 && self.path[len - 1] != b'/' {
            self.path[len] = b'/';
            len += 1;
        }
        for part in [self.name, suffix] {
            self.path[len..len + part.len()].copy_from_slice(part);
            len += part.len();
        }
        self.path[len] = 0;
        let candidate = CStr::from_bytes_until_nul(&self.path[..=len]).ok()?;
        access.is_executable(candidate).then_some(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::vec::Vec;

    /// Grants access to a fixed set of paths and records every probe.
    struct FakeFs<'a> {
        executables: &'a [&'a str],
        probes: Vec<String>,
    }

    impl<'a> FakeFs<'a> {
        fn new(executables: &'a [&'a str]) -> Self {
            Self {
                executables,
                probes: Vec::new(),
            }
        }
    }

    impl AccessCheck for FakeFs<'_> {
        fn is_executable(&mut self, path: &CStr) -> bool {
            let path = String::from(path.to_str().unwrap());
            let found = self.executables.contains(&path.as_str());
            self.probes.push(path);
            found
        }
    }

    fn resolve(name: &str, syspath: Option<&str>, fs: &mut FakeFs<'_>) -> Option<String> {
        PathSearcher::new(name.as_bytes(), syspath.map(str::as_bytes))
            .commandv(fs)
            .map(|p| String::from(core::str::from_utf8(p.as_bytes()).unwrap()))
    }

    #[test]
    fn first_directory_wins() {
        let mut fs = FakeFs::new(&["/usr/bin/tool", "/opt/bin/tool"]);
        let got = resolve("tool", Some("/opt/bin:/usr/bin"), &mut fs);
        assert_eq!(got.as_deref(), Some("/opt/bin/tool"));
        assert_eq!(fs.probes, ["/opt/bin/tool"]);
    }

    #[test]
    fn default_path_is_used_without_path_variable() {
        let mut fs = FakeFs::new(&["/usr/bin/tool"]);
        let got = resolve("tool", None, &mut fs);
        assert_eq!(got.as_deref(), Some("/usr/bin/tool"));
        assert_eq!(
            fs.probes,
            ["/bin/tool", "/usr/local/bin/tool", "/usr/bin/tool"]
        );
    }

    #[test]
    fn suffix_pass_runs_after_the_whole_plain_pass() {
        let mut fs = FakeFs::new(&["/a/tool.com", "/b/tool.com"]);
        let got = resolve("tool", Some("/a:/b/"), &mut fs);
        assert_eq!(got.as_deref(), Some("/a/tool.com"));
        assert_eq!(fs.probes, ["/a/tool", "/b/tool", "/a/tool.com"]);
    }

    #[test]
    fn names_with_an_executable_suffix_skip_the_suffix_pass() {
        let mut fs = FakeFs::new(&[]);
        assert!(resolve("tool.EXE", Some("/a"), &mut fs).is_none());
        assert!(resolve("tool.com.dbg", Some("/a"), &mut fs).is_none());
        assert_eq!(fs.probes, ["/a/tool.EXE", "/a/tool.com.dbg"]);
    }

    #[test]
    fn empty_component_means_current_directory() {
        let mut fs = FakeFs::new(&["tool"]);
        let got = resolve("tool", Some("/nope::/usr/bin"), &mut fs);
        assert_eq!(got.as_deref(), Some("tool"));
    }

    #[test]
    fn names_with_a_slash_are_tried_literally() {
        let mut fs = FakeFs::new(&["./bin/tool.com"]);
        let got = resolve("./bin/tool", Some("/usr/bin"), &mut fs);
        assert_eq!(got.as_deref(), Some("./bin/tool.com"));
        assert_eq!(fs.probes, ["./bin/tool", "./bin/tool.com"]);
    }

    #[test]
    fn overlong_candidates_are_skipped_not_truncated() {
        let long_dir = String::from("/") + &"d".repeat(PATH_BUF_SIZE - 4);
        let syspath = long_dir.clone() + ":/short";
        let mut fs = FakeFs::new(&["/short/tool"]);
        let got = resolve("tool", Some(&syspath), &mut fs);
        assert_eq!(got.as_deref(), Some("/short/tool"));
        assert!(fs.probes.iter().all(|p| !p.starts_with(&long_dir)));
    }

    #[test]
    fn empty_or_oversized_names_fail() {
        let mut fs = FakeFs::new(&[""]);
        assert!(resolve("", Some("/bin"), &mut fs).is_none());
        let huge = "x".repeat(PATH_BUF_SIZE);
        assert!(resolve(&huge, Some("/bin"), &mut fs).is_none());
        assert!(fs.probes.is_empty());
    }

    #[test]
    fn resolved_path_is_nul_terminated() {
        let mut fs = FakeFs::new(&["/bin/ls"]);
        let path = PathSearcher::new(b"ls\0garbage", Some(b"/bin\0:/usr/bin"))
            .commandv(&mut fs)
            .unwrap();
        assert_eq!(path.as_bytes_with_nul(), b"/bin/ls\0");
        assert_eq!(path.as_c_str().to_bytes(), b"/bin/ls");
    }
}
