//! The process-primitive collaborators (§6: `fork`, `exec`, `wait`, `pipe`,
//! `dup2`, `open`, `close`, `stat`, `access`).
//!
//! These are true OS syscalls, not application-supplied policy, so unlike
//! [`crate::expansion::Expansion`] or [`crate::symtab::SymbolTable`] this
//! trait exists for testability (a fake implementation can simulate
//! `fork`/`wait` without spawning real processes) rather than because the
//! executor is agnostic to their semantics. `nsh-exec`'s production
//! implementation backs this with `nix::unistd`/`nix::sys::wait` (§10.5).

use nix::sys::wait::WaitStatus;
use nix::unistd::{ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::io::RawFd;

pub trait ProcessPrimitives {
    /// # Safety
    /// Forking a multi-threaded process is only sound if the child
    /// immediately either `exec`s or calls only async-signal-safe code
    /// before doing so (the executor's contract, not this trait's).
    unsafe fn fork(&self) -> nix::Result<ForkResult>;

    /// Replaces the current process image. Returns on failure only.
    fn exec(&self, path: &CString, argv: &[CString], envp: &[CString]) -> nix::Error;

    fn waitpid(&self, pid: Pid) -> nix::Result<WaitStatus>;

    fn pipe(&self) -> nix::Result<(RawFd, RawFd)>;

    /// Duplicates `fd` onto the lowest unused descriptor (mirrors the
    /// source's `savefd()`, built on `fcntl(fd, F_DUPFD, ...)`): used by
    /// the redirection engine to stash a unit's prior disposition before
    /// overwriting it with `dup2` (§4.5 "Save the prior state of
    /// `iow.unit` exactly once per env frame").
    fn dup(&self, fd: RawFd) -> nix::Result<RawFd>;

    fn dup2(&self, src: RawFd, dst: RawFd) -> nix::Result<RawFd>;

    fn close(&self, fd: RawFd) -> nix::Result<()>;

    fn open(&self, path: &CString, flags: nix::fcntl::OFlag, mode: nix::sys::stat::Mode) -> nix::Result<RawFd>;

    fn stat_is_regular(&self, path: &str) -> bool;

    fn access_executable(&self, path: &str) -> bool;
}
