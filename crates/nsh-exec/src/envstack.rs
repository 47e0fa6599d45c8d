//! The execution environment stack (§3 "Execution environment stack",
//! §4.5 "Redirection restore", §4.6 "deferred teardown... at each pop").
//!
//! Rather than modeling `unwind(c)`'s "pop frames until a handler claims
//! `c`" as a second data structure searched independently of control flow,
//! this crate leans on the fact that the tree executor's own recursion
//! already mirrors the env-frame nesting: the nearest enclosing `TWhile`/
//! `TFor` call *is* the nearest `Loop` frame, the nearest function-call
//! dispatch *is* the nearest `Func` frame. So frame popping here is purely
//! about the side effects every pop performs regardless of who ultimately
//! consumes the propagating [`nsh_error::Flow`] — restoring saved fds and
//! dropping here-document temp files (§8 "Redirection restore": "fds
//! `0..NUFILE-1` in the caller's frame are observably identical to their
//! state immediately before the call"). [`EnvKind::handles`] documents
//! which node kinds are expected to be the ones that *do* consume a given
//! [`nsh_error::UnwindClass`], for tests and readers, not as a mechanism
//! the pop path consults.

use nsh_env::ProcessPrimitives;
use nsh_error::{Flow, ShellError, UnwindClass};
use std::collections::HashSet;
use std::os::unix::io::RawFd;
use tracing::trace;

/// One of the seven execution-environment frame kinds (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvKind {
    /// Pushed once per `execute()` call (§4.4 step 2): scopes a single
    /// node's redirections.
    Exec,
    /// `TFor`/`TSelect`/`TWhile`/`TUntil` (§4.4): accepts `Break`/`Continue`.
    Loop,
    /// A function call (§4.4 "Function"): accepts `Return`/`Error`.
    Func,
    /// An error handler scope (`eval`, a special builtin's redirection
    /// failure path, §7): accepts `Error`.
    Errh,
    /// A forked child's root frame (§4.4 `TPAREN`/`TASYNC`/pipeline
    /// segments, `XFORK`): accepts `Leave`.
    Subshell,
    /// A `.`/`source` inclusion (§3, §4.4 "Function" parallels "dot
    /// script"): accepts `Return`.
    Incl,
    /// A parse/lex re-entry (`$(...)`, a function body load): accepts
    /// `Error` per §7 "surface via the error unwind to the nearest `PARSE`
    /// or `ERRH` frame".
    Parse,
}

impl EnvKind {
    /// Whether a frame of this kind is the conventional handler for
    /// `class` (§3, §4.6). See the module doc: this is documentation and
    /// a test aid, not consulted by [`EnvStack::pop_and_restore`] itself.
    pub fn handles(self, class: UnwindClass) -> bool {
        use EnvKind::*;
        use UnwindClass::*;
        matches!(
            (self, class),
            (Loop, Break | Continue)
                | (Func, Return | Error)
                | (Incl, Return)
                | (Errh, Error)
                | (Subshell, Leave)
                | (Parse, Error)
        )
    }
}

/// What a redirected unit's prior disposition was, so it can be put back
/// exactly (§4.5 "Save the prior state of `iow.unit` exactly once per env
/// frame").
#[derive(Debug)]
pub enum SavedState {
    /// The unit pointed at an open descriptor, duplicated here via
    /// [`ProcessPrimitives::dup`] before being overwritten.
    Dup(RawFd),
    /// The unit was not open before the redirection touched it.
    WasClosed,
}

#[derive(Debug)]
struct SavedFd {
    unit: i32,
    state: SavedState,
}

/// One frame of the execution environment stack (§3).
pub struct EnvFrame {
    pub kind: EnvKind,
    saved: Vec<SavedFd>,
    saved_units: HashSet<i32>,
    temp_files: Vec<tempfile::NamedTempFile>,
}

impl EnvFrame {
    fn new(kind: EnvKind) -> Self {
        Self { kind, saved: Vec::new(), saved_units: HashSet::new(), temp_files: Vec::new() }
    }

    pub fn has_saved(&self, unit: i32) -> bool {
        self.saved_units.contains(&unit)
    }

    /// Registers a here-document temp file for cleanup when this frame
    /// pops (§4.5 "materialise to a uniquely-named temp file (registered
    /// for cleanup on env pop)"). `NamedTempFile` unlinks on `Drop`, which
    /// is exactly "unlinked on env-frame pop" (§6 "Wire/format contracts").
    pub fn register_temp_file(&mut self, f: tempfile::NamedTempFile) {
        self.temp_files.push(f);
    }

    fn record_save(&mut self, unit: i32, state: SavedState) {
        self.saved_units.insert(unit);
        self.saved.push(SavedFd { unit, state });
    }
}

/// The execution environment stack (§3), generic over the process
/// primitives used to save/restore file descriptors.
pub struct EnvStack {
    frames: Vec<EnvFrame>,
    max_depth: usize,
}

impl EnvStack {
    pub fn new(max_depth: usize) -> Self {
        Self { frames: Vec::new(), max_depth }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pushes a new frame (§4.4 step 2, §3). Bounded by
    /// [`crate::ExecLimits::max_env_depth`] (§10.3): a runaway recursive
    /// function becomes a recoverable error, not a blown native stack.
    pub fn push(&mut self, kind: EnvKind) -> Result<(), Flow> {
        if self.frames.len() >= self.max_depth {
            return Err(ShellError::Internal(format!(
                "execution environment nesting exceeded its configured limit ({})",
                self.max_depth
            ))
            .into());
        }
        trace!(?kind, depth = self.frames.len() + 1, "env frame pushed");
        self.frames.push(EnvFrame::new(kind));
        Ok(())
    }

    pub fn top_mut(&mut self) -> Option<&mut EnvFrame> {
        self.frames.last_mut()
    }

    /// §4.5: stash `unit`'s prior disposition in the topmost frame,
    /// exactly once per frame ("Do not save if it has already been
    /// redirected").
    pub fn save_once(&mut self, unit: i32, process: &impl ProcessPrimitives) {
        let Some(frame) = self.frames.last_mut() else { return };
        if frame.has_saved(unit) {
            return;
        }
        match process.dup(unit) {
            Ok(saved) => frame.record_save(unit, SavedState::Dup(saved)),
            Err(_) => frame.record_save(unit, SavedState::WasClosed),
        }
    }

    /// Pops the topmost frame, restoring its saved fds in reverse save
    /// order (§3 invariant: "`quit_env` restores fds in reverse save
    /// order") and dropping its here-document temp files. Called exactly
    /// once per frame pushed, on every return path — success, ordinary
    /// error, or in-flight unwind alike — so §8's "Redirection restore"
    /// invariant holds regardless of which code ultimately consumes the
    /// propagating `Flow`.
    pub fn pop_and_restore(&mut self, process: &impl ProcessPrimitives) -> Option<EnvFrame> {
        let frame = self.frames.pop()?;
        trace!(depth = self.frames.len(), "env frame popped");
        for saved in frame.saved.iter().rev() {
            match saved.state {
                SavedState::Dup(fd) => {
                    let _ = process.dup2(fd, saved.unit);
                    let _ = process.close(fd);
                }
                SavedState::WasClosed => {
                    let _ = process.close(saved.unit);
                }
            }
        }
        Some(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_frame_handles_break_and_continue_only() {
        assert!(EnvKind::Loop.handles(UnwindClass::Break));
        assert!(EnvKind::Loop.handles(UnwindClass::Continue));
        assert!(!EnvKind::Loop.handles(UnwindClass::Return));
    }

    #[test]
    fn func_frame_handles_return_and_error() {
        assert!(EnvKind::Func.handles(UnwindClass::Return));
        assert!(EnvKind::Func.handles(UnwindClass::Error));
        assert!(!EnvKind::Func.handles(UnwindClass::Break));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut stack = EnvStack::new(2);
        stack.push(EnvKind::Exec).unwrap();
        stack.push(EnvKind::Exec).unwrap();
        assert!(stack.push(EnvKind::Exec).is_err());
    }

    #[test]
    fn push_then_pop_round_trips_depth() {
        let mut stack = EnvStack::new(8);
        stack.push(EnvKind::Loop).unwrap();
        assert_eq!(stack.depth(), 1);
        struct NoopProcess;
        impl nsh_env::ProcessPrimitives for NoopProcess {
            unsafe fn fork(&self) -> nix::Result<nix::unistd::ForkResult> {
                unreachable!()
            }
            fn exec(&self, _: &std::ffi::CString, _: &[std::ffi::CString], _: &[std::ffi::CString]) -> nix::Error {
                nix::Error::UnknownErrno
            }
            fn waitpid(&self, _: nix::unistd::Pid) -> nix::Result<nix::sys::wait::WaitStatus> {
                unreachable!()
            }
            fn pipe(&self) -> nix::Result<(RawFd, RawFd)> {
                unreachable!()
            }
            fn dup(&self, fd: RawFd) -> nix::Result<RawFd> {
                Ok(fd)
            }
            fn dup2(&self, src: RawFd, _dst: RawFd) -> nix::Result<RawFd> {
                Ok(src)
            }
            fn close(&self, _fd: RawFd) -> nix::Result<()> {
                Ok(())
            }
            fn open(
                &self,
                _: &std::ffi::CString,
                _: nix::fcntl::OFlag,
                _: nix::sys::stat::Mode,
            ) -> nix::Result<RawFd> {
                unreachable!()
            }
            fn stat_is_regular(&self, _: &str) -> bool {
                false
            }
            fn access_executable(&self, _: &str) -> bool {
                false
            }
        }
        let process = NoopProcess;
        stack.save_once(0, &process);
        assert!(stack.pop_and_restore(&process).is_some());
        assert_eq!(stack.depth(), 0);
    }
}
