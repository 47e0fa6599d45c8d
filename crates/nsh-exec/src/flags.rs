//! `execute`'s flags bitset (§4.4).

use bitflags::bitflags;

bitflags! {
    /// Flags passed into [`crate::Executor::execute`] (§4.4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExecFlags: u32 {
        /// Must execute in a child: step 1 forks before descending.
        const XFORK   = 1 << 0;
        /// Do not return: replace this process (the terminal `TEXEC` case).
        const XEXEC   = 1 << 1;
        /// Run in the background (no foreground `waitpid`).
        const XBGND   = 1 << 2;
        /// This node is a pipeline's reading end (stdin comes from the
        /// previous segment).
        const XPIPEI  = 1 << 3;
        /// This node is a pipeline's writing end (stdout feeds the next
        /// segment).
        const XPIPEO  = 1 << 4;
        /// This node sits somewhere inside a pipeline (affects job-control
        /// and `PIPESTATUS` bookkeeping even for a segment that is neither
        /// the very first nor very last).
        const XPIPEST = 1 << 5;
        /// Suppress `errexit`/`ERR`-trap propagation for this call only
        /// (the non-executed side of `&&`/`||`, a negated `!`, a loop
        /// condition).
        const XERROK  = 1 << 6;
        /// Wrap execution in `time` accounting.
        const XTIME   = 1 << 7;
        /// `exec`-prefixed simple command (no subshell needed even though
        /// `XEXEC` wasn't already set by the caller).
        const XXCOM   = 1 << 8;
        /// Part of a `coproc` setup.
        const XCOPROC = 1 << 9;
        /// Close the parent's pipe ends immediately after the fork rather
        /// than waiting for pipeline teardown.
        const XPCLOSE = 1 << 10;
        /// Close the child's pipe ends immediately after the fork.
        const XCCLOSE = 1 << 11;
    }
}
