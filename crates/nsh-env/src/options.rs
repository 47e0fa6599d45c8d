//! Shell-wide runtime options (§4.4, §4.6, §5) — the `set -e`/`-o
//! noclobber`/POSIX-mode/restricted/xtrace/monitor flags the executor and
//! redirection engine consult, pulled out of `Shell` so they can be
//! snapshotted/restored independently of the symbol-table-backed `$-`
//! presentation an embedding CLI maintains.

#[derive(Debug, Clone, Copy)]
pub struct ShellOptions {
    /// `set -e`: unwind `ERROR` on a non-zero simple-command status
    /// outside `eval` (§4.4, §8 "errexit scope").
    pub errexit: bool,
    /// `set -C`: redirection opens add exclusive-create for plain files
    /// unless `CLOB` (§4.5).
    pub noclobber: bool,
    /// Selects `TBRACE_KORN` vs `TBRACE_SH` trim-operator lexing and
    /// POSIX- vs ksh-style function-call semantics (§4.2, §4.4).
    pub posix: bool,
    /// `set -r`: forbids `command -p`, absolute paths, and redirecting to
    /// new files (§4.4, §7 `RestrictedViolation`).
    pub restricted: bool,
    /// `set -x`: print expanded assignments/argv on `shl_xtrace` before
    /// dispatch (§4.4 "xtrace").
    pub xtrace: bool,
    /// Job control active: children about to `exec` get default
    /// SIGINT/SIGQUIT unless background-and-not-monitored (§4.4, §5).
    pub monitor: bool,
    pub interactive: bool,
    /// `TMOUT` seconds for interactive stdin reads (§5); `0` disables.
    pub tmout: u32,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            errexit: false,
            noclobber: false,
            posix: false,
            restricted: false,
            xtrace: false,
            monitor: false,
            interactive: false,
            tmout: 0,
        }
    }
}
