//! The redirection engine (§4.5 "Redirections"): turns one parsed
//! [`IoWord`] into an `open`/`dup2` against the live fd table, saving the
//! unit's prior disposition on the current env frame exactly once (§4.5
//! "Save the prior state of `iow.unit` exactly once per env frame. Do not
//! save if it has already been redirected").

use crate::envstack::EnvStack;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nsh_env::coproc::CoprocState;
use nsh_env::expansion::{ExpandFlags, Expansion};
use nsh_env::process::ProcessPrimitives;
use nsh_error::{Flow, FlowResult, RedirAction, ShellError};
use nsh_token::ioword::{IoMod, IoType, IoWord};
use std::ffi::CString;
use tracing::debug;

/// Ambient settings that change how a redirection is carried out, kept
/// separate from [`crate::ExecLimits`] because these are shell options
/// (`set -C`, `set -r`), not fixed budgets.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedirOptions {
    /// `set -C` / `noclobber`: plain `>` must not overwrite an existing
    /// regular file unless the word carried `IoMod::CLOB` (`>|`).
    pub noclobber: bool,
    /// `set -r`: any redirection that could create a file is rejected
    /// (§7 `ShellError::RestrictedViolation`).
    pub restricted: bool,
}

const CREATE_MODE: u32 = 0o666;

/// Applies `iow` against the live fd table (§4.5). `name` is the
/// already-expanded filename/dup-target/heredoc-body producer; callers
/// pass an [`Expansion`] collaborator plus the owning [`EnvStack`] and
/// [`ProcessPrimitives`] so here-document temp files and saved fds are
/// attributed to the correct frame.
pub fn setup(
    iow: &IoWord,
    expansion: &mut impl Expansion,
    env: &mut EnvStack,
    process: &impl ProcessPrimitives,
    coproc: &mut CoprocState,
    opts: RedirOptions,
) -> FlowResult<()> {
    env.save_once(iow.unit, process);
    close_stale_coproc_fd(iow.unit, coproc);

    match iow.io_type {
        IoType::Dup => setup_dup(iow, expansion, process),
        IoType::Here => setup_here(iow, env, process),
        _ => setup_open(iow, expansion, process, opts),
    }
}

/// A redirection touching a coprocess's fd number invalidates the shell's
/// cached copy of it: once a script explicitly redirects `fd`, the
/// shell's own reference to that descriptor for the coprocess is no
/// longer meaningful.
fn close_stale_coproc_fd(unit: i32, coproc: &mut CoprocState) {
    if coproc.read_fd == Some(unit) {
        coproc.read_fd = None;
    }
    if coproc.write_fd == Some(unit) {
        coproc.write_fd = None;
    }
}

fn setup_dup(iow: &IoWord, expansion: &mut impl Expansion, process: &impl ProcessPrimitives) -> FlowResult<()> {
    let Some(word) = &iow.name else {
        return Err(ShellError::Internal("dup redirection missing target word".into()).into());
    };
    let target = expansion.expand_one(word, ExpandFlags::ONEWORD)?;

    if target == "-" {
        let _ = process.close(iow.unit);
        return Ok(());
    }

    let src: i32 = target.parse().map_err(|_| ShellError::Builtin {
        name: "exec".into(),
        message: format!("{target}: bad file descriptor"),
    })?;

    // "dup from == dup to" short-circuit: nothing to move.
    if src == iow.unit {
        return Ok(());
    }

    process
        .dup2(src, iow.unit)
        .map_err(|e| ShellError::Redir { action: RedirAction::Dup, target: target.clone(), source: e.into() })?;
    Ok(())
}

fn setup_here(iow: &IoWord, env: &mut EnvStack, process: &impl ProcessPrimitives) -> FlowResult<()> {
    let body = iow.heredoc.as_deref().unwrap_or(&[]);
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| ShellError::Redir { action: RedirAction::Create, target: "<<".into(), source: e })?;
    std::io::Write::write_all(&mut tmp, body)
        .map_err(|e| ShellError::Redir { action: RedirAction::Create, target: "<<".into(), source: e })?;
    std::io::Seek::seek(&mut tmp, std::io::SeekFrom::Start(0))
        .map_err(|e| ShellError::Redir { action: RedirAction::Open, target: "<<".into(), source: e })?;

    let path = tmp.path().to_path_buf();
    let path_c = path_to_cstring(&path)?;
    let fd = process
        .open(&path_c, OFlag::O_RDONLY, Mode::empty())
        .map_err(|e| ShellError::Redir { action: RedirAction::Open, target: "<<".into(), source: e.into() })?;

    if fd != iow.unit {
        process
            .dup2(fd, iow.unit)
            .map_err(|e| ShellError::Redir { action: RedirAction::Dup, target: "<<".into(), source: e.into() })?;
        let _ = process.close(fd);
    }

    if let Some(frame) = env.top_mut() {
        // Kept alive until this frame pops (§4.5 "materialise to a
        // uniquely-named temp file, registered for cleanup on env pop").
        frame.register_temp_file(tmp);
    }
    Ok(())
}

fn setup_open(
    iow: &IoWord,
    expansion: &mut impl Expansion,
    process: &impl ProcessPrimitives,
    opts: RedirOptions,
) -> FlowResult<()> {
    let Some(word) = &iow.name else {
        return Err(ShellError::Internal("redirection missing target word".into()).into());
    };
    let target = expansion.expand_one(word, ExpandFlags::ONEWORD)?;

    let creates = matches!(iow.io_type, IoType::Write | IoType::Cat | IoType::Rdwr);
    if creates && opts.restricted {
        return Err(ShellError::RestrictedViolation(target).into());
    }

    let base_flags = match iow.io_type {
        IoType::Read => OFlag::O_RDONLY,
        IoType::Write => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        IoType::Cat => OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND,
        IoType::Rdwr => OFlag::O_RDWR | OFlag::O_CREAT,
        IoType::Here | IoType::Dup => unreachable!("handled by dedicated setup paths"),
    };

    let want_excl =
        iow.io_type == IoType::Write && opts.noclobber && !iow.modifiers.contains(IoMod::CLOB);

    let mode = Mode::from_bits_truncate(CREATE_MODE);
    let path_c = path_to_cstring(std::path::Path::new(&target))?;

    let fd = if want_excl {
        match process.open(&path_c, base_flags | OFlag::O_EXCL, mode) {
            Ok(fd) => fd,
            Err(nix::Error::EEXIST) if !process.stat_is_regular(&target) => {
                // noclobber only guards regular files; an existing device
                // or pipe at the same name is still a valid write target.
                process.open(&path_c, base_flags, mode).map_err(|e| ShellError::Redir {
                    action: RedirAction::Create,
                    target: target.clone(),
                    source: e.into(),
                })?
            }
            Err(e) => return Err(ShellError::Redir { action: RedirAction::Create, target, source: e.into() }.into()),
        }
    } else {
        let action = if base_flags.contains(OFlag::O_CREAT) { RedirAction::Create } else { RedirAction::Open };
        process
            .open(&path_c, base_flags, mode)
            .map_err(|e| ShellError::Redir { action, target: target.clone(), source: e.into() })?
    };

    if fd != iow.unit {
        process
            .dup2(fd, iow.unit)
            .map_err(|e| ShellError::Redir { action: RedirAction::Dup, target, source: e.into() })?;
        let _ = process.close(fd);
    }
    debug!(unit = iow.unit, io_type = ?iow.io_type, "redirection applied");
    Ok(())
}

fn path_to_cstring(path: &std::path::Path) -> FlowResult<CString> {
    CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| ShellError::Internal(format!("{}: path contains an embedded NUL", path.display())).into())
}
