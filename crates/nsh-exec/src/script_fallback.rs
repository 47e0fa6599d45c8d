//! Script-execution fallback on `ENOEXEC` (§4.4.1, §10.6).
//!
//! Reads up to 64 bytes (`MAXINTERP`), skips a UTF-8 BOM, looks for a `#!`
//! shebang line (historic one-argument rule: remaining words become a
//! single argument), and otherwise rejects a fixed set of executable magic
//! numbers rather than guessing at `$EXECSHELL`. New implementations may
//! match this list exactly for compatibility but should not extend it
//! without justification, so this module matches the magic list byte for
//! byte, no more and no less.

/// The shebang-line scan never looks past this many bytes of the target
/// file.
pub const MAX_INTERP: usize = 64;

/// The outcome of inspecting a non-executable file's head (§4.4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptVerdict {
    /// A `#!interpreter [arg]` line was found; `arg` is the historic
    /// single concatenated argument word, if any.
    Shebang { interpreter: String, arg: Option<String> },
    /// No shebang, and the head didn't match a rejected binary-magic
    /// signature: fall through to `$EXECSHELL`.
    PlainScript,
    /// The head matched one of the rejected magic numbers: this is a
    /// binary the shell cannot meaningfully source as a script.
    RejectedBinary { magic: u32 },
}

/// Inspects up to [`MAX_INTERP`] bytes read from the head of a file that
/// failed `exec` with `ENOEXEC` (§4.4.1).
pub fn classify(head: &[u8]) -> ScriptVerdict {
    let head = &head[..head.len().min(MAX_INTERP)];
    let body = skip_utf8_bom(head);

    if let Some(line_end) = body.iter().position(|&b| b == b'\0' || b == b'\n' || b == b'\r') {
        if let Some(verdict) = parse_shebang(&body[..line_end]) {
            return verdict;
        }
    } else if body.len() < head.len() {
        // No line terminator within the buffer but there's still room;
        // shouldn't happen given the MAX_INTERP truncation above. Falls
        // through to the magic-number check either way.
    }

    match magic_u16(head) {
        Some(m) if is_rejected_magic(m, head) => ScriptVerdict::RejectedBinary { magic: m as u32 },
        _ => ScriptVerdict::PlainScript,
    }
}

fn skip_utf8_bom(buf: &[u8]) -> &[u8] {
    if buf.len() >= 3 && buf[0] == 0xEF && buf[1] == 0xBB && buf[2] == 0xBF {
        &buf[3..]
    } else {
        buf
    }
}

fn parse_shebang(line: &[u8]) -> Option<ScriptVerdict> {
    if line.len() < 2 || line[0] != b'#' || line[1] != b'!' {
        return None;
    }
    let mut rest = &line[2..];
    rest = trim_leading_ws(rest);
    if rest.is_empty() {
        return None;
    }
    let name_end = rest.iter().position(|&b| b == b' ' || b == b'\t').unwrap_or(rest.len());
    let interpreter = String::from_utf8_lossy(&rest[..name_end]).into_owned();
    let arg_part = trim_leading_ws(&rest[name_end..]);
    let arg = if arg_part.is_empty() { None } else { Some(String::from_utf8_lossy(arg_part).into_owned()) };
    Some(ScriptVerdict::Shebang { interpreter, arg })
}

fn trim_leading_ws(buf: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < buf.len() && (buf[i] == b' ' || buf[i] == b'\t') {
        i += 1;
    }
    &buf[i..]
}

/// `fd = buf[0] << 8 | buf[1]` in the source: a big-endian read of the
/// first two bytes.
fn magic_u16(buf: &[u8]) -> Option<u16> {
    if buf.len() < 2 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

/// The exact magic set `scriptexec()` rejects: a.out `OMAGIC`/`NMAGIC`/
/// `ZMAGIC`/`QMAGIC`, ECOFF I386/M68K/SH variants, ELF, `MZ` (DOS/PE), and
/// gzip.
fn is_rejected_magic(fd: u16, buf: &[u8]) -> bool {
    matches!(fd,
        0o407 | 0o410 | 0o413 | 0o314 // OMAGIC, NMAGIC, ZMAGIC, QMAGIC
        | 0x4C01                     // ECOFF_I386
        | 0x0150 | 0x5001            // ECOFF_M68K
        | 0x0500 | 0x0005            // ECOFF_SH
        | 0x4D5A                     // "MZ"
        | 0x1F8B                     // gzip
    ) || (fd == 0x7F45 && buf.get(2) == Some(&b'L') && buf.get(3) == Some(&b'F'))
}
