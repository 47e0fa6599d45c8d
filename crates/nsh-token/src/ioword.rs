//! `IoWord` (§3): a parsed redirection before (and after) expansion.

use crate::word::Word;
use bitflags::bitflags;

/// The exclusive redirection kind, pulled out of the flag bitset into its
/// own enum: a redirection is read, write, append, read-write, heredoc, or
/// dup — never more than one at a time — so it reads better as a typed
/// field than as a handful of mutually-exclusive bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoType {
    Read,
    Write,
    Cat,
    Rdwr,
    Here,
    Dup,
}

bitflags! {
    /// Modifier bits that can accompany any [`IoType`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IoMod: u16 {
        /// `>|`: clobber even under `noclobber`.
        const CLOB    = 0b0000_0001;
        /// Heredoc delimiter was unquoted: body is re-lexed with
        /// substitutions during expansion.
        const EVAL    = 0b0000_0010;
        /// `<<-`: strip leading tabs from heredoc body lines.
        const SKIP    = 0b0000_0100;
        /// `<<<`: here-string, not here-document.
        const HERESTR = 0b0000_1000;
        /// `<&`: dup is opened for reading (vs `>&` for writing).
        const RDUP    = 0b0001_0000;
        /// `&>`: the bash-ism combined stdout+stderr redirect.
        const BASH    = 0b0010_0000;
        /// Here-document delimiter was unquoted and bare at end-of-line
        /// (no explicit close observed yet at lex time).
        const NDELIM  = 0b0100_0000;
        /// `name` has already been expanded (set once `iosetup` resolves
        /// it), so a second pass must not expand it again.
        const NAMEXP  = 0b1000_0000;
    }
}

/// The maximum permitted redirection unit, so a malformed `fd>` cannot
/// address an out-of-range descriptor (§3 invariant "unit < FDBASE").
pub const FD_BASE: i32 = 64;

/// A parsed I/O redirection.
#[derive(Debug, Clone)]
pub struct IoWord {
    /// The file descriptor being redirected, e.g. `2` in `2>&1`.
    pub unit: i32,
    pub io_type: IoType,
    pub modifiers: IoMod,
    /// The filename / dup target / heredoc delimiter word (absent for a
    /// heredoc once its body has replaced it, see `heredoc`).
    pub name: Option<Word>,
    /// The (pre-expansion) here-document delimiter, kept separately from
    /// `name` because the delimiter is scanned under `HEREDELIM` lexer
    /// flags distinct from an ordinary redirection target.
    pub delim: Option<Word>,
    /// The collected here-document body, once `§4.3` has run.
    pub heredoc: Option<Vec<u8>>,
}

impl IoWord {
    pub fn new(unit: i32, io_type: IoType) -> Self {
        Self {
            unit,
            io_type,
            modifiers: IoMod::empty(),
            name: None,
            delim: None,
            heredoc: None,
        }
    }

    pub fn is_here(&self) -> bool {
        self.io_type == IoType::Here
    }

    /// §3 invariant: `HERE` implies one of `delim` or `heredoc` is set
    /// depending on phase (delim before collection, heredoc after).
    pub fn invariant_holds(&self) -> bool {
        if self.unit < 0 || self.unit >= FD_BASE {
            return false;
        }
        if self.is_here() {
            return self.delim.is_some() || self.heredoc.is_some();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ioword_has_no_modifiers() {
        let io = IoWord::new(1, IoType::Write);
        assert!(io.modifiers.is_empty());
        assert!(io.invariant_holds());
    }

    #[test]
    fn here_without_delim_or_body_violates_invariant() {
        let io = IoWord::new(0, IoType::Here);
        assert!(!io.invariant_holds());
    }

    #[test]
    fn unit_past_fd_base_violates_invariant() {
        let mut io = IoWord::new(FD_BASE, IoType::Write);
        io.name = Some(Word::new());
        assert!(!io.invariant_holds());
    }
}
