//! Error taxonomy (§7) and the non-local-exit / unwind protocol (§4.6).
//!
//! Non-local exits (breaking out of a loop, returning from a function,
//! an errexit-triggered bailout) are modeled as a tagged [`Flow`] value
//! threaded through `Result`, never as a panic or a thrown exception. A
//! forked child translates an escaping `Flow::Unwind` into its own
//! process exit code at the point it would otherwise `exec`.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

use thiserror::Error;

/// §7 error taxonomy.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("can't {action} {target}: {source}")]
    Redir {
        action: RedirAction,
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}: not found")]
    NotFound(String),

    #[error("{0}: not executable")]
    NotExecutable(String),

    #[error("{0}: restricted")]
    RestrictedViolation(String),

    #[error("{name}: {message}")]
    Builtin { name: String, message: String },

    #[error("can't load function {0}")]
    FunctionLoadError(String),

    #[error("coprocess already exists")]
    CoprocExists,

    #[error("internal error: {0}")]
    Internal(String),
}

/// The action being attempted when a [`ShellError::Redir`] occurred, for a
/// "can't {action} {target}: {errno}" message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RedirAction {
    Open,
    Create,
    Dup,
}

impl std::fmt::Display for RedirAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Create => "create",
            Self::Dup => "dup",
        };
        write!(f, "{s}")
    }
}

/// Lexical errors (§7 `LexError`, §8 "Boundary" cases).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unclosed quote")]
    UnclosedQuote,

    #[error("here document '{delim}' unclosed")]
    UnclosedHeredoc { delim: String },

    #[error("unclosed `${{...}}` substitution")]
    UnclosedSubst,

    #[error("bad substitution")]
    BadSubstitution,

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("lexer state-frame depth exceeded its configured limit ({limit})")]
    StateDepthExceeded { limit: usize },

    #[error("word exceeded the configured maximum length ({limit} bytes)")]
    WordTooLong { limit: usize },

    #[error("too many pending here-documents on one line (limit {limit})")]
    TooManyPendingHeredocs { limit: usize },

    #[error("alias `{name}` would recurse")]
    AliasRecursion { name: String },
}

/// §4.6 non-local exit classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnwindClass {
    /// Terminate the shell cleanly.
    Exit,
    /// Terminate a forked child.
    Leave,
    /// Reset to the nearest handler.
    Error,
    /// Exit a function or dot-script.
    Return,
    /// Exit the nearest enclosing loop.
    Break,
    /// Restart the nearest enclosing loop's condition.
    Continue,
    /// An interrupt (signal) arrived.
    Intr,
    /// Restart the top-level read-eval loop.
    Shell,
}

/// A non-local exit in flight: the class plus the `$?`-style status it
/// carries to whichever frame ultimately claims it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwind {
    pub class: UnwindClass,
    pub status: i32,
}

impl Unwind {
    pub fn new(class: UnwindClass, status: i32) -> Self {
        Self { class, status }
    }
}

/// The tagged result type propagated by the executor: either an ordinary
/// error, or a non-local exit in progress. Kept distinct from
/// `Result<T, ShellError>` because callers along the unwind path need to
/// distinguish "this command failed" from "something above us is
/// unwinding and I must not swallow it" — see §4.6's `unwind(c)` pops
/// frames until a handler claims `c`.
#[derive(Debug)]
pub enum Flow {
    Err(ShellError),
    Unwind(Unwind),
}

pub type FlowResult<T> = Result<T, Flow>;

impl From<ShellError> for Flow {
    fn from(err: ShellError) -> Self {
        Flow::Err(err)
    }
}

impl From<LexError> for Flow {
    fn from(err: LexError) -> Self {
        Flow::Err(ShellError::Lex(err))
    }
}

impl From<Unwind> for Flow {
    fn from(unwind: Unwind) -> Self {
        Flow::Unwind(unwind)
    }
}

impl Flow {
    pub fn unwind(class: UnwindClass, status: i32) -> Self {
        Flow::Unwind(Unwind::new(class, status))
    }

    /// The class of the in-flight unwind, if this `Flow` is one.
    pub fn unwind_class(&self) -> Option<UnwindClass> {
        match self {
            Flow::Unwind(u) => Some(u.class),
            Flow::Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_error_display_matches_taxonomy() {
        let err = ShellError::NotFound("frob".into());
        assert_eq!(err.to_string(), "frob: not found");
    }

    #[test]
    fn lex_error_from_converts_into_flow_err() {
        let flow: Flow = LexError::UnclosedQuote.into();
        assert!(matches!(flow, Flow::Err(ShellError::Lex(LexError::UnclosedQuote))));
    }

    #[test]
    fn unwind_round_trips_class_and_status() {
        let flow = Flow::unwind(UnwindClass::Return, 7);
        assert_eq!(flow.unwind_class(), Some(UnwindClass::Return));
    }

    #[test]
    fn ordinary_error_has_no_unwind_class() {
        let flow: Flow = ShellError::CoprocExists.into();
        assert_eq!(flow.unwind_class(), None);
    }
}
