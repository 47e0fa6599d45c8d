//! Token, word-encoding, and `IoWord` types shared by the lexer and executor.
//!
//! This crate is the seam between the lexical state machine (`nsh-lexer`)
//! and everything downstream of it: the command tree builder and the
//! executor both consume `Token`/`Word`/`IoWord` without depending on the
//! lexer's internal state-frame machinery.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

pub mod ioword;
pub mod token;
pub mod word;

pub use ioword::{FD_BASE, IoMod, IoType, IoWord};
pub use token::{Keyword, Token, TokenKind};
pub use word::{CommandSubKind, PatternOp, QuoteKind, Word, WordPiece};
