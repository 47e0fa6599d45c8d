//! The expansion collaborator (§1, §6): tilde/parameter/arithmetic/glob
//! word expansion is explicitly out of scope for this crate pack — the
//! executor only calls through this trait.

use bitflags::bitflags;
use nsh_error::ShellError;
use nsh_token::Word;

bitflags! {
    /// §6 "recognised flag bits".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExpandFlags: u8 {
        /// Field-split the result on `$IFS`.
        const DOBLANK    = 0b0000_0001;
        /// Expand filename patterns (glob) in the result.
        const DOGLOB     = 0b0000_0010;
        /// Perform tilde expansion at word-initial position.
        const DOTILDE    = 0b0000_0100;
        /// Treat the result as an extended-glob pattern for matching
        /// (`case`, `[[ ]]`), not for filename generation.
        const DOPAT      = 0b0000_1000;
        /// Tilde-expand after `=` and `:` inside an assignment word.
        const DOASNTILDE = 0b0001_0000;
        /// Suppress field splitting and glob expansion regardless of
        /// other bits (`$(...)` recursion, `ONEWORD` lexer flag mirrored
        /// at the expansion layer).
        const ONEWORD    = 0b0010_0000;
    }
}

/// `expand(word, flags) -> list<string>` / `expand_one(word, flags) -> string`
/// (§1, §6).
pub trait Expansion {
    /// Expands a word into zero or more result strings (field splitting
    /// and glob expansion may each multiply the result).
    fn expand(&mut self, word: &Word, flags: ExpandFlags) -> Result<Vec<String>, ShellError>;

    /// Expands a word to exactly one string, forcing `ONEWORD` semantics
    /// (heredoc delimiters, `case` scrutinees, redirection targets).
    fn expand_one(&mut self, word: &Word, flags: ExpandFlags) -> Result<String, ShellError> {
        let mut parts = self.expand(word, flags | ExpandFlags::ONEWORD)?;
        Ok(match parts.len() {
            0 => String::new(),
            1 => parts.remove(0),
            _ => parts.join(""),
        })
    }
}
