//! The (out-of-scope, §1) parser, reached through the narrow seam the
//! executor actually needs: turning source text it has already read off
//! disk (a function's `FPATH` file, a `.`/`source` script) back into a
//! [`nsh_ast::TreeNode`]. This trait is a whole-source-parse entry point,
//! scoped separately from the lexer's own recursive re-entry (which
//! `nsh-lexer` drives internally for `$(...)`/`${...}`/alias bodies
//! without the executor's involvement).

use nsh_ast::TreeNode;
use nsh_error::ShellError;

/// Parses a complete script body into a command tree (§4.4 "Function":
/// "load by `include(path)` and re-lookup"; §3 `Execution environment
/// stack` `INCL` frame for `.`/`source`).
pub trait SourceParser {
    fn parse(&mut self, source: &str) -> Result<TreeNode, ShellError>;
}
