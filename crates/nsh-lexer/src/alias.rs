//! The alias-lookup seam (§4.2 "Keyword/alias resolution").
//!
//! The alias table itself belongs to the shell's symbol-table collaborator
//! layer (`nsh-env`, above this crate in the dependency order), so
//! `nsh-lexer` only depends on this narrow trait; whatever owns both the
//! lexer and the alias table (the executor, or a REPL embedding it)
//! implements it.
pub trait AliasLookup {
    /// Returns the alias body for `name`, if one is defined.
    fn lookup_body(&self, name: &str) -> Option<String>;
}

impl AliasLookup for () {
    fn lookup_body(&self, _name: &str) -> Option<String> {
        None
    }
}
