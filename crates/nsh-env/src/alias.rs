//! The alias table (§1, §3 "Alias layers carry a pointer to their defining
//! table entry"). `nsh-source`'s `SourceStack` enforces the non-recursion
//! invariant on the active stack; this table is the definition side the
//! lexer's `ALIAS` flag consults (§4.2 "Keyword/alias resolution").

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub body: String,
    /// Tracking aliases (`alias -t`) additionally expand when used as the
    /// first word of a pipeline segment; reserved-word aliases
    /// (`alias -- if=...`) never expand when a keyword would already
    /// match. Stored for the lexer's policy decisions, not enforced here.
    pub is_tracking: bool,
}

#[derive(Debug, Default)]
pub struct AliasTable {
    entries: HashMap<String, AliasEntry>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, body: impl Into<String>) {
        self.entries.insert(name.into(), AliasEntry { body: body.into(), is_tracking: false });
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<&AliasEntry> {
        self.entries.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_lookup_round_trips() {
        let mut t = AliasTable::new();
        t.define("ll", "ls -l");
        assert_eq!(t.lookup("ll").unwrap().body, "ls -l");
    }

    #[test]
    fn undefine_removes_entry() {
        let mut t = AliasTable::new();
        t.define("ll", "ls -l");
        assert!(t.undefine("ll"));
        assert!(t.lookup("ll").is_none());
    }
}
