//! The builtin registry collaborator (§1, §6): `{ name -> { flags, fn(argv)
//! -> int } }`, invoked by the executor's `TCOM` dispatch (§4.4).

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BuiltinFlags: u8 {
        /// POSIX "special builtin": assignments preceding it persist in
        /// the calling environment, and a redirection/assignment error
        /// unwinds a non-interactive shell (§4.4 step 4, §7).
        const SPEC_BI  = 0b0000_0001;
        /// Assignments preceding this builtin are kept even when argv is
        /// non-empty (§4.4 "Assignment handling").
        const KEEPASN  = 0b0000_0010;
        /// The builtin is one of the command-like pre-word forms
        /// (`builtin`, `exec`, `command`, `trap`) resolved in the dispatch
        /// loop before the real callee lookup (§4.4 "Shell builtin").
        const PREWORD  = 0b0000_0100;
    }
}

/// One entry in the builtin registry.
pub struct BuiltinEntry {
    pub flags: BuiltinFlags,
    pub func: Box<dyn FnMut(&[String]) -> i32 + Send>,
}

impl BuiltinEntry {
    pub fn new(flags: BuiltinFlags, func: impl FnMut(&[String]) -> i32 + Send + 'static) -> Self {
        Self { flags, func: Box::new(func) }
    }

    pub fn is_special(&self) -> bool {
        self.flags.contains(BuiltinFlags::SPEC_BI)
    }
}

/// `{ name -> { flags, fn(argv) -> int } }` (§6).
pub trait BuiltinRegistry {
    fn lookup(&self, name: &str) -> Option<&BuiltinEntry>;
    fn lookup_mut(&mut self, name: &str) -> Option<&mut BuiltinEntry>;
    fn call(&mut self, name: &str, argv: &[String]) -> Option<i32> {
        let entry = self.lookup_mut(name)?;
        Some((entry.func)(argv))
    }
}

/// A simple in-memory registry, sufficient for tests and for an embedding
/// application to populate before handing the `Shell` context to the
/// executor.
#[derive(Default)]
pub struct BuiltinTable {
    entries: std::collections::HashMap<String, BuiltinEntry>,
}

impl BuiltinTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: BuiltinEntry) {
        self.entries.insert(name.into(), entry);
    }
}

impl BuiltinRegistry for BuiltinTable {
    fn lookup(&self, name: &str) -> Option<&BuiltinEntry> {
        self.entries.get(name)
    }

    fn lookup_mut(&mut self, name: &str) -> Option<&mut BuiltinEntry> {
        self.entries.get_mut(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_invokes_registered_builtin() {
        let mut table = BuiltinTable::new();
        table.insert(
            "true",
            BuiltinEntry::new(BuiltinFlags::empty(), |_argv| 0),
        );
        assert_eq!(table.call("true", &[]), Some(0));
        assert_eq!(table.call("nope", &[]), None);
    }

    #[test]
    fn special_builtin_flag_is_observable() {
        let entry = BuiltinEntry::new(BuiltinFlags::SPEC_BI, |_| 1);
        assert!(entry.is_special());
    }
}
