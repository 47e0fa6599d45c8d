//! The variable symbol table collaborator (§1, §6): `lookup/set/delete/
//! typeset` primitives.

use bitflags::bitflags;

bitflags! {
    /// `typeset` type flags (§6): `{LOCAL, LOCAL_COPY, EXPORT, INTEGER,
    /// READONLY, ARRAY}`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u16 {
        /// Scoped to the innermost function/block, popped on return.
        const LOCAL      = 0b0000_0001;
        /// `LOCAL`, but the prior value is snapshotted rather than hidden
        /// (ksh `typeset -L`-style local-with-copy-in semantics).
        const LOCAL_COPY = 0b0000_0010;
        const EXPORT     = 0b0000_0100;
        const INTEGER    = 0b0000_1000;
        const READONLY   = 0b0001_0000;
        const ARRAY      = 0b0010_0000;
    }
}

/// A variable's value as the symbol table stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    Array(Vec<String>),
}

impl Value {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            Value::Array(_) => None,
        }
    }
}

/// `lookup(name)`, `set(name, value, type_flags)`, `delete(name)`,
/// `typeset(decl, flags)` (§6).
pub trait SymbolTable {
    fn lookup(&self, name: &str) -> Option<&Value>;
    fn set(&mut self, name: &str, value: Value, type_flags: TypeFlags) -> Result<(), String>;
    fn delete(&mut self, name: &str);
    fn typeset(&mut self, name: &str, flags: TypeFlags) -> Result<(), String>;
    fn is_readonly(&self, name: &str) -> bool;
    fn is_exported(&self, name: &str) -> bool;

    /// Pushes a new local scope (entered on function call, §4.4
    /// "Function"); popped by `pop_scope` on return.
    fn push_scope(&mut self);
    fn pop_scope(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(std::collections::HashMap<String, (Value, TypeFlags)>);

    impl SymbolTable for Fake {
        fn lookup(&self, name: &str) -> Option<&Value> {
            self.0.get(name).map(|(v, _)| v)
        }
        fn set(&mut self, name: &str, value: Value, type_flags: TypeFlags) -> Result<(), String> {
            if self.is_readonly(name) {
                return Err(format!("{name}: is read only"));
            }
            self.0.insert(name.to_string(), (value, type_flags));
            Ok(())
        }
        fn delete(&mut self, name: &str) {
            self.0.remove(name);
        }
        fn typeset(&mut self, name: &str, flags: TypeFlags) -> Result<(), String> {
            let entry = self.0.entry(name.to_string()).or_insert((Value::Scalar(String::new()), TypeFlags::empty()));
            entry.1 |= flags;
            Ok(())
        }
        fn is_readonly(&self, name: &str) -> bool {
            self.0.get(name).is_some_and(|(_, f)| f.contains(TypeFlags::READONLY))
        }
        fn is_exported(&self, name: &str) -> bool {
            self.0.get(name).is_some_and(|(_, f)| f.contains(TypeFlags::EXPORT))
        }
        fn push_scope(&mut self) {}
        fn pop_scope(&mut self) {}
    }

    #[test]
    fn readonly_rejects_set() {
        let mut t = Fake(Default::default());
        t.typeset("X", TypeFlags::READONLY).unwrap();
        assert!(t.set("X", Value::Scalar("1".into()), TypeFlags::empty()).is_err());
    }
}
