//! The function table (§4.4 "Function"): loading, `FPATH` fallback, and
//! the `FINUSE`/delete-while-running protocol.

use nsh_ast::TreeNode;
use std::collections::HashMap;
use std::rc::Rc;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FunctionFlags: u8 {
        /// Currently executing (§4.4: "the function's `FINUSE` bit").
        const IN_USE = 0b0000_0001;
        /// Deleted while `FINUSE`; the body is freed once the last call
        /// returns (§4.4 "Function": "If the function was deleted while
        /// running (`FDELETE|FINUSE`), free the body on exit").
        const DELETE = 0b0000_0010;
        /// ksh-style function (`$0` rebinding, private `getopts` state) as
        /// opposed to POSIX `name() { ... }` (mirrors `TreeNode::ksh_func`
        /// at definition time).
        const KSH    = 0b0000_0100;
    }
}

pub struct FunctionEntry {
    pub body: Option<Rc<TreeNode>>,
    pub flags: FunctionFlags,
}

/// Outcome of resolving a callee name to a function body (§4.4
/// "Function"): distinguishes "absent after `FPATH` search" (exit 127)
/// from "found but failed to load" (exit 126).
pub enum Resolution {
    /// The file was found and read; its source text is returned so the
    /// caller can re-enter the parser (`sub_parse`) and then call
    /// [`FunctionTable::define`].
    Found(String),
    NotFound,
    LoadError(String),
}

#[derive(Default)]
pub struct FunctionTable {
    entries: HashMap<String, FunctionEntry>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, body: TreeNode, ksh_func: bool) {
        let mut flags = FunctionFlags::empty();
        if ksh_func {
            flags |= FunctionFlags::KSH;
        }
        self.entries.insert(name.into(), FunctionEntry { body: Some(Rc::new(body)), flags });
    }

    pub fn get(&self, name: &str) -> Option<&FunctionEntry> {
        self.entries.get(name)
    }

    pub fn mark_in_use(&mut self, name: &str) {
        if let Some(e) = self.entries.get_mut(name) {
            e.flags |= FunctionFlags::IN_USE;
        }
    }

    /// Clears `IN_USE`; if `DELETE` was set in the meantime, drops the
    /// body and removes the entry entirely (§4.4 "If the function was
    /// deleted while running... free the body on exit").
    pub fn clear_in_use(&mut self, name: &str) {
        let Some(e) = self.entries.get_mut(name) else { return };
        e.flags.remove(FunctionFlags::IN_USE);
        if e.flags.contains(FunctionFlags::DELETE) {
            self.entries.remove(name);
        }
    }

    /// `unset -f name`: if in use, defer removal via `DELETE`; otherwise
    /// remove immediately.
    pub fn delete(&mut self, name: &str) {
        if let Some(e) = self.entries.get_mut(name) {
            if e.flags.contains(FunctionFlags::IN_USE) {
                e.flags |= FunctionFlags::DELETE;
            } else {
                self.entries.remove(name);
            }
        }
    }

    /// §9 "FPATH-fallback lookup in findcom should be preserved": search
    /// `fpath` entries (already expanded by the caller) for `<dir>/<name>`,
    /// returning the first hit's contents via `read_source`. The caller is
    /// responsible for re-entering the parser (`sub_parse`) on the
    /// returned text and calling [`FunctionTable::define`]; this method
    /// only implements the search-and-read half.
    pub fn load_from_fpath(
        &self,
        name: &str,
        fpath: &[String],
        read_source: impl Fn(&std::path::Path) -> std::io::Result<String>,
    ) -> Resolution {
        for dir in fpath {
            let candidate = std::path::Path::new(dir).join(name);
            match read_source(&candidate) {
                Ok(text) => return Resolution::Found(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Resolution::LoadError(e.to_string()),
            }
        }
        Resolution::NotFound
    }
}
