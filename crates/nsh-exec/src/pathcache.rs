//! `$PATH` command-hash cache (§10.5): a name-to-resolved-path cache
//! consulted before every `CEXEC` dispatch so a command run in a loop
//! doesn't re-walk `$PATH` on every iteration.
//!
//! Entries are tagged by whether they were seeded by a plain `PATH` search
//! that resolved to a relative path, as opposed to `hash -d`/an explicit
//! absolute alias; `hash -r` either drops every entry or only the
//! relative-path ones, matching that distinction via
//! [`PathCache::rehash`]'s `all` parameter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

struct Entry {
    resolved: PathBuf,
    relative: bool,
}

/// A `PATH`-keyed cache from command name to resolved absolute path.
#[derive(Default)]
pub struct PathCache {
    entries: HashMap<String, Entry>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached resolution for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries.get(name).map(|e| e.resolved.as_path())
    }

    /// Searches `path_dirs` (already `:`-split) for an executable named
    /// `name`, using `access_executable` (the §6 process-primitive
    /// collaborator) as the executability test, and caches the result.
    /// Entries containing a `/` are never cached (§"findcom": "if
    /// `vstrchr(name, '/')` ... insert = 0").
    pub fn resolve(
        &mut self,
        name: &str,
        path_dirs: &[String],
        access_executable: impl Fn(&str) -> bool,
    ) -> Option<PathBuf> {
        if name.contains('/') {
            return access_executable(name).then(|| PathBuf::from(name));
        }
        if let Some(entry) = self.entries.get(name) {
            return Some(entry.resolved.clone());
        }
        for dir in path_dirs {
            let candidate = Path::new(dir).join(name);
            let Some(candidate_str) = candidate.to_str() else { continue };
            if access_executable(candidate_str) {
                self.entries
                    .insert(name.to_string(), Entry { resolved: candidate.clone(), relative: !candidate.is_absolute() });
                return Some(candidate);
            }
        }
        None
    }

    /// `hash -r`: drops cached resolutions. `all = false` mirrors
    /// `flushcom(false)` and only drops entries seeded by a relative-path
    /// hit; `all = true` mirrors `flushcom(true)` and clears everything.
    pub fn rehash(&mut self, all: bool) {
        if all {
            self.entries.clear();
        } else {
            self.entries.retain(|_, e| !e.relative);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_containing_names_bypass_path_search_and_are_not_cached() {
        let mut cache = PathCache::new();
        let result = cache.resolve("./foo", &[], |p| p == "./foo");
        assert_eq!(result, Some(PathBuf::from("./foo")));
        assert!(cache.is_empty());
    }

    #[test]
    fn resolution_is_cached_after_first_search() {
        let mut cache = PathCache::new();
        let dirs = vec!["/usr/bin".to_string()];
        let first = cache.resolve("ls", &dirs, |p| p == "/usr/bin/ls");
        assert_eq!(first, Some(PathBuf::from("/usr/bin/ls")));
        // second call would fail the predicate if it re-searched instead
        // of hitting the cache
        let second = cache.resolve("ls", &dirs, |_| false);
        assert_eq!(second, Some(PathBuf::from("/usr/bin/ls")));
    }

    #[test]
    fn rehash_without_all_keeps_absolute_entries() {
        let mut cache = PathCache::new();
        cache.entries.insert("abs".into(), Entry { resolved: PathBuf::from("/bin/abs"), relative: false });
        cache.entries.insert("rel".into(), Entry { resolved: PathBuf::from("bin/rel"), relative: true });
        cache.rehash(false);
        assert!(cache.get("abs").is_some());
        assert!(cache.get("rel").is_none());
    }

    #[test]
    fn rehash_all_clears_everything() {
        let mut cache = PathCache::new();
        cache.entries.insert("abs".into(), Entry { resolved: PathBuf::from("/bin/abs"), relative: false });
        cache.rehash(true);
        assert!(cache.is_empty());
    }
}
