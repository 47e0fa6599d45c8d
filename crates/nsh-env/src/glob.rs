//! The glob/pattern matcher collaborator (§1, §6): `match(text, pattern) ->
//! bool`, consulted by `TCASE` pattern arms and the `[[ ]]` evaluator.

/// `match(text, pattern) -> bool` (§6).
pub trait GlobMatcher {
    fn matches(&self, text: &str, pattern: &str) -> bool;
}
