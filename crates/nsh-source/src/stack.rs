//! The input source layer stack (§3 "Source layer", §4.1).
//!
//! Invariant: the layer stack is a strict LIFO; only the topmost layer's
//! cursor advances; popping never resurrects a freed body. This is
//! enforced simply by modeling the stack as a `Vec` and only ever touching
//! its last element.

use crate::layer::{LayerFlags, SourceLayer};
use nsh_error::{Flow, LexError};
use std::collections::HashSet;
use tracing::{debug, trace};

/// One step of delivering (or not) a byte from the topmost layer.
pub enum Delivery {
    Byte(u8),
    /// The topmost layer was exhausted and transitioned (possibly popped);
    /// the caller should loop and ask again.
    Retry,
    /// The whole stack is exhausted.
    Eof,
}

pub struct SourceStack {
    layers: Vec<SourceLayer>,
    /// §3 "Alias non-recursion": the set of alias names currently active
    /// as a layer, checked before pushing a new alias layer.
    active_aliases: HashSet<String>,
}

impl Default for SourceStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceStack {
    pub fn new() -> Self {
        Self { layers: Vec::new(), active_aliases: HashSet::new() }
    }

    pub fn push(&mut self, layer: SourceLayer) {
        if let SourceLayer::Alias(a) = &layer {
            self.active_aliases.insert(a.name.clone());
        }
        trace!(depth = self.layers.len() + 1, "source layer pushed");
        self.layers.push(layer);
    }

    pub fn pop(&mut self) -> Option<SourceLayer> {
        let layer = self.layers.pop();
        if let Some(SourceLayer::Alias(a)) = &layer {
            self.active_aliases.remove(&a.name);
        }
        trace!(depth = self.layers.len(), "source layer popped");
        layer
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// §3 "Alias non-recursion": the same alias table entry appears at
    /// most once on the source stack at any time.
    pub fn would_recurse(&self, alias_name: &str) -> bool {
        self.active_aliases.contains(alias_name)
    }

    pub fn push_alias_checked(&mut self, layer: SourceLayer) -> Result<(), Flow> {
        if let SourceLayer::Alias(a) = &layer {
            if self.would_recurse(&a.name) {
                debug!(alias = %a.name, "alias recursion rejected");
                return Err(LexError::AliasRecursion { name: a.name.clone() }.into());
            }
        }
        self.push(layer);
        Ok(())
    }

    pub fn top_flags(&self) -> LayerFlags {
        self.layers.last().map(|l| l.flags()).unwrap_or_default()
    }

    pub fn set_top_has_alias(&mut self, value: bool) {
        if let Some(layer) = self.layers.last_mut() {
            layer.set_has_alias(value);
        }
    }

    /// Pulls one byte from the topmost layer, performing the layer
    /// transition described in §4.1 `getc` when that layer is exhausted.
    pub fn next_byte(&mut self) -> std::io::Result<Delivery> {
        let Some(top) = self.layers.last_mut() else {
            return Ok(Delivery::Eof);
        };
        match top {
            SourceLayer::File(l) | SourceLayer::Stdin(l) => match l.next_byte()? {
                Some(b) => Ok(Delivery::Byte(b)),
                None => {
                    self.layers.pop();
                    Ok(Delivery::Retry)
                }
            },
            SourceLayer::String(l) | SourceLayer::CmdlineString(l) => match l.next_byte() {
                Some(b) => Ok(Delivery::Byte(b)),
                None => {
                    self.layers.pop();
                    Ok(Delivery::Retry)
                }
            },
            SourceLayer::Words(l) => match l.next_byte() {
                Some(b) => Ok(Delivery::Byte(b)),
                None => {
                    self.layers.pop();
                    Ok(Delivery::Retry)
                }
            },
            SourceLayer::Alias(l) => match l.next_byte() {
                Some(b) => Ok(Delivery::Byte(b)),
                None => {
                    let ends_ws = l.ends_in_whitespace();
                    let last = l.last_byte();
                    let name = l.name.clone();
                    self.active_aliases.remove(&name);
                    self.layers.pop();
                    if ends_ws {
                        // re-enable alias lookup on the layer beneath
                        self.set_top_has_alias(true);
                    } else if let Some(last) = last {
                        // re-inject the body's last character so the next
                        // read sees it (§4.1 `getc`, ALIAS transition)
                        self.layers.push(SourceLayer::Reread(vec![last]));
                    }
                    Ok(Delivery::Retry)
                }
            },
            SourceLayer::Reread(buf) => match buf.pop() {
                Some(b) => {
                    if buf.is_empty() {
                        self.layers.pop();
                    }
                    Ok(Delivery::Byte(b))
                }
                None => {
                    self.layers.pop();
                    Ok(Delivery::Retry)
                }
            },
            SourceLayer::Eof => {
                self.layers.pop();
                Ok(Delivery::Eof)
            }
        }
    }

    /// Puts `byte` back, preferring to rewind the current layer's cursor
    /// and falling back to a synthesised `REREAD` layer (§4.1 `ungetc`).
    pub fn unread(&mut self, byte: u8) {
        if let Some(top) = self.layers.last_mut() {
            let handled = match top {
                SourceLayer::File(l) | SourceLayer::Stdin(l) => l.unread(byte),
                SourceLayer::String(l) | SourceLayer::CmdlineString(l) => l.unread(byte),
                SourceLayer::Words(l) => l.unread(byte),
                SourceLayer::Alias(l) => l.unread(byte),
                SourceLayer::Reread(buf) => {
                    buf.push(byte);
                    true
                }
                SourceLayer::Eof => false,
            };
            if handled {
                return;
            }
        }
        self.layers.push(SourceLayer::Reread(vec![byte]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::BufLayer;

    #[test]
    fn lifo_ordering_is_enforced() {
        let mut stack = SourceStack::new();
        stack.push(SourceLayer::String(BufLayer::new(b"outer".to_vec(), LayerFlags::default())));
        stack.push(SourceLayer::String(BufLayer::new(b"inner".to_vec(), LayerFlags::default())));
        assert_eq!(stack.depth(), 2);
        let mut collected = Vec::new();
        loop {
            match stack.next_byte().unwrap() {
                Delivery::Byte(b) => collected.push(b),
                Delivery::Retry => continue,
                Delivery::Eof => break,
            }
        }
        assert_eq!(collected, b"innerouter");
    }

    #[test]
    fn alias_recursion_is_rejected() {
        use crate::layer::AliasLayer;
        let mut stack = SourceStack::new();
        stack
            .push_alias_checked(SourceLayer::Alias(AliasLayer::new(
                "ll".into(),
                b"ls -l".to_vec(),
                LayerFlags::default(),
            )))
            .unwrap();
        let result = stack.push_alias_checked(SourceLayer::Alias(AliasLayer::new(
            "ll".into(),
            b"ls -l".to_vec(),
            LayerFlags::default(),
        )));
        assert!(result.is_err());
    }

    #[test]
    fn ungetc_after_stack_empty_synthesises_reread() {
        let mut stack = SourceStack::new();
        stack.unread(b'x');
        match stack.next_byte().unwrap() {
            Delivery::Byte(b) => assert_eq!(b, b'x'),
            _ => panic!("expected synthesised REREAD byte"),
        }
    }
}
