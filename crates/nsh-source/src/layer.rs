//! One frame of the input source stack (§3 "Source layer").

use std::io::BufRead;

/// Per-layer flags (§3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerFlags {
    /// Alias lookup should be attempted on the next identifier word read
    /// from the layer beneath this one (set when an alias body ends in
    /// whitespace, §4.1 `getc`).
    pub has_alias: bool,
    /// This layer is the tail end of an alias body; used by the lexer to
    /// decide whether trailing-space re-enablement applies.
    pub alias_end: bool,
    /// The layer reads from an interactive terminal (prompts, history).
    pub tty: bool,
    /// Echo characters as they're read (`set -v`-style).
    pub echo: bool,
}

/// A line-buffered layer backed by any `BufRead` (`FILE`/`STDIN`).
pub struct LineLayer {
    reader: Box<dyn BufRead>,
    current: Vec<u8>,
    cursor: usize,
    pub line_no: u32,
    pub flags: LayerFlags,
    exhausted: bool,
}

impl LineLayer {
    pub fn new(reader: Box<dyn BufRead>, flags: LayerFlags) -> Self {
        Self {
            reader,
            current: Vec::new(),
            cursor: 0,
            line_no: 0,
            flags,
            exhausted: false,
        }
    }

    /// Returns the next byte of the current line, refilling from the
    /// underlying reader (retrying on `Interrupted`, §4.1) when the buffer
    /// is exhausted. `Ok(None)` means the underlying stream hit EOF.
    pub fn next_byte(&mut self) -> std::io::Result<Option<u8>> {
        loop {
            if self.cursor < self.current.len() {
                let b = self.current[self.cursor];
                self.cursor += 1;
                return Ok(Some(b));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.current.clear();
            self.cursor = 0;
            loop {
                match self.reader.read_until(b'\n', &mut self.current) {
                    Ok(0) => {
                        self.exhausted = true;
                        break;
                    }
                    Ok(_) => {
                        self.line_no += 1;
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            if self.exhausted && self.current.is_empty() {
                return Ok(None);
            }
        }
    }

    /// Puts a byte back onto the current line buffer if it is the byte we
    /// just delivered (`cursor > 0`); returns `false` if the cursor is at
    /// the start of the layer and a `REREAD` layer must be synthesised
    /// instead (§4.1 `ungetc`).
    pub fn unread(&mut self, byte: u8) -> bool {
        if self.cursor > 0 && self.current.get(self.cursor - 1) == Some(&byte) {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }
}

/// An in-memory body (`STRING`/`CMDLINE_STRING`).
pub struct BufLayer {
    buf: Vec<u8>,
    cursor: usize,
    pub flags: LayerFlags,
}

impl BufLayer {
    pub fn new(buf: Vec<u8>, flags: LayerFlags) -> Self {
        Self { buf, cursor: 0, flags }
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        let b = self.buf.get(self.cursor).copied();
        if b.is_some() {
            self.cursor += 1;
        }
        b
    }

    pub fn unread(&mut self, byte: u8) -> bool {
        if self.cursor > 0 && self.buf.get(self.cursor - 1) == Some(&byte) {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }
}

/// `WORDS`: iterates a string list with single-space separators and a
/// trailing newline (§4.1). Observably equivalent to re-joining the words
/// with `" "` and appending `"\n"` up front, which is what this does —
/// there is no externally visible difference between generating the
/// separators lazily and pre-joining them, and pre-joining collapses three
/// iteration states into the same cursor-based buffer every other layer
/// already uses.
pub struct WordsLayer {
    inner: BufLayer,
}

impl WordsLayer {
    pub fn new(words: &[impl AsRef<[u8]>], flags: LayerFlags) -> Self {
        let mut buf = Vec::new();
        for (i, w) in words.iter().enumerate() {
            if i > 0 {
                buf.push(b' ');
            }
            buf.extend_from_slice(w.as_ref());
        }
        buf.push(b'\n');
        Self { inner: BufLayer::new(buf, flags) }
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        self.inner.next_byte()
    }

    pub fn unread(&mut self, byte: u8) -> bool {
        self.inner.unread(byte)
    }
}

/// `ALIAS`: an alias body being replayed. Carries the defining alias's name
/// so the source stack can enforce the recursion guard (§3 "Alias layers
/// carry a pointer to their defining table entry").
pub struct AliasLayer {
    inner: BufLayer,
    pub name: String,
}

impl AliasLayer {
    pub fn new(name: String, body: Vec<u8>, flags: LayerFlags) -> Self {
        Self { inner: BufLayer::new(body, flags), name }
    }

    pub fn next_byte(&mut self) -> Option<u8> {
        self.inner.next_byte()
    }

    pub fn unread(&mut self, byte: u8) -> bool {
        self.inner.unread(byte)
    }

    /// The body's last byte, re-injected via a `REREAD` layer when the
    /// body does not end in whitespace (§4.1 `getc`, `ALIAS` transition).
    pub fn last_byte(&self) -> Option<u8> {
        self.inner.buf.last().copied()
    }

    /// True if the body ended in whitespace, which re-enables alias lookup
    /// on the layer beneath once this one pops (§4.1 `getc`).
    pub fn ends_in_whitespace(&self) -> bool {
        matches!(self.inner.buf.last(), Some(b) if b.is_ascii_whitespace())
    }
}

/// One layer of the input source stack.
pub enum SourceLayer {
    File(LineLayer),
    Stdin(LineLayer),
    String(BufLayer),
    CmdlineString(BufLayer),
    Words(WordsLayer),
    Alias(AliasLayer),
    /// A short push-back buffer, LIFO within itself (§3 "Retrace tape").
    Reread(Vec<u8>),
    Eof,
}

impl SourceLayer {
    pub fn flags(&self) -> LayerFlags {
        match self {
            Self::File(l) | Self::Stdin(l) => l.flags,
            Self::String(l) | Self::CmdlineString(l) => l.flags,
            Self::Words(l) => l.inner.flags,
            Self::Alias(l) => l.inner.flags,
            Self::Reread(_) | Self::Eof => LayerFlags::default(),
        }
    }

    pub fn set_has_alias(&mut self, value: bool) {
        match self {
            Self::File(l) | Self::Stdin(l) => l.flags.has_alias = value,
            Self::String(l) | Self::CmdlineString(l) => l.flags.has_alias = value,
            Self::Words(l) => l.inner.flags.has_alias = value,
            Self::Alias(l) => l.inner.flags.has_alias = value,
            Self::Reread(_) | Self::Eof => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_layer_joins_with_single_spaces_and_trailing_newline() {
        let mut layer = WordsLayer::new(&["a", "bb", "ccc"], LayerFlags::default());
        let mut out = Vec::new();
        while let Some(b) = layer.next_byte() {
            out.push(b);
        }
        assert_eq!(out, b"a bb ccc\n");
    }

    #[test]
    fn buf_layer_unread_only_succeeds_at_cursor_boundary() {
        let mut layer = BufLayer::new(b"hi".to_vec(), LayerFlags::default());
        assert_eq!(layer.next_byte(), Some(b'h'));
        assert!(layer.unread(b'h'));
        assert_eq!(layer.next_byte(), Some(b'h'));
        assert_eq!(layer.next_byte(), Some(b'i'));
        // cursor is now at end-of-buffer, not "just after a matching read"
        assert!(!layer.unread(b'x'));
    }

    #[test]
    fn alias_layer_detects_trailing_whitespace() {
        let a = AliasLayer::new("ll".into(), b"ls -l ".to_vec(), LayerFlags::default());
        assert!(a.ends_in_whitespace());
        let b = AliasLayer::new("ll".into(), b"ls -l".to_vec(), LayerFlags::default());
        assert!(!b.ends_in_whitespace());
    }
}
