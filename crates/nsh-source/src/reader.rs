//! The character reader (§4.1): `getc`/`ungetc` over the source stack with
//! backslash-newline folding, retrace tape, and BOM skip.

use crate::retrace::RetraceTape;
use crate::stack::{Delivery, SourceStack};

/// `getc`/`ungetc` over a [`SourceStack`], folding backslash-newline line
/// continuations and feeding the [`RetraceTape`].
pub struct CharReader {
    stack: SourceStack,
    retrace: RetraceTape,
    /// Suppressed inside single-quote-like lexer states (`SQUOTE`,
    /// `HEREDQUOTE` with a quoted delimiter): a `\` there is literal.
    pub ignore_backslash_newline: bool,
}

impl Default for CharReader {
    fn default() -> Self {
        Self::new()
    }
}

impl CharReader {
    pub fn new() -> Self {
        Self {
            stack: SourceStack::new(),
            retrace: RetraceTape::new(),
            ignore_backslash_newline: false,
        }
    }

    pub fn stack(&mut self) -> &mut SourceStack {
        &mut self.stack
    }

    pub fn retrace(&mut self) -> &mut RetraceTape {
        &mut self.retrace
    }

    /// Returns the next byte, or `0` at end of the whole source stack
    /// (§4.1: "EOF returns 0").
    pub fn getc(&mut self) -> std::io::Result<u8> {
        loop {
            let delivered = match self.stack.next_byte()? {
                Delivery::Byte(b) => b,
                Delivery::Retry => continue,
                Delivery::Eof => return Ok(0),
            };
            if delivered == b'\\' && !self.ignore_backslash_newline {
                let next = self.raw_peek()?;
                if next == Some(b'\n') {
                    // swallow the pair: neither byte is delivered, so
                    // neither is recorded, and we loop for the byte after.
                    continue;
                }
                if let Some(b) = next {
                    self.stack.unread(b);
                }
            }
            self.retrace.record(delivered);
            return Ok(delivered);
        }
    }

    /// Reads one raw byte with no backslash-newline folding, used only to
    /// look past a `\` we just read. Returns `None` at EOF without
    /// recording anything (the byte, if any, is either consumed as part of
    /// the fold or pushed back before the caller's `getc` returns).
    fn raw_peek(&mut self) -> std::io::Result<Option<u8>> {
        loop {
            match self.stack.next_byte()? {
                Delivery::Byte(b) => return Ok(Some(b)),
                Delivery::Retry => continue,
                Delivery::Eof => return Ok(None),
            }
        }
    }

    /// Puts `byte` back; the reader guarantees at least one push-back
    /// (§4.1 `ungetc`). Rolls the retrace tape back by one byte at each
    /// active recorder.
    pub fn ungetc(&mut self, byte: u8) {
        self.stack.unread(byte);
        self.retrace.rollback_one();
    }

    /// Skips a leading UTF-8 byte-order mark, if present.
    pub fn skip_utf8_bom(&mut self) -> std::io::Result<()> {
        let b0 = self.getc()?;
        if b0 != 0xEF {
            if b0 != 0 {
                self.ungetc(b0);
            }
            return Ok(());
        }
        let b1 = self.getc()?;
        if b1 != 0xBB {
            if b1 != 0 {
                self.ungetc(b1);
            }
            self.ungetc(b0);
            return Ok(());
        }
        let b2 = self.getc()?;
        if b2 != 0xBF {
            if b2 != 0 {
                self.ungetc(b2);
            }
            self.ungetc(b1);
            self.ungetc(b0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{BufLayer, LayerFlags, SourceLayer};

    fn reader_over(bytes: &[u8]) -> CharReader {
        let mut r = CharReader::new();
        r.stack()
            .push(SourceLayer::String(BufLayer::new(bytes.to_vec(), LayerFlags::default())));
        r
    }

    #[test]
    fn getc_returns_zero_at_eof() {
        let mut r = reader_over(b"");
        assert_eq!(r.getc().unwrap(), 0);
    }

    #[test]
    fn unget_inverse_property() {
        let mut r = reader_over(b"ab");
        let b = r.getc().unwrap();
        assert_eq!(b, b'a');
        r.ungetc(b);
        assert_eq!(r.getc().unwrap(), b'a');
        assert_eq!(r.getc().unwrap(), b'b');
    }

    #[test]
    fn backslash_newline_is_folded_outside_quote_state() {
        let mut r = reader_over(b"a\\\nb");
        assert_eq!(r.getc().unwrap(), b'a');
        assert_eq!(r.getc().unwrap(), b'b');
        assert_eq!(r.getc().unwrap(), 0);
    }

    #[test]
    fn backslash_newline_is_not_folded_when_suppressed() {
        let mut r = reader_over(b"a\\\nb");
        r.ignore_backslash_newline = true;
        assert_eq!(r.getc().unwrap(), b'a');
        assert_eq!(r.getc().unwrap(), b'\\');
        assert_eq!(r.getc().unwrap(), b'\n');
        assert_eq!(r.getc().unwrap(), b'b');
    }

    #[test]
    fn trailing_backslash_at_eof_is_dropped() {
        let mut r = reader_over(b"a\\");
        assert_eq!(r.getc().unwrap(), b'a');
        assert_eq!(r.getc().unwrap(), 0);
    }

    #[test]
    fn retrace_tape_captures_delivered_bytes_only() {
        let mut r = reader_over(b"a\\\nbc");
        r.retrace().push();
        let _ = r.getc().unwrap(); // 'a'
        let _ = r.getc().unwrap(); // 'b' (the \\\n was folded away)
        let _ = r.getc().unwrap(); // 'c'
        assert_eq!(r.retrace().pop(), Some(b"abc".to_vec()));
    }

    #[test]
    fn bom_is_skipped_once() {
        let mut r = reader_over(&[0xEF, 0xBB, 0xBF, b'x']);
        r.skip_utf8_bom().unwrap();
        assert_eq!(r.getc().unwrap(), b'x');
    }

    #[test]
    fn non_bom_prefix_is_preserved() {
        let mut r = reader_over(b"xy");
        r.skip_utf8_bom().unwrap();
        assert_eq!(r.getc().unwrap(), b'x');
        assert_eq!(r.getc().unwrap(), b'y');
    }
}
