//! The here-document collector (§4.3): "at end-of-line in BASE, the lexer
//! invokes the collector with all `IoWord`s of type `HERE` queued since
//! the previous newline."
//!
//! Expanding the delimiter word is the (out-of-scope) expansion
//! collaborator's job; the caller passes a callback rather than this
//! crate depending on `nsh-env`.

use crate::Lexer;
use nsh_error::{Flow, LexError};
use nsh_token::{IoMod, IoWord};

impl Lexer {
    /// Collects the bodies for every pending `HERE` redirection queued
    /// since the previous newline, in order. `expand_one` expands a
    /// delimiter word as a plain, unsplit string (§6 `expand_one`).
    pub fn collect_heredocs(
        &mut self,
        pending: &mut [IoWord],
        mut expand_one: impl FnMut(&nsh_token::Word) -> Result<String, Flow>,
    ) -> Result<(), Flow> {
        if pending.len() > self.limits.max_pending_heredocs {
            return Err(LexError::TooManyPendingHeredocs { limit: self.limits.max_pending_heredocs }.into());
        }
        for io in pending.iter_mut() {
            self.collect_one_heredoc(io, &mut expand_one)?;
        }
        Ok(())
    }

    fn collect_one_heredoc(
        &mut self,
        io: &mut IoWord,
        expand_one: &mut impl FnMut(&nsh_token::Word) -> Result<String, Flow>,
    ) -> Result<(), Flow> {
        if io.modifiers.contains(IoMod::HERESTR) {
            let Some(delim) = &io.delim else {
                return Err(nsh_error::ShellError::Internal("herestring with no delim word".into()).into());
            };
            let mut body = expand_one(delim)?.into_bytes();
            body.push(b'\n');
            io.heredoc = Some(body);
            io.delim = None;
            return Ok(());
        }

        let Some(delim) = io.delim.take() else {
            return Err(nsh_error::ShellError::Internal("heredoc with no delim word".into()).into());
        };

        let eval = io.modifiers.contains(IoMod::EVAL);
        let terminator = if eval {
            delim.as_literal_bytes().unwrap_or_default()
        } else {
            expand_one(&delim)?.into_bytes()
        };

        let saved_ignore_bsnl = self.reader.ignore_backslash_newline;
        if !eval {
            // quoted delimiter: suppress backslash-newline folding, the
            // body is stored verbatim and re-lexed during expansion.
            self.reader.ignore_backslash_newline = true;
        }

        let skip_tabs = io.modifiers.contains(IoMod::SKIP);
        let mut body = Vec::new();
        loop {
            let mut line = Vec::new();
            let mut saw_any = false;
            loop {
                let b = self.reader.getc().map_err(Self::io_err)?;
                if b == 0 {
                    if !saw_any && line.is_empty() {
                        self.reader.ignore_backslash_newline = saved_ignore_bsnl;
                        return Err(LexError::UnclosedHeredoc {
                            delim: String::from_utf8_lossy(&terminator).into_owned(),
                        }
                        .into());
                    }
                    break;
                }
                saw_any = true;
                if b == b'\n' {
                    break;
                }
                line.push(b);
            }
            let mut check = &line[..];
            if skip_tabs {
                while let [b'\t', rest @ ..] = check {
                    check = rest;
                }
            }
            if saw_any && check == &terminator[..] {
                break;
            }
            if !saw_any {
                self.reader.ignore_backslash_newline = saved_ignore_bsnl;
                return Err(LexError::UnclosedHeredoc {
                    delim: String::from_utf8_lossy(&terminator).into_owned(),
                }
                .into());
            }
            if skip_tabs {
                body.extend_from_slice(check);
            } else {
                body.extend_from_slice(&line);
            }
            body.push(b'\n');
        }

        self.reader.ignore_backslash_newline = saved_ignore_bsnl;
        io.heredoc = Some(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Lexer;
    use nsh_source::{BufLayer, CharReader, LayerFlags, SourceLayer};
    use nsh_token::{IoType, Word};

    fn lexer_over(bytes: &[u8]) -> Lexer {
        let mut reader = CharReader::new();
        reader.stack().push(SourceLayer::String(BufLayer::new(bytes.to_vec(), LayerFlags::default())));
        Lexer::new(reader)
    }

    fn delim_word(s: &str) -> Word {
        let mut w = Word::new();
        for b in s.bytes() {
            w.push_char(b);
        }
        w.finish();
        w
    }

    #[test]
    fn plain_heredoc_collects_until_exact_terminator() {
        let mut lex = lexer_over(b"hello\nworld\nEOF\nafter");
        let mut io = IoWord::new(0, IoType::Here);
        io.delim = Some(delim_word("EOF"));
        let mut pending = [io];
        lex.collect_heredocs(&mut pending, |w| Ok(w.to_string())).unwrap();
        assert_eq!(pending[0].heredoc.as_deref(), Some(&b"hello\nworld\n"[..]));
    }

    #[test]
    fn skip_strips_leading_tabs_with_dash_variant() {
        let mut lex = lexer_over(b"\t\thello\n\tEOF\n");
        let mut io = IoWord::new(0, IoType::Here);
        io.modifiers |= IoMod::SKIP;
        io.delim = Some(delim_word("EOF"));
        let mut pending = [io];
        lex.collect_heredocs(&mut pending, |w| Ok(w.to_string())).unwrap();
        assert_eq!(pending[0].heredoc.as_deref(), Some(&b"hello\n"[..]));
    }

    #[test]
    fn eof_before_terminator_is_an_error() {
        let mut lex = lexer_over(b"hello\nworld\n");
        let mut io = IoWord::new(0, IoType::Here);
        io.delim = Some(delim_word("EOF"));
        let mut pending = [io];
        let err = lex.collect_heredocs(&mut pending, |w| Ok(w.to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn herestring_appends_newline() {
        let mut lex = lexer_over(b"");
        let mut io = IoWord::new(0, IoType::Here);
        io.modifiers |= IoMod::HERESTR;
        io.delim = Some(delim_word("hi"));
        let mut pending = [io];
        lex.collect_heredocs(&mut pending, |w| Ok(w.to_string())).unwrap();
        assert_eq!(pending[0].heredoc.as_deref(), Some(&b"hi\n"[..]));
    }
}
