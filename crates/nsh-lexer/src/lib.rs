//! The lexical state machine (§4.2) and here-document collector (§4.3).
//!
//! Drives a [`nsh_source::CharReader`] one byte at a time, folding the
//! result into [`nsh_token::Word`]/[`nsh_token::Token`] values.
//! Collaborators outside this crate's concern — alias lookup, expansion —
//! are narrow traits or closures so this crate stays below `nsh-env` in
//! the dependency order.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

pub mod alias;
pub mod heredoc;
pub mod limits;
pub mod state;

pub use alias::AliasLookup;
pub use limits::LexerLimits;
pub use state::{ADelimDescriptor, LexState, StateFrame};

use bitflags::bitflags;
use nsh_error::{Flow, LexError, ShellError};
use nsh_position::ByteSpan;
use nsh_source::CharReader;
use nsh_token::{
    CommandSubKind, IoMod, IoType, IoWord, Keyword, PatternOp, QuoteKind, Token, TokenKind, Word, WordPiece,
};
use tracing::trace;

bitflags! {
    /// Lexer-mode flags selecting `next_token`'s behavior (§4.2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LexFlags: u32 {
        /// No splitting: used while recursing inside `$(...)`.
        const ONEWORD   = 1 << 0;
        /// Body of `((...))`, pre-wrapped in double quotes.
        const LETEXPR   = 1 << 1;
        /// Parsing the delimiter of `<<`/`<<-`/`<<<`.
        const HEREDELIM = 1 << 2;
        /// Accept `[...]=` array subscripts on an assignment word.
        const VARASN    = 1 << 3;
        const ARRAYVAR  = 1 << 4;
        /// Perform alias substitution on identifier words.
        const ALIAS     = 1 << 5;
        /// Resolve reserved words.
        const KEYWORD   = 1 << 6;
        const ESACONLY  = 1 << 7;
        /// Hide plain newlines from the caller.
        const CONTIN    = 1 << 8;
        /// Reading a here-document body with substitutions.
        const HEREDOC   = 1 << 9;
        const LQCHAR    = 1 << 10;
    }
}

/// The lexical state machine driving a [`CharReader`] (§4.2).
pub struct Lexer {
    pub(crate) reader: CharReader,
    states: Vec<StateFrame>,
    pub(crate) limits: LexerLimits,
    line_no: u32,
    pos: usize,
    pending_heredocs: Vec<IoWord>,
}

impl Lexer {
    pub fn new(reader: CharReader) -> Self {
        Self::with_limits(reader, LexerLimits::default())
    }

    pub fn with_limits(reader: CharReader, limits: LexerLimits) -> Self {
        Self {
            reader,
            states: Vec::new(),
            limits,
            line_no: 1,
            pos: 0,
            pending_heredocs: Vec::new(),
        }
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    /// `IOWord`s of type `HERE` queued since the previous newline, not yet
    /// collected by [`Self::collect_heredocs`] (§4.3).
    pub fn take_pending_heredocs(&mut self) -> Vec<IoWord> {
        std::mem::take(&mut self.pending_heredocs)
    }

    fn io_err(err: std::io::Error) -> Flow {
        ShellError::Internal(format!("source read failed: {err}")).into()
    }

    fn getc(&mut self) -> Result<u8, Flow> {
        let b = self.reader.getc().map_err(Self::io_err)?;
        if b != 0 {
            self.pos += 1;
        }
        Ok(b)
    }

    fn ungetc(&mut self, b: u8) {
        if b != 0 {
            self.reader.ungetc(b);
            self.pos -= 1;
        }
    }

    fn push_state(&mut self, state: LexState) -> Result<(), Flow> {
        if self.states.len() >= self.limits.max_state_depth {
            return Err(LexError::StateDepthExceeded { limit: self.limits.max_state_depth }.into());
        }
        trace!(?state, depth = self.states.len() + 1, "lex state pushed");
        self.states.push(StateFrame::new(state));
        Ok(())
    }

    fn pop_state(&mut self) -> Option<StateFrame> {
        let frame = self.states.pop();
        trace!(depth = self.states.len(), "lex state popped");
        frame
    }

    fn inside_dquote(&self) -> bool {
        self.states.iter().any(|f| f.state == LexState::DQuote)
    }

    fn check_word_len(&self, word: &Word) -> Result<(), Flow> {
        if word.pieces().len() > self.limits.max_word_bytes {
            return Err(LexError::WordTooLong { limit: self.limits.max_word_bytes }.into());
        }
        Ok(())
    }

    /// Entry point (§4.2): `next_token(flags) -> Token`. Restarts itself
    /// internally after an alias substitution (`Again`), so the caller
    /// always sees a real token.
    pub fn next_token(&mut self, flags: LexFlags, aliases: Option<&dyn AliasLookup>) -> Result<Token, Flow> {
        loop {
            if let Some(tok) = self.next_token_once(flags, aliases)? {
                return Ok(tok);
            }
        }
    }

    fn next_token_once(&mut self, flags: LexFlags, aliases: Option<&dyn AliasLookup>) -> Result<Option<Token>, Flow> {
        if flags.contains(LexFlags::HEREDELIM) {
            return self.scan_heredelim().map(Some);
        }
        if flags.contains(LexFlags::LETEXPR) {
            return self.scan_letexpr().map(Some);
        }

        self.skip_blanks_and_comments()?;
        let start = self.pos;
        let c = self.getc()?;

        if c == 0 {
            return Ok(Some(Token::new(TokenKind::Eof, ByteSpan::new(start, self.pos))));
        }
        if c == b'\n' {
            self.line_no += 1;
            if flags.contains(LexFlags::CONTIN) {
                return Ok(None);
            }
            return Ok(Some(Token::new(TokenKind::Newline, ByteSpan::new(start, self.pos))));
        }
        if !flags.contains(LexFlags::ONEWORD) && is_operator_start(c) {
            return self.scan_operator(c, start).map(Some);
        }

        self.ungetc(c);
        self.scan_word(flags, aliases, start)
    }

    fn skip_blanks_and_comments(&mut self) -> Result<(), Flow> {
        loop {
            let c = self.getc()?;
            match c {
                b' ' | b'\t' => continue,
                b'#' => loop {
                    let c = self.getc()?;
                    if c == 0 || c == b'\n' {
                        self.ungetc(c);
                        break;
                    }
                },
                _ => {
                    self.ungetc(c);
                    return Ok(());
                }
            }
        }
    }

    fn scan_operator(&mut self, first: u8, start: usize) -> Result<Token, Flow> {
        let kind = match first {
            b';' => {
                let c = self.getc()?;
                match c {
                    b';' => TokenKind::Break,
                    b'|' => TokenKind::BreakEv,
                    b'&' => TokenKind::BreakFt,
                    _ => {
                        self.ungetc(c);
                        TokenKind::Semi
                    }
                }
            }
            b'&' => {
                let c = self.getc()?;
                if c == b'&' {
                    TokenKind::LogAnd
                } else if c == b'>' {
                    TokenKind::Redir(self.finish_redir(1, IoType::Write, IoMod::BASH, start)?)
                } else {
                    self.ungetc(c);
                    TokenKind::Amp
                }
            }
            b'|' => {
                let c = self.getc()?;
                if c == b'&' {
                    TokenKind::CoprocPipe
                } else {
                    self.ungetc(c);
                    TokenKind::Pipe
                }
            }
            b'(' => {
                let c = self.getc()?;
                if c == b'(' {
                    self.push_state(LexState::LetParen)?;
                    TokenKind::DLParen
                } else {
                    self.ungetc(c);
                    TokenKind::LParen
                }
            }
            b')' => TokenKind::RParen,
            b'<' => return self.scan_redir_operator(0, b'<', start),
            b'>' => return self.scan_redir_operator(1, b'>', start),
            _ => unreachable!("is_operator_start admitted an unhandled byte"),
        };
        Ok(Token::new(kind, ByteSpan::new(start, self.pos)))
    }

    fn scan_redir_operator(&mut self, default_unit: i32, op: u8, start: usize) -> Result<Token, Flow> {
        let c = self.getc()?;
        let (io_type, modifiers) = if op == b'<' {
            match c {
                b'<' => {
                    let c2 = self.getc()?;
                    if c2 == b'<' {
                        (IoType::Here, IoMod::HERESTR)
                    } else if c2 == b'-' {
                        (IoType::Here, IoMod::SKIP | IoMod::EVAL)
                    } else {
                        self.ungetc(c2);
                        (IoType::Here, IoMod::EVAL)
                    }
                }
                b'>' => (IoType::Rdwr, IoMod::empty()),
                b'&' => (IoType::Dup, IoMod::RDUP),
                _ => {
                    self.ungetc(c);
                    (IoType::Read, IoMod::empty())
                }
            }
        } else {
            match c {
                b'>' => (IoType::Cat, IoMod::empty()),
                b'|' => (IoType::Write, IoMod::CLOB),
                b'&' => (IoType::Dup, IoMod::empty()),
                _ => {
                    self.ungetc(c);
                    (IoType::Write, IoMod::empty())
                }
            }
        };
        let io = self.finish_redir(default_unit, io_type, modifiers, start)?;
        Ok(Token::new(TokenKind::Redir(io), ByteSpan::new(start, self.pos)))
    }

    /// Reads the redirection's target/delimiter word and builds the
    /// `IOWord`, queuing `HERE` redirections for §4.3 collection.
    fn finish_redir(&mut self, unit: i32, io_type: IoType, modifiers: IoMod, start: usize) -> Result<IoWord, Flow> {
        let mut io = IoWord::new(unit, io_type);
        io.modifiers |= modifiers;
        self.skip_blanks_and_comments()?;
        if io_type == IoType::Here {
            match self.scan_heredelim()?.kind {
                TokenKind::Word(w) => io.delim = Some(w),
                _ => return Err(LexError::BadSubstitution.into()),
            }
            self.pending_heredocs.push(io.clone());
        } else {
            match self.scan_word(LexFlags::ONEWORD, None, start)? {
                Some(Token { kind: TokenKind::Word(w), .. }) => io.name = Some(w),
                _ => return Err(LexError::BadSubstitution.into()),
            }
        }
        Ok(io)
    }

    /// Scans an ordinary word, recognising a leading-digit redirection
    /// prefix (`2>&1`) by reinterpreting the digits as the unit once a
    /// `<`/`>` is reached with nothing else in the word so far.
    fn scan_word(
        &mut self,
        flags: LexFlags,
        aliases: Option<&dyn AliasLookup>,
        start: usize,
    ) -> Result<Option<Token>, Flow> {
        let mut word = Word::new();
        let mut only_digits = true;

        loop {
            let c = self.getc()?;
            if c == 0 {
                break;
            }
            match c {
                b' ' | b'\t' | b'\n' => {
                    self.ungetc(c);
                    break;
                }
                b'|' | b'&' | b';' | b'(' | b')' => {
                    self.ungetc(c);
                    break;
                }
                b'<' | b'>' if word.is_empty_word() || only_digits => {
                    let unit: Option<i32> = word.as_literal_bytes().and_then(|b| String::from_utf8(b).ok()).and_then(|s| s.parse().ok());
                    let tok = self.scan_operator(c, start)?;
                    return Ok(Some(rewrite_redir_unit(tok, unit)));
                }
                b'<' | b'>' => {
                    self.ungetc(c);
                    break;
                }
                b'\\' => {
                    let n = self.getc()?;
                    if n != 0 {
                        word.push_quoted(n);
                        only_digits = false;
                    }
                }
                b'\'' => {
                    self.scan_squote(&mut word)?;
                    only_digits = false;
                }
                b'"' => {
                    self.scan_dquote(&mut word)?;
                    only_digits = false;
                }
                b'`' => {
                    self.scan_backquote(&mut word)?;
                    only_digits = false;
                }
                b'$' => {
                    self.scan_dollar(&mut word, flags)?;
                    only_digits = false;
                }
                c if PatternOp::from_char(c).is_some() => {
                    let Some(op) = PatternOp::from_char(c) else { unreachable!() };
                    let n = self.getc()?;
                    if n == b'(' {
                        word.push(WordPiece::OpenPat(op));
                        self.push_state(LexState::Pattern)?;
                        self.scan_pattern_body(&mut word)?;
                    } else {
                        self.ungetc(n);
                        word.push_char(c);
                    }
                    only_digits = false;
                }
                _ => {
                    if !c.is_ascii_digit() {
                        only_digits = false;
                    }
                    word.push_char(c);
                }
            }
            self.check_word_len(&word)?;
        }
        word.finish();

        if flags.contains(LexFlags::KEYWORD) {
            if let Some(id) = word.as_plain_identifier() {
                if let Some(kw) = Keyword::lookup(&id) {
                    return Ok(Some(Token::new(TokenKind::Keyword(kw), ByteSpan::new(start, self.pos))));
                }
            }
        }

        if flags.contains(LexFlags::ALIAS) {
            if let (Some(id), Some(table)) = (word.as_plain_identifier(), aliases) {
                if let Some(body) = table.lookup_body(&id) {
                    if !self.next_is_function_paren()? {
                        self.push_alias(id, body)?;
                        return Ok(None);
                    }
                }
            }
        }

        Ok(Some(Token::new(TokenKind::Word(word), ByteSpan::new(start, self.pos))))
    }

    /// True if the current layer's next two non-consumed characters are
    /// `()` — a following POSIX function definition wins over alias
    /// substitution (§4.2 "Keyword/alias resolution").
    fn next_is_function_paren(&mut self) -> Result<bool, Flow> {
        let a = self.getc()?;
        if a != b'(' {
            self.ungetc(a);
            return Ok(false);
        }
        let b = self.getc()?;
        self.ungetc(b);
        self.ungetc(a);
        Ok(b == b')')
    }

    fn push_alias(&mut self, name: String, body: String) -> Result<(), Flow> {
        use nsh_source::{AliasLayer, LayerFlags, SourceLayer};
        let layer = AliasLayer::new(name, body.into_bytes(), LayerFlags::default());
        self.reader.stack().push_alias_checked(SourceLayer::Alias(layer))
    }

    fn scan_squote(&mut self, word: &mut Word) -> Result<(), Flow> {
        word.push(WordPiece::OpenQuote(QuoteKind::Single));
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedQuote.into());
            }
            if c == b'\'' {
                break;
            }
            word.push_quoted(c);
        }
        word.push(WordPiece::CloseQuote(QuoteKind::Single));
        Ok(())
    }

    fn scan_dquote(&mut self, word: &mut Word) -> Result<(), Flow> {
        word.push(WordPiece::OpenQuote(QuoteKind::Double));
        self.push_state(LexState::DQuote)?;
        let result = self.scan_dquote_body(word);
        self.pop_state();
        result?;
        word.push(WordPiece::CloseQuote(QuoteKind::Double));
        Ok(())
    }

    /// Shared by `$"..."` and `"..."`: only `\` before `"`, `\`, `$`, or
    /// `` ` `` produces a `Quoted` escape, else the backslash is literal
    /// (§4.2 "Escaping").
    fn scan_dquote_body(&mut self, word: &mut Word) -> Result<(), Flow> {
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedQuote.into());
            }
            match c {
                b'"' => break,
                b'\\' => {
                    let n = self.getc()?;
                    match n {
                        b'"' | b'\\' | b'$' | b'`' => word.push_quoted(n),
                        0 => {}
                        _ => {
                            word.push_char(b'\\');
                            word.push_char(n);
                        }
                    }
                }
                b'$' => self.scan_dollar(word, LexFlags::empty())?,
                b'`' => self.scan_backquote(word)?,
                _ => word.push_quoted(c),
            }
        }
        Ok(())
    }

    fn scan_dollar_squote(&mut self, word: &mut Word) -> Result<(), Flow> {
        word.push(WordPiece::OpenQuote(QuoteKind::DollarSingle));
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedQuote.into());
            }
            if c == b'\'' {
                break;
            }
            if c == b'\\' {
                for b in self.decode_ansi_c_escape()? {
                    word.push_quoted(b);
                }
            } else {
                word.push_quoted(c);
            }
        }
        word.push(WordPiece::CloseQuote(QuoteKind::DollarSingle));
        Ok(())
    }

    /// ANSI-C escape decoding for `$'...'` (§4.2 "Escaping"): octal, `\x`,
    /// `\u`/`\U`, named control sequences. Multi-byte code points are
    /// handed back as their UTF-8 encoding.
    fn decode_ansi_c_escape(&mut self) -> Result<Vec<u8>, Flow> {
        let c = self.getc()?;
        let simple = match c {
            b'n' => Some(b'\n'),
            b't' => Some(b'\t'),
            b'r' => Some(b'\r'),
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'e' | b'E' => Some(0x1b),
            b'f' => Some(0x0c),
            b'v' => Some(0x0b),
            b'\\' => Some(b'\\'),
            b'\'' => Some(b'\''),
            b'"' => Some(b'"'),
            _ => None,
        };
        if let Some(b) = simple {
            return Ok(vec![b]);
        }
        match c {
            b'x' => Ok(vec![self.read_hex_digits(2)? as u8]),
            b'u' => {
                let v = self.read_hex_digits(4)?;
                Ok(char::from_u32(v).map(|c| c.to_string().into_bytes()).unwrap_or_else(|| vec![b'?']))
            }
            b'U' => {
                let v = self.read_hex_digits(8)?;
                Ok(char::from_u32(v).map(|c| c.to_string().into_bytes()).unwrap_or_else(|| vec![b'?']))
            }
            b'0'..=b'7' => {
                let mut v: u32 = u32::from(c - b'0');
                for _ in 0..2 {
                    let d = self.getc()?;
                    if (b'0'..=b'7').contains(&d) {
                        v = v * 8 + u32::from(d - b'0');
                    } else {
                        self.ungetc(d);
                        break;
                    }
                }
                Ok(vec![v as u8])
            }
            b'c' => {
                let ctrl = self.getc()?;
                Ok(vec![ctrl.to_ascii_uppercase() ^ 0x40])
            }
            0 => Ok(vec![b'\\']),
            other => Ok(vec![b'\\', other]),
        }
    }

    fn read_hex_digits(&mut self, max: u32) -> Result<u32, Flow> {
        let mut v: u32 = 0;
        let mut n = 0;
        while n < max {
            let h = self.getc()?;
            match (h as char).to_digit(16) {
                Some(d) => {
                    v = v * 16 + d;
                    n += 1;
                }
                None => {
                    self.ungetc(h);
                    break;
                }
            }
        }
        Ok(v)
    }

    /// `` `...` `` (§4.2 "BASE -> backquote"): the frame records whether it
    /// sits inside an enclosing `DQUOTE`, because there `\"` un-escapes to
    /// `"` within the captured body.
    fn scan_backquote(&mut self, word: &mut Word) -> Result<(), Flow> {
        let in_dquote = self.inside_dquote();
        self.push_state(LexState::BQuote)?;
        if let Some(frame) = self.states.last_mut() {
            frame.bquote_in_dquote = in_dquote;
        }
        let captured = self.scan_backquote_body(in_dquote);
        self.pop_state();
        let text = String::from_utf8_lossy(&captured?).into_owned();
        word.push(WordPiece::CommandSub { kind: CommandSubKind::ComSub, text });
        Ok(())
    }

    /// Copies the raw text of a `` `...` `` command substitution up to the
    /// closing backtick. Inside a double-quoted backquote, `\"` un-escapes
    /// to `"` (it would otherwise terminate the enclosing double quote);
    /// every other backslash pair, including `\\`, is copied verbatim for
    /// the nested re-lex to interpret (§4.2 "BQuote").
    fn scan_backquote_body(&mut self, in_dquote: bool) -> Result<Vec<u8>, Flow> {
        let mut out = Vec::new();
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedQuote.into());
            }
            if c == b'`' {
                return Ok(out);
            }
            if c == b'\\' {
                let n = self.getc()?;
                if n == 0 {
                    return Err(LexError::UnclosedQuote.into());
                }
                if in_dquote && n == b'"' {
                    out.push(b'"');
                } else {
                    out.push(b'\\');
                    out.push(n);
                }
                continue;
            }
            out.push(c);
        }
    }

    /// `$` dispatch (§4.2 "BASE -> substitution").
    fn scan_dollar(&mut self, word: &mut Word, flags: LexFlags) -> Result<(), Flow> {
        let c = self.getc()?;
        match c {
            b'\'' => self.scan_dollar_squote(word),
            b'"' => {
                word.push(WordPiece::OpenQuote(QuoteKind::Double));
                self.scan_dquote_body(word)?;
                word.push(WordPiece::CloseQuote(QuoteKind::Double));
                Ok(())
            }
            b'(' => {
                let c2 = self.getc()?;
                if c2 == b'(' {
                    self.scan_dollar_dparen(word)
                } else {
                    self.ungetc(c2);
                    self.scan_comsub(word)
                }
            }
            b'{' => self.scan_brace_subst(word, flags),
            0 => {
                word.push_char(b'$');
                Ok(())
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                word.push_char(b'$');
                word.push_char(c);
                self.scan_variable_name_tail(word)
            }
            c if c.is_ascii_digit() || matches!(c, b'@' | b'*' | b'#' | b'?' | b'$' | b'!' | b'-') => {
                word.push_char(b'$');
                word.push_char(c);
                Ok(())
            }
            _ => {
                word.push_char(b'$');
                self.ungetc(c);
                Ok(())
            }
        }
    }

    fn scan_variable_name_tail(&mut self, word: &mut Word) -> Result<(), Flow> {
        loop {
            let c = self.getc()?;
            if c.is_ascii_alphanumeric() || c == b'_' {
                word.push_char(c);
            } else {
                self.ungetc(c);
                break;
            }
        }
        Ok(())
    }

    /// `$(...)` (§4.2): captures the body verbatim via the retrace tape;
    /// re-lexing/parsing it recursively is the (out-of-scope) parser's job
    /// (§9 `sub_parse`), triggered downstream from the captured text.
    fn scan_comsub(&mut self, word: &mut Word) -> Result<(), Flow> {
        self.reader.retrace().push();
        let result = self.scan_paren_balanced_body();
        let captured = self.reader.retrace().pop().unwrap_or_default();
        result?;
        let text = String::from_utf8_lossy(&captured[..captured.len().saturating_sub(1)]).into_owned();
        word.push(WordPiece::CommandSub { kind: CommandSubKind::ComSub, text });
        Ok(())
    }

    fn scan_paren_balanced_body(&mut self) -> Result<(), Flow> {
        let mut depth: u32 = 1;
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedSubst.into());
            }
            match c {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                b'\\' => {
                    let n = self.getc()?;
                    if n == 0 {
                        return Err(LexError::UnclosedSubst.into());
                    }
                }
                b'\'' => loop {
                    let q = self.getc()?;
                    if q == 0 {
                        return Err(LexError::UnclosedQuote.into());
                    }
                    if q == b'\'' {
                        break;
                    }
                },
                _ => {}
            }
        }
    }

    fn scan_dollar_dparen(&mut self, word: &mut Word) -> Result<(), Flow> {
        self.push_state(LexState::DollarDParen)?;
        self.reader.retrace().push();
        let result = self.scan_dparen_balanced_body();
        let captured = self.reader.retrace().pop().unwrap_or_default();
        self.pop_state();
        result?;
        let text = String::from_utf8_lossy(&captured[..captured.len().saturating_sub(2)]).into_owned();
        word.push(WordPiece::CommandSub { kind: CommandSubKind::ArithSub, text });
        Ok(())
    }

    fn scan_dparen_balanced_body(&mut self) -> Result<(), Flow> {
        let mut depth: u32 = 2;
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedSubst.into());
            }
            match c {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// `${...}` dispatch (§4.2 "`${...}` parsing", §4.2.1 variable-head
    /// scanner).
    fn scan_brace_subst(&mut self, word: &mut Word, flags: LexFlags) -> Result<(), Flow> {
        let _ = flags;
        let lookahead = self.getc()?;
        if lookahead == b'|' {
            return self.scan_recursive_brace(word, CommandSubKind::ValSub);
        }
        if matches!(lookahead, b' ' | b'\t' | b'\n') {
            self.ungetc(lookahead);
            return self.scan_recursive_brace(word, CommandSubKind::FunSub);
        }
        self.ungetc(lookahead);

        word.push(WordPiece::OpenSubst);
        self.push_state(if self.inside_dquote() { LexState::QBrace } else { LexState::Brace })?;
        let result = self.scan_brace_subst_body(word);
        self.pop_state();
        result?;
        word.push(WordPiece::CloseSubst);
        Ok(())
    }

    fn scan_brace_subst_body(&mut self, word: &mut Word) -> Result<(), Flow> {
        self.scan_variable_head(word)?;
        let op = self.getc()?;
        match op {
            b'}' => Ok(()),
            b':' => {
                let op2 = self.getc()?;
                if op2 == b':' {
                    word.push(WordPiece::ADelim(b':'));
                    self.scan_adelim_subwords(word, b':', 2)
                } else {
                    word.push_char(b':');
                    self.ungetc(op2);
                    self.scan_to_close_subst(word)
                }
            }
            b'/' => {
                word.push(WordPiece::ADelim(b'/'));
                let op2 = self.getc()?;
                if op2 == b'/' {
                    word.push(WordPiece::ADelim(b'/'));
                } else {
                    self.ungetc(op2);
                }
                self.scan_adelim_subwords(word, b'/', 2)
            }
            b'#' | b'%' => {
                let doubled = self.getc()?;
                if doubled != op {
                    self.ungetc(doubled);
                }
                word.push_char(op);
                if doubled == op {
                    word.push_char(op);
                }
                self.scan_to_close_subst(word)
            }
            0 => Err(LexError::UnclosedSubst.into()),
            c => {
                word.push_char(c);
                self.scan_to_close_subst(word)
            }
        }
    }

    fn scan_recursive_brace(&mut self, word: &mut Word, kind: CommandSubKind) -> Result<(), Flow> {
        self.reader.retrace().push();
        let mut depth: u32 = 1;
        let result = (|| -> Result<(), Flow> {
            loop {
                let c = self.getc()?;
                if c == 0 {
                    return Err(LexError::UnclosedSubst.into());
                }
                match c {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(());
                        }
                    }
                    _ => {}
                }
            }
        })();
        let captured = self.reader.retrace().pop().unwrap_or_default();
        result?;
        let text = String::from_utf8_lossy(&captured[..captured.len().saturating_sub(1)]).into_owned();
        word.push(WordPiece::CommandSub { kind, text });
        Ok(())
    }

    /// §4.2.1: leading `#`/`!`/`%`, then an identifier (`[subscript]`),
    /// digit run, or single special-variable character. Terminates when the
    /// next character does not extend the form; that character is pushed
    /// back.
    fn scan_variable_head(&mut self, word: &mut Word) -> Result<(), Flow> {
        let lead = self.getc()?;
        if matches!(lead, b'#' | b'!' | b'%') {
            word.push_char(lead);
        } else {
            self.ungetc(lead);
        }
        let c = self.getc()?;
        if c.is_ascii_alphabetic() || c == b'_' {
            word.push_char(c);
            self.scan_variable_name_tail(word)?;
            let open = self.getc()?;
            if open == b'[' {
                word.push_char(b'[');
                self.scan_bracket_balanced(word)?;
            } else {
                self.ungetc(open);
            }
        } else if c.is_ascii_digit() {
            word.push_char(c);
            loop {
                let d = self.getc()?;
                if d.is_ascii_digit() {
                    word.push_char(d);
                } else {
                    self.ungetc(d);
                    break;
                }
            }
        } else if c != 0 {
            word.push_char(c);
        } else {
            return Err(LexError::BadSubstitution.into());
        }
        Ok(())
    }

    fn scan_bracket_balanced(&mut self, word: &mut Word) -> Result<(), Flow> {
        let mut depth = 1u32;
        loop {
            let b = self.getc()?;
            if b == 0 {
                return Err(LexError::UnclosedSubst.into());
            }
            match b {
                b'[' => depth += 1,
                b']' => {
                    depth -= 1;
                    if depth == 0 {
                        word.push_char(b']');
                        return Ok(());
                    }
                }
                _ => {}
            }
            word.push_char(b);
        }
    }

    /// `ADELIM` (§4.2): tracks nesting so only top-level occurrences of its
    /// delimiter terminate a sub-word, e.g. the two `:`-separated fields of
    /// `${var:off:len}`.
    fn scan_adelim_subwords(&mut self, word: &mut Word, delimiter: u8, remaining: u32) -> Result<(), Flow> {
        self.push_state(LexState::ADelim)?;
        if let Some(frame) = self.states.last_mut() {
            frame.adelim = Some(ADelimDescriptor { delimiter, remaining });
        }
        let result = self.scan_adelim_body(word, delimiter);
        self.pop_state();
        result
    }

    fn scan_adelim_body(&mut self, word: &mut Word, delimiter: u8) -> Result<(), Flow> {
        let mut depth = 0u32;
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedSubst.into());
            }
            match c {
                b'{' | b'(' => {
                    depth += 1;
                    word.push_char(c);
                }
                b')' => {
                    depth = depth.saturating_sub(1);
                    word.push_char(c);
                }
                b'}' if depth == 0 => {
                    self.ungetc(c);
                    return Ok(());
                }
                b'}' => {
                    depth -= 1;
                    word.push_char(c);
                }
                c if depth == 0 && c == delimiter => word.push(WordPiece::ADelim(c)),
                b'\\' => {
                    let n = self.getc()?;
                    if n != 0 {
                        word.push_quoted(n);
                    }
                }
                _ => word.push_char(c),
            }
        }
    }

    fn scan_to_close_subst(&mut self, word: &mut Word) -> Result<(), Flow> {
        let mut depth = 0u32;
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedSubst.into());
            }
            match c {
                b'{' => {
                    depth += 1;
                    word.push_char(c);
                }
                b'}' if depth == 0 => {
                    self.ungetc(c);
                    return Ok(());
                }
                b'}' => {
                    depth -= 1;
                    word.push_char(c);
                }
                b'\\' => {
                    let n = self.getc()?;
                    if n != 0 {
                        word.push_quoted(n);
                    }
                }
                b'"' => self.scan_dquote(word)?,
                b'\'' => self.scan_squote(word)?,
                _ => word.push_char(c),
            }
        }
    }

    /// Extended-glob pattern body (`PATTERN` state): balances `(`/`)`,
    /// `|` emits `SPAT`, the closing `)` emits `CPAT` and pops.
    fn scan_pattern_body(&mut self, word: &mut Word) -> Result<(), Flow> {
        let result = self.scan_pattern_inner(word);
        self.pop_state();
        result
    }

    fn scan_pattern_inner(&mut self, word: &mut Word) -> Result<(), Flow> {
        let mut depth = 0u32;
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedSubst.into());
            }
            match c {
                b'(' => {
                    depth += 1;
                    word.push_char(c);
                }
                b')' if depth == 0 => {
                    word.push(WordPiece::ClosePat);
                    return Ok(());
                }
                b')' => {
                    depth -= 1;
                    word.push_char(c);
                }
                b'|' if depth == 0 => word.push(WordPiece::SepPat),
                b'\\' => {
                    let n = self.getc()?;
                    if n != 0 {
                        word.push_quoted(n);
                    }
                }
                _ => word.push_char(c),
            }
        }
    }

    /// `HEREDELIM` (§4.2): accepts quoted (`\`, `'`, `"`, `$'`) delimiters.
    /// The caller derives `IOEVAL` from whether the returned word contains
    /// any quoting marker at all (an entirely-`Char` word is unquoted).
    fn scan_heredelim(&mut self) -> Result<Token, Flow> {
        let start = self.pos;
        self.skip_blanks_and_comments()?;
        let mut word = Word::new();
        loop {
            let c = self.getc()?;
            match c {
                0 | b' ' | b'\t' | b'\n' => {
                    self.ungetc(c);
                    break;
                }
                b'\\' => {
                    let n = self.getc()?;
                    if n != 0 {
                        word.push_quoted(n);
                    }
                }
                b'\'' => self.scan_squote(&mut word)?,
                b'"' => self.scan_dquote(&mut word)?,
                b'$' if self.peek_is(b'\'')? => {
                    let _ = self.getc()?;
                    self.scan_dollar_squote(&mut word)?;
                }
                _ => word.push_char(c),
            }
        }
        word.finish();
        Ok(Token::new(TokenKind::Word(word), ByteSpan::new(start, self.pos)))
    }

    fn peek_is(&mut self, expect: u8) -> Result<bool, Flow> {
        let c = self.getc()?;
        self.ungetc(c);
        Ok(c == expect)
    }

    /// `LETPAREN`/`((...))` body (§4.2 "`LETPAREN` balances `(` and `)`"),
    /// pre-wrapped in double quotes per `LETEXPR`. A `)` not immediately
    /// followed by a second `)` means the opener was actually `(subshell)`;
    /// the collected text is pushed back and the caller sees a bare `(`.
    fn scan_letexpr(&mut self) -> Result<Token, Flow> {
        let start = self.pos;
        let mut word = Word::new();
        word.push(WordPiece::OpenQuote(QuoteKind::Double));
        let mut depth = 0u32;
        loop {
            let c = self.getc()?;
            if c == 0 {
                return Err(LexError::UnclosedSubst.into());
            }
            match c {
                b'(' => {
                    depth += 1;
                    word.push_char(c);
                }
                b')' if depth == 0 => {
                    let c2 = self.getc()?;
                    if c2 == b')' {
                        self.pop_state();
                        break;
                    }
                    self.ungetc(c2);
                    self.ungetc(c);
                    self.reinject_as_subshell(&word)?;
                    return Ok(Token::new(TokenKind::LParen, ByteSpan::new(start, self.pos)));
                }
                b')' => {
                    depth -= 1;
                    word.push_char(c);
                }
                b'\\' => {
                    let n = self.getc()?;
                    if n != 0 {
                        word.push_quoted(n);
                    }
                }
                b'"' => self.scan_dquote(&mut word)?,
                b'\'' => self.scan_squote(&mut word)?,
                _ => word.push_char(c),
            }
        }
        word.push(WordPiece::CloseQuote(QuoteKind::Double));
        word.finish();
        Ok(Token::new(TokenKind::Word(word), ByteSpan::new(start, self.pos)))
    }

    /// Pushes the text collected so far as a one-shot `REREAD`-style layer
    /// so the caller's next read sees it again, having decided the `((`
    /// opener was really `(` followed by a parenthesised subshell.
    fn reinject_as_subshell(&mut self, word: &Word) -> Result<(), Flow> {
        self.pop_state();
        if let Some(bytes) = word.as_literal_bytes() {
            for b in bytes.into_iter().rev() {
                self.ungetc(b);
            }
        }
        Ok(())
    }
}

fn is_operator_start(c: u8) -> bool {
    matches!(c, b'|' | b'&' | b';' | b'<' | b'>' | b'(' | b')')
}

fn rewrite_redir_unit(tok: Token, unit: Option<i32>) -> Token {
    match (tok, unit) {
        (Token { kind: TokenKind::Redir(mut io), span }, Some(unit)) => {
            io.unit = unit;
            Token::new(TokenKind::Redir(io), span)
        }
        (tok, _) => tok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsh_source::{BufLayer, LayerFlags, SourceLayer};

    fn lexer_over(bytes: &[u8]) -> Lexer {
        let mut reader = CharReader::new();
        reader.stack().push(SourceLayer::String(BufLayer::new(bytes.to_vec(), LayerFlags::default())));
        Lexer::new(reader)
    }

    fn word_text(tok: &Token) -> String {
        match &tok.kind {
            TokenKind::Word(w) => w.to_string(),
            other => panic!("expected Word, got {other:?}"),
        }
    }

    #[test]
    fn plain_word_is_scanned_verbatim() {
        let mut lex = lexer_over(b"hello");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        assert_eq!(word_text(&tok), "hello");
    }

    #[test]
    fn blank_and_comment_are_skipped() {
        let mut lex = lexer_over(b"  # a comment\nhello");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        assert!(matches!(tok.kind, TokenKind::Newline));
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        assert_eq!(word_text(&tok), "hello");
    }

    #[test]
    fn single_quotes_suppress_all_interpretation() {
        let mut lex = lexer_over(b"'a$b\"c'");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        match &tok.kind {
            TokenKind::Word(w) => assert_eq!(w.as_literal_bytes().as_deref(), Some(&b"a$b\"c"[..])),
            other => panic!("expected Word, got {other:?}"),
        }
    }

    #[test]
    fn double_ampersand_is_logand() {
        let mut lex = lexer_over(b"&&");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        assert!(matches!(tok.kind, TokenKind::LogAnd));
    }

    #[test]
    fn double_paren_opens_arith_command() {
        let mut lex = lexer_over(b"((");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        assert!(matches!(tok.kind, TokenKind::DLParen));
    }

    #[test]
    fn redir_append_is_recognised() {
        let mut lex = lexer_over(b">>out");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        match tok.kind {
            TokenKind::Redir(io) => assert_eq!(io.io_type, IoType::Cat),
            other => panic!("expected Redir, got {other:?}"),
        }
    }

    #[test]
    fn numbered_fd_prefix_becomes_redir_unit() {
        let mut lex = lexer_over(b"2>&1");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        match tok.kind {
            TokenKind::Redir(io) => {
                assert_eq!(io.io_type, IoType::Dup);
                assert_eq!(io.unit, 2);
            }
            other => panic!("expected Redir, got {other:?}"),
        }
    }

    #[test]
    fn dollar_name_is_kept_in_word() {
        let mut lex = lexer_over(b"$HOME/bin");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        assert_eq!(word_text(&tok), "$HOME/bin");
    }

    #[test]
    fn keyword_flag_resolves_reserved_words() {
        let mut lex = lexer_over(b"if");
        let tok = lex.next_token(LexFlags::KEYWORD, None).unwrap();
        assert!(matches!(tok.kind, TokenKind::Keyword(Keyword::If)));
    }

    #[test]
    fn backtick_command_substitution_captures_text() {
        let mut lex = lexer_over(b"`echo hi`");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        match &tok.kind {
            TokenKind::Word(w) => assert!(w
                .pieces()
                .iter()
                .any(|p| matches!(p, WordPiece::CommandSub { kind: CommandSubKind::ComSub, text } if text == "echo hi"))),
            other => panic!("expected Word, got {other:?}"),
        }
    }

    #[test]
    fn backquote_inside_dquote_unescapes_backslash_quote() {
        let mut lex = lexer_over(b"\"`echo \\\"hi\\\"`\"");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        match &tok.kind {
            TokenKind::Word(w) => assert!(w
                .pieces()
                .iter()
                .any(|p| matches!(p, WordPiece::CommandSub { kind: CommandSubKind::ComSub, text } if text == "echo \"hi\""))),
            other => panic!("expected Word, got {other:?}"),
        }
    }

    #[test]
    fn backquote_outside_dquote_keeps_backslash_quote_verbatim() {
        let mut lex = lexer_over(b"`echo \\\"hi\\\"`");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        match &tok.kind {
            TokenKind::Word(w) => assert!(w
                .pieces()
                .iter()
                .any(|p| matches!(p, WordPiece::CommandSub { kind: CommandSubKind::ComSub, text } if text == "echo \\\"hi\\\""))),
            other => panic!("expected Word, got {other:?}"),
        }
    }

    #[test]
    fn dollar_paren_paren_captures_arith_body() {
        let mut lex = lexer_over(b"$((1+2))");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        match &tok.kind {
            TokenKind::Word(w) => assert!(w
                .pieces()
                .iter()
                .any(|p| matches!(p, WordPiece::CommandSub { kind: CommandSubKind::ArithSub, text } if text == "1+2"))),
            other => panic!("expected Word, got {other:?}"),
        }
    }

    #[test]
    fn extended_glob_pattern_emits_pattern_markers() {
        let mut lex = lexer_over(b"@(foo|bar)");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        match &tok.kind {
            TokenKind::Word(w) => {
                assert!(w.pieces().iter().any(|p| matches!(p, WordPiece::OpenPat(PatternOp::At))));
                assert!(w.pieces().iter().any(|p| matches!(p, WordPiece::SepPat)));
                assert!(w.pieces().iter().any(|p| matches!(p, WordPiece::ClosePat)));
            }
            other => panic!("expected Word, got {other:?}"),
        }
    }

    #[test]
    fn eof_yields_eof_token() {
        let mut lex = lexer_over(b"");
        let tok = lex.next_token(LexFlags::empty(), None).unwrap();
        assert!(tok.is_eof());
    }
}
