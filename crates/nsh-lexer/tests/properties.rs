//! Property tests for the §8 "Testable Properties" invariants that hold
//! for arbitrary input rather than one fixed example: quote balance and
//! the plain-word round-trip.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use nsh_lexer::{LexFlags, Lexer};
use nsh_source::{BufLayer, CharReader, LayerFlags, SourceLayer};
use nsh_token::{Token, TokenKind};
use proptest::prelude::*;

fn lexer_over(bytes: &[u8]) -> Lexer {
    let mut reader = CharReader::new();
    reader.stack().push(SourceLayer::String(BufLayer::new(bytes.to_vec(), LayerFlags::default())));
    Lexer::new(reader)
}

/// Plain-identifier-ish words: no operator/whitespace/quote/`$`/`` ` ``
/// characters, so the lexer emits a single unquoted `WORD` token whose
/// `Display` reconstruction is byte-for-byte the input (§8 "Round-trip").
fn plain_word_char() -> impl Strategy<Value = char> {
    prop_oneof![
        proptest::char::range('a', 'z'),
        proptest::char::range('0', '9'),
        Just('_'),
        Just('-'),
    ]
}

proptest! {
    /// §8 "Round-trip": for every word `w` not containing special operator
    /// characters, lex -> expand -> print yields `w`. The expansion
    /// collaborator is out of scope (§1), so this drives lex -> print
    /// directly, which is the identity for a plain unquoted word.
    #[test]
    fn plain_word_round_trips(s in prop::collection::vec(plain_word_char(), 1..24)) {
        let text: String = s.into_iter().collect();
        let input = format!("{text}\n");
        let mut lex = lexer_over(input.as_bytes());
        let tok = lex.next_token(LexFlags::empty(), None).expect("lex should not error on plain ascii");
        match tok.kind {
            TokenKind::Word(w) => prop_assert_eq!(w.to_string(), text),
            other => prop_assert!(false, "expected Word, got {other:?}"),
        }
    }

    /// §8 "Quote balance": every lexed word's opener/closer markers nest to
    /// depth zero, whatever quoting shape the input takes. Exercise this
    /// over combinations of single/double-quoted spans interleaved with
    /// plain runs, which is the shape real words take.
    #[test]
    fn quoted_words_stay_balanced(
        parts in prop::collection::vec(
            (plain_word_char(), 0u8..3),
            1..16,
        )
    ) {
        let mut text = String::new();
        for (c, quote_style) in parts {
            match quote_style {
                0 => text.push(c),
                1 => { text.push('\''); text.push(c); text.push('\''); }
                _ => { text.push('"'); text.push(c); text.push('"'); }
            }
        }
        prop_assume!(!text.is_empty());
        let input = format!("{text}\n");
        let mut lex = lexer_over(input.as_bytes());
        let tok = lex.next_token(LexFlags::empty(), None).expect("lex should not error on quoted ascii");
        if let TokenKind::Word(w) = tok.kind {
            prop_assert!(w.is_balanced());
        }
    }
}

fn collect_words(bytes: &[u8]) -> Vec<Token> {
    let mut lex = lexer_over(bytes);
    let mut out = Vec::new();
    loop {
        let tok = lex.next_token(LexFlags::empty(), None).expect("lex should not error");
        let done = matches!(tok.kind, TokenKind::Eof);
        out.push(tok);
        if done {
            break;
        }
    }
    out
}

#[test]
fn every_word_in_a_realistic_line_is_balanced() {
    for tok in collect_words(b"echo \"a b\" 'c d' e\n") {
        if let TokenKind::Word(w) = &tok.kind {
            assert!(w.is_balanced(), "unbalanced word: {w:?}");
        }
    }
}
