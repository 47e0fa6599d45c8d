//! Byte-offset and UTF-16 line/column position tracking.
//!
//! The lexer and executor both address source text by byte offset (the
//! native currency of the character reader's retrace tape); this crate is
//! the seam where a byte offset can be turned into a line/column pair for
//! diagnostics, and back.

#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]

mod convert;
mod line_index;
mod span;

pub use convert::{offset_to_utf16_line_col, utf16_line_col_to_offset};
pub use line_index::LineStartsCache;
pub use span::ByteSpan;
