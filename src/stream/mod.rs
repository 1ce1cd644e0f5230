//! The self-describing stream format: header, rows and comments.
//!
//! A stream is a header line followed by data rows and comment lines. The
//! header declares the field separator and the column names, so every
//! filter can consume the stream without out-of-band knowledge:
//!
//! ```text
//! #rowpipe -F t cid cname
//! 10	pascal
//! 11	numanal
//! # a comment, preserved verbatim
//! ```

mod read;
mod schema;
mod write;

pub use read::{open_input_path, StreamReader};
pub use schema::{Schema, Separator, DEFAULT_EMPTY, HEADER_MARKER};
pub use write::StreamWriter;

/// A data row: one string per column, exactly as many as the header
/// declares. Rows are owned by exactly one filter at a time and move
/// through pipes, never shared.
pub type Row = Vec<String>;

/// One record of a stream body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Row(Row),
    /// A comment line, kept verbatim including the leading `#`.
    Comment(String),
}

impl Record {
    pub fn is_row(&self) -> bool {
        matches!(self, Record::Row(_))
    }
}
