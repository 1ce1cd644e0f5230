use std::io::Write;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::stream::{Record, Row, Schema, StreamReader};

/// Writer half of the stream codec.
///
/// The header is written lazily, just before the first record, and forced
/// by `finish()` so an empty stream still carries its header. Rows are
/// checked for arity and each field is made separator-safe on the way
/// out.
pub struct StreamWriter<W> {
    schema: Arc<Schema>,
    inner: W,
    header_written: bool,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(inner: W, schema: Arc<Schema>) -> StreamWriter<W> {
        StreamWriter {
            schema,
            inner,
            header_written: false,
        }
    }

    /// Clone the schema of a reader, guaranteeing the output is
    /// schema-compatible with the template input.
    pub fn like<R: std::io::BufRead>(inner: W, template: &StreamReader<R>) -> StreamWriter<W> {
        StreamWriter::new(inner, template.schema().clone())
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn ensure_header(&mut self) -> Result<()> {
        if !self.header_written {
            self.header_written = true;
            writeln!(self.inner, "{}", self.schema.header_line())?;
        }
        Ok(())
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        match record {
            Record::Row(row) => self.write_row(row),
            Record::Comment(text) => self.write_comment(text),
        }
    }

    pub fn write_row(&mut self, row: &Row) -> Result<()> {
        if row.len() != self.schema.len() {
            return Err(Error::Schema(format!(
                "row has {} fields, schema declares {}",
                row.len(),
                self.schema.len()
            )));
        }
        self.ensure_header()?;
        let sep = self.schema.separator();
        let empty = self.schema.empty();
        let mut line = String::new();
        for (i, field) in row.iter().enumerate() {
            if i > 0 {
                line.push(sep.write_char());
            }
            line.push_str(&sep.safe_field(field, empty));
        }
        writeln!(self.inner, "{}", line)?;
        Ok(())
    }

    /// Write a comment line; a missing `#` prefix is added.
    pub fn write_comment(&mut self, text: &str) -> Result<()> {
        self.ensure_header()?;
        if text.starts_with('#') {
            writeln!(self.inner, "{}", text)?;
        } else {
            writeln!(self.inner, "# {}", text)?;
        }
        Ok(())
    }

    /// Flush, writing the header first if nothing else has been.
    pub fn finish(&mut self) -> Result<()> {
        self.ensure_header()?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Separator;
    use std::io::Cursor;

    fn schema(header: &str) -> Arc<Schema> {
        Arc::new(Schema::parse_header(header).unwrap())
    }

    fn written<F: FnOnce(&mut StreamWriter<&mut Vec<u8>>)>(schema: Arc<Schema>, f: F) -> String {
        let mut out = Vec::new();
        let mut w = StreamWriter::new(&mut out, schema);
        f(&mut w);
        w.finish().unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_header_then_rows() {
        let text = written(schema("#rowpipe -F t a b"), |w| {
            w.write_row(&vec!["1".into(), "x".into()]).unwrap();
        });
        assert_eq!(text, "#rowpipe -F t a b\n1\tx\n");
    }

    #[test]
    fn test_empty_stream_still_has_header() {
        let text = written(schema("#rowpipe a"), |_| {});
        assert_eq!(text, "#rowpipe a\n");
    }

    #[test]
    fn test_arity_checked() {
        let mut out = Vec::new();
        let mut w = StreamWriter::new(&mut out, schema("#rowpipe a b"));
        assert!(w.write_row(&vec!["1".into()]).is_err());
    }

    #[test]
    fn test_field_safing() {
        let text = written(schema("#rowpipe a b"), |w| {
            w.write_row(&vec!["one two".into(), "".into()]).unwrap();
        });
        assert_eq!(text, "#rowpipe a b\none-two\t-\n");
    }

    #[test]
    fn test_round_trip() {
        let header = "#rowpipe -F C a b";
        let rows = vec![
            vec!["1".to_string(), "x".to_string()],
            vec!["2".to_string(), "y z".to_string()],
        ];
        let text = written(schema(header), |w| {
            for row in &rows {
                w.write_row(row).unwrap();
            }
            w.write_comment("# tail").unwrap();
        });
        let mut r = StreamReader::new(Cursor::new(text)).unwrap();
        assert_eq!(r.schema().separator(), Separator::Comma);
        let mut got = Vec::new();
        while let Some(record) = r.next_record().unwrap() {
            if let Record::Row(row) = record {
                got.push(row);
            }
        }
        assert_eq!(got, rows);
    }
}
