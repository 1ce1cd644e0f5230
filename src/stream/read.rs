use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::stream::{Record, Schema};

/// Reader half of the stream codec.
///
/// The header is parsed eagerly when the reader is constructed, so
/// `schema()` is available before the first record; a malformed or
/// missing header is fatal. Records then come out one at a time until
/// end of stream.
pub struct StreamReader<R> {
    schema: Arc<Schema>,
    inner: R,
    buf: String,
    line: u64,
    done: bool,
}

impl<R: BufRead> StreamReader<R> {
    pub fn new(mut inner: R) -> Result<StreamReader<R>> {
        let mut buf = String::new();
        let n = inner.read_line(&mut buf)?;
        if n == 0 {
            return Err(Error::Schema("empty input, no stream header".into()));
        }
        let schema = Schema::parse_header(trim_newline(&buf))?;
        Ok(StreamReader {
            schema: Arc::new(schema),
            inner,
            buf: String::new(),
            line: 1,
            done: false,
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// The next row or comment, or `None` at end of stream. Reading past
    /// the end keeps returning `None`.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        self.buf.clear();
        let n = self.inner.read_line(&mut self.buf)?;
        if n == 0 {
            self.done = true;
            return Ok(None);
        }
        self.line += 1;
        let line = trim_newline(&self.buf);
        if line.starts_with('#') {
            return Ok(Some(Record::Comment(line.to_string())));
        }
        let fields = self.schema.separator().split(line);
        if fields.len() != self.schema.len() {
            return Err(Error::Schema(format!(
                "line {}: row has {} fields, header declares {}",
                self.line,
                fields.len(),
                self.schema.len()
            )));
        }
        Ok(Some(Record::Row(fields)))
    }

    /// Whether the underlying input has been read to end of stream.
    pub fn at_eof(&self) -> bool {
        self.done
    }
}

fn trim_newline(line: &str) -> &str {
    line.strip_suffix('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .unwrap_or(line)
}

/// Open a stream on a file path, with `-` meaning standard input.
pub fn open_input_path(path: &Path) -> Result<StreamReader<Box<dyn BufRead + Send>>> {
    let reader: Box<dyn BufRead + Send> = if path.as_os_str() == "-" {
        Box::new(BufReader::new(std::io::stdin()))
    } else {
        Box::new(BufReader::new(File::open(path).map_err(|e| {
            Error::Resource(format!("cannot open input {}: {}", path.display(), e))
        })?))
    };
    StreamReader::new(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(text: &str) -> StreamReader<Cursor<&str>> {
        StreamReader::new(Cursor::new(text)).unwrap()
    }

    #[test]
    fn test_rows_and_comments() {
        let mut r = reader("#rowpipe a b\n1 2\n# note\n3 4\n");
        assert_eq!(r.schema().columns(), ["a", "b"]);
        assert_eq!(
            r.next_record().unwrap(),
            Some(Record::Row(vec!["1".into(), "2".into()]))
        );
        assert_eq!(
            r.next_record().unwrap(),
            Some(Record::Comment("# note".into()))
        );
        assert_eq!(
            r.next_record().unwrap(),
            Some(Record::Row(vec!["3".into(), "4".into()]))
        );
        assert_eq!(r.next_record().unwrap(), None);
        assert!(r.at_eof());
        // reading a finished stream stays at end of stream
        assert_eq!(r.next_record().unwrap(), None);
    }

    #[test]
    fn test_arity_mismatch_is_fatal() {
        let mut r = reader("#rowpipe a b\n1 2 3\n");
        assert!(matches!(r.next_record(), Err(Error::Schema(_))));
    }

    #[test]
    fn test_missing_header_is_fatal() {
        assert!(StreamReader::new(Cursor::new("1 2\n")).is_err());
        assert!(StreamReader::new(Cursor::new("")).is_err());
    }

    #[test]
    fn test_crlf_tolerated() {
        let mut r = reader("#rowpipe a\nx\r\n");
        assert_eq!(r.next_record().unwrap(), Some(Record::Row(vec!["x".into()])));
    }
}
