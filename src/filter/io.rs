//! Endpoint plumbing shared by the filters.
//!
//! [`Source`] and [`Sink`] give every endpoint kind, file or pipe, the
//! same record-at-a-time interface with the schema handled up front.
//! [`FilterIo`] bundles one source with one sink and carries the
//! framework duties: comment passthrough stays with the caller, but the
//! consumed-to-eof check and the provenance trailer live here.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::{Input, Output};
use crate::pipe::{PipeItem, PipeReceiver, PipeSender};
use crate::stream::{open_input_path, Record, Row, Schema, StreamReader, StreamWriter};

/// A stream producer: a codec reader over bytes, or the read side of an
/// in-process pipe.
pub enum Source {
    Text(StreamReader<Box<dyn std::io::BufRead + Send>>),
    Pipe {
        schema: Arc<Schema>,
        rx: PipeReceiver,
        done: bool,
    },
}

impl Source {
    /// Open an input endpoint. For a pipe this blocks until the producer
    /// commits its schema; a pipe that closes first means the producer
    /// died, which is a failure, not an empty stream.
    pub fn open(input: Input) -> Result<Source> {
        match input {
            Input::Path(path) => Ok(Source::Text(open_input_path(&path)?)),
            Input::Stdin => Ok(Source::Text(open_input_path(std::path::Path::new("-"))?)),
            Input::Reader(reader) => Ok(Source::Text(reader)),
            Input::Pipe(rx) => match rx.dequeue() {
                Some(PipeItem::Header(schema)) => Ok(Source::Pipe {
                    schema,
                    rx,
                    done: false,
                }),
                Some(PipeItem::Record(_)) => {
                    Err(Error::Schema("pipe produced a record before its header".into()))
                }
                None => Err(Error::Schema("pipe closed before its header".into())),
            },
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        match self {
            Source::Text(reader) => reader.schema(),
            Source::Pipe { schema, .. } => schema,
        }
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        match self {
            Source::Text(reader) => reader.next_record(),
            Source::Pipe { schema, rx, done } => {
                if *done {
                    return Ok(None);
                }
                match rx.dequeue() {
                    None => {
                        *done = true;
                        Ok(None)
                    }
                    Some(PipeItem::Header(_)) => {
                        Err(Error::Schema("schema change mid-stream".into()))
                    }
                    Some(PipeItem::Record(Record::Row(row))) => {
                        if row.len() != schema.len() {
                            return Err(Error::Schema(format!(
                                "row has {} fields, schema declares {}",
                                row.len(),
                                schema.len()
                            )));
                        }
                        Ok(Some(Record::Row(row)))
                    }
                    Some(PipeItem::Record(record)) => Ok(Some(record)),
                }
            }
        }
    }

    /// Whether the input has been read to end of stream.
    pub fn at_eof(&self) -> bool {
        match self {
            Source::Text(reader) => reader.at_eof(),
            Source::Pipe { done, .. } => *done,
        }
    }
}

/// A stream consumer: a codec writer over bytes, or the write side of an
/// in-process pipe. The schema must be committed before any record.
pub enum Sink {
    Text {
        out: Option<Box<dyn Write + Send>>,
        writer: Option<StreamWriter<Box<dyn Write + Send>>>,
    },
    Pipe {
        tx: PipeSender,
        schema: Option<Arc<Schema>>,
    },
}

impl Sink {
    pub fn open(output: Output) -> Result<Sink> {
        let out: Box<dyn Write + Send> = match output {
            Output::Path(path) => Box::new(BufWriter::new(File::create(&path).map_err(|e| {
                Error::Resource(format!("cannot write output {}: {}", path.display(), e))
            })?)),
            Output::Stdout => Box::new(BufWriter::new(std::io::stdout())),
            Output::Writer(w) => w,
            Output::Pipe(tx) => return Ok(Sink::Pipe { tx, schema: None }),
        };
        Ok(Sink::Text {
            out: Some(out),
            writer: None,
        })
    }

    /// Commit the output schema; for a pipe this publishes the header to
    /// the consumer.
    pub fn commit(&mut self, schema: Arc<Schema>) -> Result<()> {
        match self {
            Sink::Text { out, writer } => {
                if writer.is_some() {
                    return Err(Error::Schema("output schema committed twice".into()));
                }
                let out = out.take().expect("sink byte stream missing");
                *writer = Some(StreamWriter::new(out, schema));
                Ok(())
            }
            Sink::Pipe { tx, schema: slot } => {
                if slot.is_some() {
                    return Err(Error::Schema("output schema committed twice".into()));
                }
                tx.header(schema.clone())?;
                *slot = Some(schema);
                Ok(())
            }
        }
    }

    pub fn schema(&self) -> Option<&Arc<Schema>> {
        match self {
            Sink::Text { writer, .. } => writer.as_ref().map(|w| w.schema()),
            Sink::Pipe { schema, .. } => schema.as_ref(),
        }
    }

    pub fn row(&mut self, row: Row) -> Result<()> {
        match self {
            Sink::Text { writer, .. } => match writer {
                Some(w) => w.write_row(&row),
                None => Err(Error::Schema("row emitted before output schema".into())),
            },
            Sink::Pipe { tx, schema } => match schema {
                Some(schema) => {
                    if row.len() != schema.len() {
                        return Err(Error::Schema(format!(
                            "row has {} fields, schema declares {}",
                            row.len(),
                            schema.len()
                        )));
                    }
                    tx.record(Record::Row(row))
                }
                None => Err(Error::Schema("row emitted before output schema".into())),
            },
        }
    }

    pub fn comment(&mut self, text: &str) -> Result<()> {
        match self {
            Sink::Text { writer, .. } => match writer {
                Some(w) => w.write_comment(text),
                None => Err(Error::Schema("comment emitted before output schema".into())),
            },
            Sink::Pipe { tx, schema } => {
                if schema.is_none() {
                    return Err(Error::Schema("comment emitted before output schema".into()));
                }
                tx.record(Record::Comment(text.to_string()))
            }
        }
    }

    pub fn record(&mut self, record: Record) -> Result<()> {
        match record {
            Record::Row(row) => self.row(row),
            Record::Comment(text) => self.comment(&text),
        }
    }

    /// Flush and close. For a file sink this forces the header out even
    /// on an empty stream; a pipe closes when the sender drops.
    pub fn finish(&mut self) -> Result<()> {
        match self {
            Sink::Text { writer, .. } => match writer {
                Some(w) => w.finish(),
                None => Err(Error::Schema("output finished but never committed".into())),
            },
            Sink::Pipe { schema, .. } => {
                if schema.is_none() {
                    return Err(Error::Schema("output finished but never committed".into()));
                }
                Ok(())
            }
        }
    }
}

/// One input, one output, and the framework duties between them.
pub struct FilterIo {
    source: Source,
    sink: Sink,
    provenance: Option<String>,
}

impl FilterIo {
    pub fn open(input: Input, output: Output) -> Result<FilterIo> {
        Ok(FilterIo {
            source: Source::open(input)?,
            sink: Sink::open(output)?,
            provenance: None,
        })
    }

    /// Record the invocation this filter will describe in its provenance
    /// trailer comment; `None` suppresses the trailer.
    pub fn set_provenance(&mut self, provenance: Option<String>) {
        self.provenance = provenance;
    }

    pub fn input_schema(&self) -> &Arc<Schema> {
        self.source.schema()
    }

    pub fn commit(&mut self, schema: Arc<Schema>) -> Result<()> {
        self.sink.commit(schema)
    }

    /// Commit the input schema unchanged and hand it back.
    pub fn commit_input_schema(&mut self) -> Result<Arc<Schema>> {
        let schema = self.source.schema().clone();
        self.sink.commit(schema.clone())?;
        Ok(schema)
    }

    pub fn next_record(&mut self) -> Result<Option<Record>> {
        self.source.next_record()
    }

    pub fn at_eof(&self) -> bool {
        self.source.at_eof()
    }

    pub fn emit_row(&mut self, row: Row) -> Result<()> {
        self.sink.row(row)
    }

    pub fn emit_comment(&mut self, text: &str) -> Result<()> {
        self.sink.comment(text)
    }

    pub fn emit_record(&mut self, record: Record) -> Result<()> {
        self.sink.record(record)
    }

    /// Framework half of `Filter::finish`: verify the input was fully
    /// consumed (a filter that stopped early would park its producer
    /// behind a full pipe forever), append the provenance trailer, flush.
    pub fn finish(&mut self) -> Result<()> {
        if !self.source.at_eof() {
            return Err(Error::Consumption(
                "filter finished without reading its input to end of stream".into(),
            ));
        }
        if let Some(provenance) = self.provenance.take() {
            self.sink.comment(&format!("# | {}", provenance))?;
        }
        self.sink.finish()
    }

    pub fn sink(&mut self) -> &mut Sink {
        &mut self.sink
    }

    pub fn source(&mut self) -> &mut Source {
        &mut self.source
    }

    /// Split this io back into its halves.
    pub fn into_parts(self) -> (Source, Sink) {
        (self.source, self.sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe_with_capacity;
    use crate::stream::Separator;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(Separator::Default, vec!["a"]).unwrap())
    }

    #[test]
    fn test_pipe_source_requires_header_first() {
        let (tx, rx) = pipe_with_capacity(4);
        tx.record(Record::Row(vec!["1".into()])).unwrap();
        assert!(matches!(Source::open(Input::Pipe(rx)), Err(Error::Schema(_))));
    }

    #[test]
    fn test_pipe_closed_before_header_is_a_failure() {
        let (tx, rx) = pipe_with_capacity(4);
        drop(tx);
        assert!(matches!(Source::open(Input::Pipe(rx)), Err(Error::Schema(_))));
    }

    #[test]
    fn test_pipe_round_trip() {
        let (tx, rx) = pipe_with_capacity(4);
        tx.header(schema()).unwrap();
        tx.record(Record::Row(vec!["1".into()])).unwrap();
        drop(tx);

        let mut source = Source::open(Input::Pipe(rx)).unwrap();
        assert_eq!(source.schema().columns(), ["a"]);
        assert!(matches!(source.next_record().unwrap(), Some(Record::Row(_))));
        assert_eq!(source.next_record().unwrap(), None);
        assert!(source.at_eof());
    }

    #[test]
    fn test_sink_requires_commit() {
        let (tx, _rx) = pipe_with_capacity(4);
        let mut sink = Sink::open(Output::Pipe(tx)).unwrap();
        assert!(sink.row(vec!["1".into()]).is_err());
        sink.commit(schema()).unwrap();
        assert!(sink.row(vec!["1".into()]).is_ok());
    }
}
