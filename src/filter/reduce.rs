//! Reducers: the sub-filters the group-by driver runs, one instance per
//! group.
//!
//! A [`ReducerFactory`] is pure configuration: it hands out a fresh
//! [`Filter`] for every group, wired to the endpoints the driver chose.
//! Two families ship with the crate: small in-process reducers selected
//! by name (`count`, `identity`), and external commands that consume a
//! stream on stdin and produce one on stdout.

use std::io::{BufReader, BufWriter};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::filter::{Filter, FilterIo, Input, Output, Sink, Source};
use crate::stream::{Schema, StreamReader, StreamWriter};

/// Produces one fresh reducer per group.
pub trait ReducerFactory: Send + Sync {
    /// Short description for diagnostics.
    fn describe(&self) -> String {
        "reducer".into()
    }

    /// Build the reducer for one group. `key` is the group's key value,
    /// `None` for the single invocation on an empty input.
    fn make(&self, key: Option<&str>, input: Input, output: Output) -> Result<Box<dyn Filter>>;
}

impl<F> ReducerFactory for F
where
    F: Fn(Option<&str>, Input, Output) -> Result<Box<dyn Filter>> + Send + Sync,
{
    fn make(&self, key: Option<&str>, input: Input, output: Output) -> Result<Box<dyn Filter>> {
        self(key, input, output)
    }
}

/// Look up an in-process reducer by its `-C` name.
pub fn builtin_reducer(name: &str) -> Result<Arc<dyn ReducerFactory>> {
    match name {
        "count" => Ok(Arc::new(CountFactory)),
        "identity" => Ok(Arc::new(IdentityFactory)),
        _ => Err(Error::Config(format!(
            "no built-in reducer named {:?} (have: count, identity)",
            name
        ))),
    }
}

struct CountFactory;

impl ReducerFactory for CountFactory {
    fn describe(&self) -> String {
        "count".into()
    }

    fn make(&self, _key: Option<&str>, input: Input, output: Output) -> Result<Box<dyn Filter>> {
        Ok(Box::new(CountReducer::new(input, output)))
    }
}

struct IdentityFactory;

impl ReducerFactory for IdentityFactory {
    fn describe(&self) -> String {
        "identity".into()
    }

    fn make(&self, _key: Option<&str>, input: Input, output: Output) -> Result<Box<dyn Filter>> {
        Ok(Box::new(IdentityReducer::new(input, output)))
    }
}

/// Emits a single `count` row with the number of input rows. The group
/// key is not part of the output; the driver re-injects it.
pub struct CountReducer {
    endpoints: Option<(Input, Output)>,
    io: Option<FilterIo>,
    count: u64,
}

impl CountReducer {
    pub fn new(input: Input, output: Output) -> CountReducer {
        CountReducer {
            endpoints: Some((input, output)),
            io: None,
            count: 0,
        }
    }
}

impl Filter for CountReducer {
    fn name(&self) -> String {
        "count".into()
    }

    fn setup(&mut self) -> Result<()> {
        let (input, output) = self.endpoints.take().expect("setup run twice");
        let mut io = FilterIo::open(input, output)?;
        let separator = io.input_schema().separator();
        io.commit(Arc::new(Schema::new(separator, vec!["count"])?))?;
        self.io = Some(io);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let io = self.io.as_mut().expect("setup not run");
        while let Some(record) = io.next_record()? {
            if record.is_row() {
                self.count += 1;
            }
        }
        io.emit_row(vec![self.count.to_string()])
    }

    fn finish(&mut self) -> Result<()> {
        self.io.as_mut().expect("setup not run").finish()
    }
}

/// Copies its group through unchanged.
pub struct IdentityReducer {
    endpoints: Option<(Input, Output)>,
    io: Option<FilterIo>,
}

impl IdentityReducer {
    pub fn new(input: Input, output: Output) -> IdentityReducer {
        IdentityReducer {
            endpoints: Some((input, output)),
            io: None,
        }
    }
}

impl Filter for IdentityReducer {
    fn name(&self) -> String {
        "identity".into()
    }

    fn setup(&mut self) -> Result<()> {
        let (input, output) = self.endpoints.take().expect("setup run twice");
        let mut io = FilterIo::open(input, output)?;
        io.commit_input_schema()?;
        self.io = Some(io);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let io = self.io.as_mut().expect("setup not run");
        while let Some(record) = io.next_record()? {
            io.emit_record(record)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.io.as_mut().expect("setup not run").finish()
    }
}

/// Runs an external command per group: the group's stream goes to the
/// child's stdin and the child's stdout is read back as a stream.
pub struct CommandReducerFactory {
    program: String,
    args: Vec<String>,
    /// Append the group key as one extra argument (`-K`).
    pass_key: bool,
}

impl CommandReducerFactory {
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> CommandReducerFactory {
        CommandReducerFactory {
            program: program.into(),
            args,
            pass_key: false,
        }
    }

    pub fn pass_key(mut self, pass_key: bool) -> CommandReducerFactory {
        self.pass_key = pass_key;
        self
    }
}

impl ReducerFactory for CommandReducerFactory {
    fn describe(&self) -> String {
        self.program.clone()
    }

    fn make(&self, key: Option<&str>, input: Input, output: Output) -> Result<Box<dyn Filter>> {
        let mut args = self.args.clone();
        if self.pass_key {
            args.push(key.unwrap_or_default().to_string());
        }
        Ok(Box::new(CommandReducer {
            program: self.program.clone(),
            args,
            endpoints: Some((input, output)),
            sink: None,
            child: None,
            feeder: None,
        }))
    }
}

struct CommandReducer {
    program: String,
    args: Vec<String>,
    endpoints: Option<(Input, Output)>,
    sink: Option<Sink>,
    child: Option<Child>,
    feeder: Option<JoinHandle<Result<()>>>,
}

impl CommandReducer {
    /// Copy our input stream into the child's stdin on a helper worker.
    fn spawn_feeder(&mut self, mut source: Source, stdin: std::process::ChildStdin) {
        let handle = std::thread::Builder::new()
            .name("reducer-feed".into())
            .spawn(move || -> Result<()> {
                let mut writer =
                    StreamWriter::new(BufWriter::new(stdin), source.schema().clone());
                let result = (|| -> Result<()> {
                    while let Some(record) = source.next_record()? {
                        writer.write_record(&record)?;
                    }
                    writer.finish()
                })();
                match result {
                    // a child that stopped reading mid-group broke the
                    // consumption contract
                    Err(e) if e.is_downstream_closed() => Err(Error::Consumption(
                        "reducer command exited without consuming its group".into(),
                    )),
                    other => other,
                }
            })
            .expect("failed to spawn worker thread");
        self.feeder = Some(handle);
    }
}

impl Filter for CommandReducer {
    fn name(&self) -> String {
        format!("reduce:{}", self.program)
    }

    fn setup(&mut self) -> Result<()> {
        let (input, output) = self.endpoints.take().expect("setup run twice");
        let source = Source::open(input)?;
        let sink = Sink::open(output)?;

        debug!("running reducer {} {:?}", self.program, self.args);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| {
                Error::Resource(format!("cannot run reducer {}: {}", self.program, e))
            })?;
        let stdin = child.stdin.take().expect("child stdin requested");
        self.spawn_feeder(source, stdin);
        self.child = Some(child);
        self.sink = Some(sink);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let child = self.child.as_mut().expect("setup not run");
        let stdout = child.stdout.take().expect("child stdout requested");
        let boxed: Box<dyn std::io::BufRead + Send> = Box::new(BufReader::new(stdout));
        let mut reader = StreamReader::new(boxed)?;
        let sink = self.sink.as_mut().expect("setup not run");
        sink.commit(reader.schema().clone())?;
        while let Some(record) = reader.next_record()? {
            sink.record(record)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(feeder) = self.feeder.take() {
            feeder.join().expect("reducer feeder panicked")?;
        }
        let mut child = self.child.take().expect("setup not run");
        let status = child
            .wait()
            .map_err(|e| Error::Resource(format!("waiting for {}: {}", self.program, e)))?;
        if !status.success() {
            return Err(Error::Resource(format!(
                "reducer {} failed with {}",
                self.program, status
            )));
        }
        self.sink.as_mut().expect("setup not run").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{pipe_with_capacity, PipeItem};
    use crate::stream::{Record, Separator};

    fn feed_group(rows: &[&[&str]]) -> crate::pipe::PipeReceiver {
        let (tx, rx) = pipe_with_capacity(64);
        let schema = Arc::new(Schema::new(Separator::Default, vec!["event", "x"]).unwrap());
        tx.header(schema).unwrap();
        for row in rows {
            tx.record(Record::Row(row.iter().map(|f| f.to_string()).collect()))
                .unwrap();
        }
        rx
    }

    #[test]
    fn test_count_reducer() {
        let group = feed_group(&[&["A", "1"], &["A", "2"], &["A", "3"]]);
        let (out_tx, out_rx) = pipe_with_capacity(64);
        let mut reducer = CountReducer::new(Input::Pipe(group), Output::Pipe(out_tx));
        reducer.execute().unwrap();

        match out_rx.dequeue() {
            Some(PipeItem::Header(schema)) => assert_eq!(schema.columns(), ["count"]),
            _ => panic!("expected header"),
        }
        match out_rx.dequeue() {
            Some(PipeItem::Record(Record::Row(row))) => assert_eq!(row, vec!["3"]),
            _ => panic!("expected count row"),
        }
    }

    #[test]
    fn test_count_reducer_empty_group_still_counts() {
        let group = feed_group(&[]);
        let (out_tx, out_rx) = pipe_with_capacity(64);
        let mut reducer = CountReducer::new(Input::Pipe(group), Output::Pipe(out_tx));
        reducer.execute().unwrap();
        assert!(matches!(out_rx.dequeue(), Some(PipeItem::Header(_))));
        match out_rx.dequeue() {
            Some(PipeItem::Record(Record::Row(row))) => assert_eq!(row, vec!["0"]),
            _ => panic!("expected count row"),
        }
    }

    #[test]
    fn test_builtin_lookup() {
        assert!(builtin_reducer("count").is_ok());
        assert!(builtin_reducer("identity").is_ok());
        assert!(matches!(builtin_reducer("mystery"), Err(Error::Config(_))));
    }
}
