//! The filter framework: lifecycle, endpoints and workers.
//!
//! Every transformation in the toolkit is a [`Filter`]: it is configured
//! at construction, reads one or more input endpoints, writes exactly one
//! output endpoint, and goes through `setup` (read input headers, commit
//! the output schema), `run` (stream records) and `finish` (flush, close,
//! join helpers). Filters run to completion on the calling thread via
//! [`Filter::execute`] or on their own named worker via [`spawn`].

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use crate::error::Result;
use crate::pipe::{PipeReceiver, PipeSender};
use crate::stream::StreamReader;

mod group_by;
mod io;
mod join;
mod merge;
mod merge_tree;
mod pipeline;
mod reduce;
mod sort;

pub use group_by::{GroupBy, Presort};
pub use io::{FilterIo, Sink, Source};
pub use join::{JoinType, MergeJoin};
pub use merge::MergeTwo;
pub use merge_tree::{MergeInput, MergeTree};
pub use pipeline::Pipeline;
pub use reduce::{builtin_reducer, CommandReducerFactory, CountReducer, IdentityReducer, ReducerFactory};
pub use sort::Sort;

/// Where a filter reads a stream from.
pub enum Input {
    Path(PathBuf),
    Stdin,
    /// The read side of an in-process pipe; the producer's schema arrives
    /// as the first item.
    Pipe(PipeReceiver),
    /// An already-opened reader.
    Reader(StreamReader<Box<dyn BufRead + Send>>),
}

impl Input {
    /// Interpret a command-line path, with `-` meaning standard input.
    pub fn from_arg(arg: &str) -> Input {
        if arg == "-" {
            Input::Stdin
        } else {
            Input::Path(PathBuf::from(arg))
        }
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Input::Path(p) => write!(f, "Input::Path({})", p.display()),
            Input::Stdin => write!(f, "Input::Stdin"),
            Input::Pipe(_) => write!(f, "Input::Pipe"),
            Input::Reader(_) => write!(f, "Input::Reader"),
        }
    }
}

/// Where a filter writes its stream to.
pub enum Output {
    Path(PathBuf),
    Stdout,
    /// The write side of an in-process pipe; the committed schema is sent
    /// before any record.
    Pipe(PipeSender),
    /// An already-opened byte sink.
    Writer(Box<dyn Write + Send>),
}

impl Output {
    /// Interpret a command-line path, with `-` meaning standard output.
    pub fn from_arg(arg: &str) -> Output {
        if arg == "-" {
            Output::Stdout
        } else {
            Output::Path(PathBuf::from(arg))
        }
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::Path(p) => write!(f, "Output::Path({})", p.display()),
            Output::Stdout => write!(f, "Output::Stdout"),
            Output::Pipe(_) => write!(f, "Output::Pipe"),
            Output::Writer(_) => write!(f, "Output::Writer"),
        }
    }
}

/// A stream transformation with the configure → setup → run → finish
/// lifecycle.
pub trait Filter: Send {
    /// Short name, used for worker threads and diagnostics.
    fn name(&self) -> String;

    /// Open endpoints, read input headers, commit the output schema.
    fn setup(&mut self) -> Result<()>;

    /// Stream records from input to output.
    fn run(&mut self) -> Result<()>;

    /// Flush and close the output, join helper workers, verify the input
    /// was consumed to end of stream.
    fn finish(&mut self) -> Result<()>;

    /// Drive the whole lifecycle on the calling thread.
    fn execute(&mut self) -> Result<()> {
        self.setup()?;
        self.run()?;
        self.finish()
    }
}

/// Handle of a filter running on its own worker thread.
pub struct FilterHandle {
    name: String,
    join: JoinHandle<Result<()>>,
}

impl FilterHandle {
    /// Wait for the worker and surface its result.
    pub fn join(self) -> Result<()> {
        match self.join.join() {
            Ok(result) => result,
            Err(_) => panic!("worker {:?} panicked", self.name),
        }
    }
}

/// Run a filter to completion on a named worker thread.
pub fn spawn<F: Filter + 'static>(filter: F) -> FilterHandle {
    spawn_boxed(Box::new(filter))
}

pub fn spawn_boxed(mut filter: Box<dyn Filter>) -> FilterHandle {
    let name = filter.name();
    debug!("starting worker for {}", name);
    let join = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            let result = filter.execute();
            if let Err(e) = &result {
                debug!("worker {} failed: {}", filter.name(), e);
            }
            result
        })
        .expect("failed to spawn worker thread");
    FilterHandle { name, join }
}
