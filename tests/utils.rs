#![allow(dead_code)] // not all tests use all the members

use std::io::{BufRead, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use rowpipe::filter::{Input, Output};
use rowpipe::stream::{Record, StreamReader};

/// Helper functions shared by the integration tests.
pub struct TestHelper;

impl TestHelper {
    pub fn setup() {
        let _ = env_logger::Builder::new()
            .filter(None, log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}

/// An in-memory stream input from literal text.
pub fn input(text: &str) -> Input {
    let boxed: Box<dyn BufRead + Send> = Box::new(Cursor::new(text.to_string()));
    Input::Reader(StreamReader::new(boxed).expect("test stream text must parse"))
}

/// A byte buffer usable as a filter output and readable afterwards.
#[derive(Clone, Debug)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl OutputBuffer {
    pub fn new() -> OutputBuffer {
        OutputBuffer(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn output(&self) -> Output {
        Output::Writer(Box::new(BufferWriter(self.0.clone())))
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().clone()).expect("output is utf-8")
    }

    /// The data rows of the captured stream, fields joined with commas.
    pub fn rows(&self) -> Vec<String> {
        rows_of(&self.text())
    }

    /// The header line of the captured stream.
    pub fn header(&self) -> String {
        self.text()
            .lines()
            .next()
            .expect("stream has a header")
            .to_string()
    }

    /// The comment lines of the captured stream.
    pub fn comments(&self) -> Vec<String> {
        let text = self.text();
        text.lines()
            .skip(1)
            .filter(|l| l.starts_with('#'))
            .map(str::to_string)
            .collect()
    }
}

/// Parse stream text and return its data rows, fields joined with
/// commas.
pub fn rows_of(text: &str) -> Vec<String> {
    let boxed: Box<dyn BufRead + Send> = Box::new(Cursor::new(text.to_string()));
    let mut reader = StreamReader::new(boxed).expect("stream text must parse");
    let mut rows = Vec::new();
    while let Some(record) = reader.next_record().expect("stream text must parse") {
        if let Record::Row(row) = record {
            rows.push(row.join(","));
        }
    }
    rows
}

/// Write stream text to a file under `dir` and return its path.
pub fn stream_file(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).expect("write test stream file");
    path
}
