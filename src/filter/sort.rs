//! External sort: in-memory run generation plus the merge tree.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterIo, Input, MergeInput, MergeTree, Output};
use crate::key::{KeySpec, ResolvedKey};
use crate::pipe::{pipe_with_capacity, PipeItem};
use crate::spill;
use crate::stream::{open_input_path, Record, Row, Schema, StreamWriter};

/// Stable external sort of one stream by a key spec.
///
/// Rows accumulate in memory until the run budget is reached; each full
/// run is sorted and spilled through the temp-file registry, and the
/// spilled runs are merged back with [`MergeTree`]. An input that fits in
/// a single run never touches disk. Comments are held aside and emitted
/// after the data, since sorting them with the rows would be meaningless.
pub struct Sort {
    key: KeySpec,
    settings: Settings,
    provenance: Option<String>,
    endpoints: Option<(Input, Output)>,
    io: Option<FilterIo>,
    resolved: Option<ResolvedKey>,
    comments: Vec<String>,
}

impl Sort {
    pub fn new(input: Input, output: Output, key: KeySpec) -> Sort {
        Sort {
            key,
            settings: Settings::default(),
            provenance: None,
            endpoints: Some((input, output)),
            io: None,
            resolved: None,
            comments: Vec::new(),
        }
    }

    pub fn settings(mut self, settings: Settings) -> Sort {
        self.settings = settings;
        self
    }

    pub fn provenance<S: Into<String>>(mut self, provenance: S) -> Sort {
        self.provenance = Some(provenance.into());
        self
    }

    /// Sort and spill one full run.
    fn spill_run(
        &self,
        schema: &Arc<Schema>,
        resolved: &ResolvedKey,
        buf: &mut Vec<Row>,
    ) -> Result<PathBuf> {
        buf.sort_by(|a, b| resolved.compare(a, b));
        let path = spill::registry().create_in(&self.settings.spill_dir())?;
        let file = File::create(&path)
            .map_err(|e| Error::Resource(format!("cannot write run {}: {}", path.display(), e)))?;
        let mut writer = StreamWriter::new(BufWriter::new(file), schema.clone());
        for row in buf.drain(..) {
            writer.write_row(&row)?;
        }
        writer.finish()?;
        debug!("spilled run to {}", path.display());
        Ok(path)
    }
}

impl Filter for Sort {
    fn name(&self) -> String {
        "sort".into()
    }

    fn setup(&mut self) -> Result<()> {
        let (input, output) = self.endpoints.take().expect("setup run twice");
        let mut io = FilterIo::open(input, output)?;
        io.set_provenance(self.provenance.take());
        let schema = io.commit_input_schema()?;
        self.resolved = Some(self.key.resolve(&schema)?);
        self.io = Some(io);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let mut io = self.io.take().expect("setup not run");
        let result = self.sort_stream(&mut io);
        self.io = Some(io);
        result
    }

    fn finish(&mut self) -> Result<()> {
        let io = self.io.as_mut().expect("setup not run");
        for text in self.comments.drain(..) {
            io.emit_comment(&text)?;
        }
        io.finish()
    }
}

impl Sort {
    fn sort_stream(&mut self, io: &mut FilterIo) -> Result<()> {
        let resolved = self.resolved.clone().expect("setup not run");
        let schema = io.input_schema().clone();

        let mut buf: Vec<Row> = Vec::new();
        let mut buf_bytes = 0usize;
        let mut runs: Vec<PathBuf> = Vec::new();

        while let Some(record) = io.next_record()? {
            match record {
                Record::Comment(text) => self.comments.push(text),
                Record::Row(row) => {
                    buf_bytes += row_bytes(&row);
                    buf.push(row);
                    if buf_bytes >= self.settings.sort_run_bytes {
                        runs.push(self.spill_run(&schema, &resolved, &mut buf)?);
                        buf_bytes = 0;
                    }
                }
            }
        }

        if runs.is_empty() {
            // single run: sort in place and emit straight downstream
            buf.sort_by(|a, b| resolved.compare(a, b));
            for row in buf.drain(..) {
                io.emit_row(row)?;
            }
            return Ok(());
        }

        if !buf.is_empty() {
            runs.push(self.spill_run(&schema, &resolved, &mut buf)?);
        }

        if runs.len() == 1 {
            // the input ended exactly on a run boundary; stream the lone
            // spill back without a merge
            let path = runs.pop().expect("one run");
            let mut reader = open_input_path(&path)?;
            while let Some(record) = reader.next_record()? {
                io.emit_record(record)?;
            }
            spill::registry().release(&path);
            return Ok(());
        }

        info!("sorted {} runs, merging", runs.len());
        let (tx, rx) = pipe_with_capacity(self.settings.pipe_capacity);
        let inputs = runs.into_iter().map(MergeInput::temp_file).collect();
        let tree = MergeTree::new(inputs, Output::Pipe(tx), self.key.clone())
            .settings(self.settings.clone());
        let handle = crate::filter::spawn(tree);

        match rx.dequeue() {
            Some(PipeItem::Header(merged)) if merged.compatible(&schema) => {}
            _ => {
                handle.join()?;
                return Err(Error::Schema("merge tree lost the input schema".into()));
            }
        }
        while let Some(item) = rx.dequeue() {
            match item {
                PipeItem::Record(record) => io.emit_record(record)?,
                PipeItem::Header(_) => {
                    return Err(Error::Schema("schema change mid-stream".into()))
                }
            }
        }
        handle.join()
    }
}

/// Rough in-memory footprint of a row, for the run budget.
fn row_bytes(row: &Row) -> usize {
    let fields: usize = row.iter().map(|f| f.len() + 16).sum();
    fields + 32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_bytes_grows_with_content() {
        let small = vec!["a".to_string()];
        let large = vec!["a".repeat(100)];
        assert!(row_bytes(&large) > row_bytes(&small));
    }
}
