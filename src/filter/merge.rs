//! Ordered interleave of two presorted, schema-compatible streams.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::filter::{Filter, Input, Output, Sink, Source};
use crate::key::{KeySpec, ResolvedKey};
use crate::stream::{Record, Row, Schema};

/// One side of the merge: its source, its lookahead row, and the last
/// row handed downstream so inversions are caught as they happen.
struct Side {
    label: &'static str,
    source: Source,
    front: Option<Row>,
    last: Option<Row>,
}

impl Side {
    /// Advance to the next data row, passing comments straight through.
    fn refill(&mut self, key: &ResolvedKey, spec: &KeySpec, sink: &mut Sink) -> Result<()> {
        self.front = None;
        while let Some(record) = self.source.next_record()? {
            match record {
                Record::Comment(text) => sink.comment(&text)?,
                Record::Row(row) => {
                    if let Some(last) = &self.last {
                        if key.compare(last, &row) == Ordering::Greater {
                            return Err(Error::Order(format!(
                                "{} input is not sorted by {}",
                                self.label, spec
                            )));
                        }
                    }
                    self.front = Some(row);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Move the front row out, remembering it for order verification.
    fn take(&mut self) -> Row {
        let row = self.front.take().expect("take on an exhausted side");
        self.last = Some(row.clone());
        row
    }
}

/// Merge two presorted inputs into one sorted output (two-way merge).
///
/// Ties go to the left side, which together with the driver's fixed
/// sibling order makes every merge tree built from this stable. Each
/// side is verified to be sorted as it is consumed.
pub struct MergeTwo {
    key: KeySpec,
    endpoints: Option<(Input, Input, Output)>,
    provenance: Option<String>,
    state: Option<State>,
}

struct State {
    left: Side,
    right: Side,
    sink: Sink,
    resolved: ResolvedKey,
}

impl MergeTwo {
    pub fn new(left: Input, right: Input, output: Output, key: KeySpec) -> MergeTwo {
        MergeTwo {
            key,
            endpoints: Some((left, right, output)),
            provenance: None,
            state: None,
        }
    }

    /// Set the trailer comment describing this invocation; the merge
    /// driver suppresses it on the intermediate merges.
    pub fn provenance<S: Into<String>>(mut self, provenance: S) -> MergeTwo {
        self.provenance = Some(provenance.into());
        self
    }

    fn state(&mut self) -> &mut State {
        self.state.as_mut().expect("setup not run")
    }
}

impl Filter for MergeTwo {
    fn name(&self) -> String {
        "merge2".into()
    }

    fn setup(&mut self) -> Result<()> {
        let (left, right, output) = self.endpoints.take().expect("setup run twice");
        let left = Source::open(left)?;
        let right = Source::open(right)?;
        if !left.schema().compatible(right.schema()) {
            return Err(Error::Schema(format!(
                "cannot merge incompatible streams: [{}] vs [{}]",
                left.schema(),
                right.schema()
            )));
        }
        let schema: Arc<Schema> = left.schema().clone();
        let resolved = self.key.resolve(&schema)?;
        let mut sink = Sink::open(output)?;
        sink.commit(schema)?;
        self.state = Some(State {
            left: Side {
                label: "left",
                source: left,
                front: None,
                last: None,
            },
            right: Side {
                label: "right",
                source: right,
                front: None,
                last: None,
            },
            sink,
            resolved,
        });
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let key = self.key.clone();
        let state = self.state();
        state.left.refill(&state.resolved, &key, &mut state.sink)?;
        state.right.refill(&state.resolved, &key, &mut state.sink)?;
        loop {
            let emit_left = match (&state.left.front, &state.right.front) {
                (Some(l), Some(r)) => state.resolved.compare(l, r) != Ordering::Greater,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if emit_left {
                let row = state.left.take();
                state.sink.row(row)?;
                state.left.refill(&state.resolved, &key, &mut state.sink)?;
            } else {
                let row = state.right.take();
                state.sink.row(row)?;
                state.right.refill(&state.resolved, &key, &mut state.sink)?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let provenance = self.provenance.take();
        let state = self.state();
        if !(state.left.source.at_eof() && state.right.source.at_eof()) {
            return Err(Error::Consumption(
                "merge finished without consuming both inputs".into(),
            ));
        }
        if let Some(provenance) = provenance {
            state.sink.comment(&format!("# | {}", provenance))?;
        }
        state.sink.finish()
    }
}
