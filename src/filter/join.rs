//! Sort-merge join of two presorted streams on a common key tuple.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterHandle, Input, Output, Sink, Sort, Source};
use crate::key::{KeySpec, ResolvedKey};
use crate::pipe::pipe_with_capacity;
use crate::stream::{Record, Row, Schema};

/// Which join tuples are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// Only rows whose keys match on both sides.
    Inner,
    /// Matching rows, plus every unmatched row padded with the empty
    /// token on the other side's non-key columns.
    Outer,
}

impl JoinType {
    /// Parse the `-t` argument. "left" and "right" are recognized but
    /// not implemented, which deserves a distinct message.
    pub fn from_arg(arg: &str) -> Result<JoinType> {
        match arg {
            "inner" => Ok(JoinType::Inner),
            "outer" => Ok(JoinType::Outer),
            "left" | "right" => Err(Error::Config(format!(
                "{} joins are not implemented; use inner or outer",
                arg
            ))),
            _ => Err(Error::Config(format!("unknown join type {:?}", arg))),
        }
    }
}

/// One side of the join: source, lookahead and ordering verification.
struct JoinSide {
    label: &'static str,
    source: Source,
    key: ResolvedKey,
    front: Option<Row>,
    last: Option<Row>,
    sorter: Option<FilterHandle>,
}

impl JoinSide {
    fn refill(&mut self, spec: &KeySpec, sink: &mut Sink) -> Result<()> {
        self.front = None;
        while let Some(record) = self.source.next_record()? {
            match record {
                Record::Comment(text) => sink.comment(&text)?,
                Record::Row(row) => {
                    if let Some(last) = &self.last {
                        if self.key.compare(last, &row) == Ordering::Greater {
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

    fn take(&mut self) -> Row {
        let row = self.front.take().expect("take on an exhausted side");
        self.last = Some(row.clone());
        row
    }
}

/// Inner or full-outer merge-join.
///
/// Both inputs must be sorted by the key spec; with `presorted(false)`
/// (the default) a [`Sort`] is inserted transparently on each side.
/// The output schema is the key columns first, then the left side's
/// non-key columns, then the right side's; a right non-key column that
/// collides with a left column name is fatal.
pub struct MergeJoin {
    key: KeySpec,
    join_type: JoinType,
    presorted: bool,
    empty: Option<String>,
    settings: Settings,
    provenance: Option<String>,
    endpoints: Option<(Input, Input, Output)>,
    state: Option<State>,
}

struct State {
    left: JoinSide,
    right: JoinSide,
    sink: Sink,
    layout: Layout,
    empty: String,
}

/// Input column indices in output order: key columns (from the left
/// row), then each side's non-key columns.
struct Layout {
    left_key: Vec<usize>,
    left_rest: Vec<usize>,
    right_rest: Vec<usize>,
}

impl MergeJoin {
    pub fn new(left: Input, right: Input, output: Output, key: KeySpec) -> MergeJoin {
        MergeJoin {
            key,
            join_type: JoinType::Inner,
            presorted: false,
            empty: None,
            settings: Settings::default(),
            provenance: None,
            endpoints: Some((left, right, output)),
            state: None,
        }
    }

    pub fn join_type(mut self, join_type: JoinType) -> MergeJoin {
        self.join_type = join_type;
        self
    }

    /// Assert the inputs are already sorted by the key; skips the
    /// transparent per-side sort (sortedness is still verified).
    pub fn presorted(mut self, presorted: bool) -> MergeJoin {
        self.presorted = presorted;
        self
    }

    /// Empty-value token used for the padded side of outer tuples.
    pub fn empty<S: Into<String>>(mut self, empty: S) -> MergeJoin {
        self.empty = Some(empty.into());
        self
    }

    pub fn settings(mut self, settings: Settings) -> MergeJoin {
        self.settings = settings;
        self
    }

    pub fn provenance<S: Into<String>>(mut self, provenance: S) -> MergeJoin {
        self.provenance = Some(provenance.into());
        self
    }

    /// Wrap an input in a transparent sort when sortedness was not
    /// asserted by the caller.
    fn open_side(&self, input: Input, label: &'static str) -> Result<(Source, Option<FilterHandle>)> {
        if self.presorted {
            return Ok((Source::open(input)?, None));
        }
        let (tx, rx) = pipe_with_capacity(self.settings.pipe_capacity);
        let sorter = Sort::new(input, Output::Pipe(tx), self.key.clone())
            .settings(self.settings.clone());
        let handle = crate::filter::spawn(sorter);
        debug!("sorting {} join input", label);
        Ok((Source::open(Input::Pipe(rx))?, Some(handle)))
    }
}

/// Compute the output layout and schema, rejecting non-key collisions.
fn output_schema(
    key: &KeySpec,
    left: &Schema,
    right: &Schema,
    empty: &str,
) -> Result<(Arc<Schema>, Layout)> {
    let mut columns: Vec<String> = Vec::new();
    let mut left_key = Vec::new();
    for col in key.columns() {
        left_key.push(left.resolve(&col.name)?);
        right.resolve(&col.name)?;
        columns.push(col.name.clone());
    }
    let key_names: Vec<&str> = key.names();

    let mut left_rest = Vec::new();
    for (i, name) in left.columns().iter().enumerate() {
        if !key_names.contains(&name.as_str()) {
            left_rest.push(i);
            columns.push(name.clone());
        }
    }
    let mut right_rest = Vec::new();
    for (i, name) in right.columns().iter().enumerate() {
        if key_names.contains(&name.as_str()) {
            continue;
        }
        if columns.contains(name) {
            return Err(Error::Schema(format!(
                "column {:?} appears on both sides of the join",
                name
            )));
        }
        right_rest.push(i);
        columns.push(name.clone());
    }

    let schema = Schema::new(left.separator(), columns)?.with_empty(empty);
    Ok((
        Arc::new(schema),
        Layout {
            left_key,
            left_rest,
            right_rest,
        },
    ))
}

impl State {
    fn emit_matched(&mut self, left: &Row, right: &Row) -> Result<()> {
        let mut row = Vec::with_capacity(
            self.layout.left_key.len() + self.layout.left_rest.len() + self.layout.right_rest.len(),
        );
        for &i in &self.layout.left_key {
            row.push(left[i].clone());
        }
        for &i in &self.layout.left_rest {
            row.push(left[i].clone());
        }
        for &i in &self.layout.right_rest {
            row.push(right[i].clone());
        }
        self.sink.row(row)
    }

    fn emit_left_only(&mut self, left: &Row) -> Result<()> {
        let mut row = Vec::new();
        for &i in &self.layout.left_key {
            row.push(left[i].clone());
        }
        for &i in &self.layout.left_rest {
            row.push(left[i].clone());
        }
        for _ in &self.layout.right_rest {
            row.push(self.empty.clone());
        }
        self.sink.row(row)
    }

    fn emit_right_only(&mut self, right: &Row) -> Result<()> {
        let mut row = Vec::new();
        for i in self.right.key.indices() {
            row.push(right[i].clone());
        }
        for _ in &self.layout.left_rest {
            row.push(self.empty.clone());
        }
        for &i in &self.layout.right_rest {
            row.push(right[i].clone());
        }
        self.sink.row(row)
    }
}

impl Filter for MergeJoin {
    fn name(&self) -> String {
        "join".into()
    }

    fn setup(&mut self) -> Result<()> {
        if self.key.is_empty() {
            return Err(Error::Config("join needs a key".into()));
        }
        let (left, right, output) = self.endpoints.take().expect("setup run twice");
        let (left_source, left_sorter) = self.open_side(left, "left")?;
        let (right_source, right_sorter) = self.open_side(right, "right")?;

        let empty = self
            .empty
            .clone()
            .unwrap_or_else(|| left_source.schema().empty().to_string());
        let (schema, layout) =
            output_schema(&self.key, left_source.schema(), right_source.schema(), &empty)?;
        let left_key = self.key.resolve(left_source.schema())?;
        let right_key = self.key.resolve(right_source.schema())?;

        let mut sink = Sink::open(output)?;
        sink.commit(schema)?;
        self.state = Some(State {
            left: JoinSide {
                label: "left",
                source: left_source,
                key: left_key,
                front: None,
                last: None,
                sorter: left_sorter,
            },
            right: JoinSide {
                label: "right",
                source: right_source,
                key: right_key,
                front: None,
                last: None,
                sorter: right_sorter,
            },
            sink,
            layout,
            empty,
        });
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let spec = self.key.clone();
        let join_type = self.join_type;
        let warn_at = self.settings.join_run_warn;
        let state = self.state.as_mut().expect("setup not run");

        state.left.refill(&spec, &mut state.sink)?;
        state.right.refill(&spec, &mut state.sink)?;

        loop {
            let ord = match (&state.left.front, &state.right.front) {
                (Some(l), Some(r)) => compare_across(&state.left.key, l, &state.right.key, r),
                _ => break,
            };
            match ord {
                Ordering::Less => {
                    let row = state.left.take();
                    if join_type == JoinType::Outer {
                        state.emit_left_only(&row)?;
                    }
                    state.left.refill(&spec, &mut state.sink)?;
                }
                Ordering::Greater => {
                    let row = state.right.take();
                    if join_type == JoinType::Outer {
                        state.emit_right_only(&row)?;
                    }
                    state.right.refill(&spec, &mut state.sink)?;
                }
                Ordering::Equal => {
                    // buffer the whole right-side run of this key, then
                    // cross it with every matching left row
                    let first_right = state.right.take();
                    let mut run: Vec<Row> = vec![first_right];
                    state.right.refill(&spec, &mut state.sink)?;
                    loop {
                        let same = match &state.right.front {
                            Some(r) => state.right.key.compare(&run[0], r) == Ordering::Equal,
                            None => false,
                        };
                        if !same {
                            break;
                        }
                        let row = state.right.take();
                        run.push(row);
                        state.right.refill(&spec, &mut state.sink)?;
                    }
                    if run.len() > warn_at {
                        warn!(
                            "join buffering {} right rows for one key (threshold {})",
                            run.len(),
                            warn_at
                        );
                    }
                    loop {
                        let matches = match &state.left.front {
                            Some(l) => {
                                compare_across(&state.left.key, l, &state.right.key, &run[0])
                                    == Ordering::Equal
                            }
                            None => false,
                        };
                        if !matches {
                            break;
                        }
                        let left_row = state.left.take();
                        for right_row in &run {
                            state.emit_matched(&left_row, right_row)?;
                        }
                        state.left.refill(&spec, &mut state.sink)?;
                    }
                }
            }
        }

        // one side is done; drain the other, emitting in outer mode
        while state.left.front.is_some() {
            let row = state.left.take();
            if join_type == JoinType::Outer {
                state.emit_left_only(&row)?;
            }
            state.left.refill(&spec, &mut state.sink)?;
        }
        while state.right.front.is_some() {
            let row = state.right.take();
            if join_type == JoinType::Outer {
                state.emit_right_only(&row)?;
            }
            state.right.refill(&spec, &mut state.sink)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let provenance = self.provenance.take();
        let state = self.state.as_mut().expect("setup not run");
        if !(state.left.source.at_eof() && state.right.source.at_eof()) {
            return Err(Error::Consumption(
                "join finished without consuming both inputs".into(),
            ));
        }
        for sorter in [state.left.sorter.take(), state.right.sorter.take()]
            .into_iter()
            .flatten()
        {
            sorter.join()?;
        }
        if let Some(provenance) = provenance {
            state.sink.comment(&format!("# | {}", provenance))?;
        }
        state.sink.finish()
    }
}

/// Compare a left row with a right row, each under its own resolved key.
fn compare_across(
    left_key: &ResolvedKey,
    left: &Row,
    right_key: &ResolvedKey,
    right: &Row,
) -> Ordering {
    let l = left_key.project(left);
    let r = right_key.project(right);
    left_key.compare_projected(&l, &r)
}
