//! The group-by driver: segment a keyed stream and run a reducer per
//! group.
//!
//! The input, sorted by the group key (or sorted here, or verified),
//! is cut at key transitions. In the default, group-ignorant mode each
//! group goes to a fresh reducer instance over a bounded pipe and a
//! post-processor worker collects the reducers' outputs, re-injecting
//! the key column when the reducer does not emit it. A group-aware
//! reducer instead receives the whole stream and watches the key itself.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::channel::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::filter::{
    spawn_boxed, Filter, FilterHandle, Input, Output, ReducerFactory, Sink, Sort, Source,
};
use crate::key::KeySpec;
use crate::pipe::{pipe_with_capacity, PipeItem, PipeReceiver, PipeSender};
use crate::stream::{Record, Row, Schema};

/// How much the driver trusts the input's ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presort {
    /// Sort the input by the group key first.
    No,
    /// Declared sorted; verify each group is contiguous (`-S`).
    Verify,
    /// Declared sorted; take it on faith (`-S -S`).
    Trust,
}

enum Routed {
    Comment(String),
    Group {
        key: Option<String>,
        rx: PipeReceiver,
    },
}

/// Group a sorted stream by one column and reduce each group.
pub struct GroupBy {
    key_column: String,
    presort: Presort,
    group_aware: bool,
    factory: Arc<dyn ReducerFactory>,
    settings: Settings,
    provenance: Option<String>,
    endpoints: Option<(Input, Output)>,
    state: Option<State>,
}

enum State {
    /// Group-ignorant mode: the driver cuts groups itself.
    Grouping {
        source: Source,
        key_index: usize,
        input_schema: Arc<Schema>,
        sorter: Option<FilterHandle>,
        groups_tx: Option<UnboundedSender<Routed>>,
        post: Option<JoinHandle<Result<()>>>,
    },
    /// Group-aware mode: one reducer sees the whole stream.
    Aware {
        sorter: Option<FilterHandle>,
        reducer: Option<FilterHandle>,
        rx: Option<PipeReceiver>,
        sink: Option<Sink>,
    },
}

impl GroupBy {
    pub fn new<S: Into<String>>(
        input: Input,
        output: Output,
        key_column: S,
        factory: Arc<dyn ReducerFactory>,
    ) -> GroupBy {
        GroupBy {
            key_column: key_column.into(),
            presort: Presort::No,
            group_aware: false,
            factory,
            settings: Settings::default(),
            provenance: None,
            endpoints: Some((input, output)),
            state: None,
        }
    }

    pub fn presort(mut self, presort: Presort) -> GroupBy {
        self.presort = presort;
        self
    }

    /// The reducer sees the whole stream and handles key transitions
    /// itself (`-M`).
    pub fn group_aware(mut self, group_aware: bool) -> GroupBy {
        self.group_aware = group_aware;
        self
    }

    pub fn settings(mut self, settings: Settings) -> GroupBy {
        self.settings = settings;
        self
    }

    pub fn provenance<S: Into<String>>(mut self, provenance: S) -> GroupBy {
        self.provenance = Some(provenance.into());
        self
    }
}

impl Filter for GroupBy {
    fn name(&self) -> String {
        "group-by".into()
    }

    fn setup(&mut self) -> Result<()> {
        let (input, output) = self.endpoints.take().expect("setup run twice");

        // transparently sort unless the caller declared the input sorted
        let (input, sorter) = if self.presort == Presort::No {
            let (tx, rx) = pipe_with_capacity(self.settings.pipe_capacity);
            let sort = Sort::new(
                input,
                Output::Pipe(tx),
                KeySpec::new().lexical(&self.key_column),
            )
            .settings(self.settings.clone());
            (Input::Pipe(rx), Some(crate::filter::spawn(sort)))
        } else {
            (input, None)
        };

        if self.group_aware {
            let (out_tx, out_rx) = pipe_with_capacity(self.settings.pipe_capacity);
            let reducer = self.factory.make(None, input, Output::Pipe(out_tx))?;
            self.state = Some(State::Aware {
                sorter,
                reducer: Some(spawn_boxed(reducer)),
                rx: Some(out_rx),
                sink: Some(Sink::open(output)?),
            });
            return Ok(());
        }

        let source = Source::open(input)?;
        let input_schema = source.schema().clone();
        let key_index = input_schema.resolve(&self.key_column)?;

        let (groups_tx, groups_rx) = unbounded_channel();
        let post = spawn_post_processor(
            groups_rx,
            Sink::open(output)?,
            input_schema.clone(),
            self.key_column.clone(),
            self.provenance.take(),
        );

        self.state = Some(State::Grouping {
            source,
            key_index,
            input_schema,
            sorter,
            groups_tx: Some(groups_tx),
            post: Some(post),
        });
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let factory = self.factory.clone();
        let verify = self.presort == Presort::Verify;
        let capacity = self.settings.pipe_capacity;
        let provenance = self.provenance.take();

        match self.state.as_mut().expect("setup not run") {
            State::Aware { rx, sink, .. } => {
                let rx = rx.take().expect("run twice");
                let mut sink = sink.take().expect("run twice");
                run_aware(rx, &mut sink, provenance)
            }
            State::Grouping {
                source,
                key_index,
                input_schema,
                groups_tx,
                post,
                ..
            } => {
                let groups_tx = groups_tx.take().expect("run twice");
                let result = run_grouping(
                    source,
                    *key_index,
                    input_schema,
                    &*factory,
                    verify,
                    capacity,
                    groups_tx,
                );
                match result {
                    // a broken pipe mid-run usually means the
                    // post-processor died first; its error is the cause
                    Err(e) if e.is_downstream_closed() => {
                        if let Some(post) = post.take() {
                            post.join().expect("post-processor panicked")?;
                        }
                        Err(e)
                    }
                    other => other,
                }
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        match self.state.as_mut().expect("setup not run") {
            State::Aware {
                sorter, reducer, ..
            } => {
                if let Some(reducer) = reducer.take() {
                    reducer.join()?;
                }
                if let Some(sorter) = sorter.take() {
                    sorter.join()?;
                }
                Ok(())
            }
            State::Grouping {
                source,
                sorter,
                post,
                ..
            } => {
                if !source.at_eof() {
                    return Err(Error::Consumption(
                        "group-by finished without consuming its input".into(),
                    ));
                }
                if let Some(post) = post.take() {
                    post.join().expect("post-processor panicked")?;
                }
                if let Some(sorter) = sorter.take() {
                    sorter.join()?;
                }
                Ok(())
            }
        }
    }
}

/// Group-aware mode: drain the lone reducer's output into the final
/// sink, appending the driver's provenance.
fn run_aware(rx: PipeReceiver, sink: &mut Sink, provenance: Option<String>) -> Result<()> {
    match rx.dequeue() {
        Some(PipeItem::Header(schema)) => sink.commit(schema)?,
        _ => return Err(Error::Schema("reducer closed before its header".into())),
    }
    while let Some(item) = rx.dequeue() {
        match item {
            PipeItem::Record(record) => sink.record(record)?,
            PipeItem::Header(_) => return Err(Error::Schema("schema change mid-stream".into())),
        }
    }
    if let Some(provenance) = provenance {
        sink.comment(&format!("# | {}", provenance))?;
    }
    sink.finish()
}

/// Group-ignorant mode: the main reader loop. Cuts the stream at key
/// transitions and feeds each group to a fresh reducer.
fn run_grouping(
    source: &mut Source,
    key_index: usize,
    input_schema: &Arc<Schema>,
    factory: &dyn ReducerFactory,
    verify: bool,
    capacity: usize,
    groups_tx: UnboundedSender<Routed>,
) -> Result<()> {
    let mut current: Option<OpenGroup> = None;
    let mut seen: HashSet<String> = HashSet::new();
    let mut any_group = false;

    while let Some(record) = source.next_record()? {
        match record {
            Record::Comment(text) => {
                let _ = groups_tx.send(Routed::Comment(text));
            }
            Record::Row(row) => {
                let key = &row[key_index];
                let switch = match &current {
                    Some(group) => group.key.as_deref() != Some(key.as_str()),
                    None => true,
                };
                if switch {
                    if let Some(group) = current.take() {
                        group.close()?;
                    }
                    if verify && !seen.insert(key.clone()) {
                        return Err(Error::Order(format!(
                            "input declared sorted, but group {:?} is not contiguous",
                            key
                        )));
                    }
                    any_group = true;
                    current = Some(OpenGroup::start(
                        factory,
                        Some(key.clone()),
                        input_schema,
                        capacity,
                        &groups_tx,
                    )?);
                }
                let group = current.as_mut().expect("group just opened");
                if group.feed(row).is_err() {
                    // the reducer hung up mid-group; join it for the
                    // real story
                    let group = current.take().expect("group just fed");
                    return Err(group.close().err().unwrap_or_else(|| {
                        Error::Consumption(
                            "reducer stopped reading before its group ended".into(),
                        )
                    }));
                }
            }
        }
    }

    if let Some(group) = current.take() {
        group.close()?;
    }
    if !any_group {
        // the reducer still runs once, with a null key and no rows, so
        // it can emit a header
        OpenGroup::start(factory, None, input_schema, capacity, &groups_tx)?.close()?;
    }
    drop(groups_tx);
    Ok(())
}

/// A reducer instance currently being fed its group.
struct OpenGroup {
    key: Option<String>,
    tx: PipeSender,
    handle: FilterHandle,
}

impl OpenGroup {
    fn start(
        factory: &dyn ReducerFactory,
        key: Option<String>,
        input_schema: &Arc<Schema>,
        capacity: usize,
        groups_tx: &UnboundedSender<Routed>,
    ) -> Result<OpenGroup> {
        let (in_tx, in_rx) = pipe_with_capacity(capacity);
        let (out_tx, out_rx) = pipe_with_capacity(capacity);
        let reducer = factory.make(key.as_deref(), Input::Pipe(in_rx), Output::Pipe(out_tx))?;
        debug!("starting {} for group {:?}", factory.describe(), key);
        let handle = spawn_boxed(reducer);
        if in_tx.header(input_schema.clone()).is_err() {
            // the reducer died during setup; its own error is the cause
            return Err(handle.join().err().unwrap_or(Error::Downstream));
        }
        let _ = groups_tx.send(Routed::Group {
            key: key.clone(),
            rx: out_rx,
        });
        Ok(OpenGroup {
            key,
            tx: in_tx,
            handle,
        })
    }

    fn feed(&mut self, row: Row) -> Result<()> {
        self.tx.record(Record::Row(row))
    }

    /// Signal end of group and wait for the reducer. A reducer that
    /// returned without consuming its rows fails here.
    fn close(self) -> Result<()> {
        drop(self.tx);
        debug!("closed group {:?}", self.key);
        self.handle.join()
    }
}

/// The post-processor worker: collects every group's output stream,
/// enforces one schema across groups, re-injects the key column when
/// missing, and writes the final output.
fn spawn_post_processor(
    groups_rx: UnboundedReceiver<Routed>,
    mut sink: Sink,
    input_schema: Arc<Schema>,
    key_column: String,
    provenance: Option<String>,
) -> JoinHandle<Result<()>> {
    std::thread::Builder::new()
        .name("group-post".into())
        .spawn(move || -> Result<()> {
            let mut reducer_schema: Option<Arc<Schema>> = None;
            let mut inject_key = false;
            let mut held_comments: Vec<String> = Vec::new();

            while let Ok(routed) = groups_rx.recv() {
                match routed {
                    Routed::Comment(text) => {
                        if reducer_schema.is_some() {
                            sink.comment(&text)?;
                        } else {
                            held_comments.push(text);
                        }
                    }
                    Routed::Group { key, rx } => {
                        let group_schema = match rx.dequeue() {
                            Some(PipeItem::Header(schema)) => schema,
                            _ => {
                                return Err(Error::Schema(
                                    "reducer closed before its header".into(),
                                ))
                            }
                        };
                        match &reducer_schema {
                            None => {
                                // the first reducer fixes the output
                                // schema for the whole run
                                inject_key = group_schema.index_of(&key_column).is_none();
                                let mut columns: Vec<String> = Vec::new();
                                if inject_key {
                                    columns.push(key_column.clone());
                                }
                                columns.extend(group_schema.columns().iter().cloned());
                                // a reducer emitting another separator is
                                // repaired by re-encoding under the
                                // surrounding stream's separator
                                let schema = Schema::new(input_schema.separator(), columns)?
                                    .with_empty(input_schema.empty().to_string());
                                sink.commit(Arc::new(schema))?;
                                reducer_schema = Some(group_schema);
                                for text in held_comments.drain(..) {
                                    sink.comment(&text)?;
                                }
                            }
                            Some(first) => {
                                if first.columns() != group_schema.columns() {
                                    return Err(Error::Schema(format!(
                                        "reducer changed its schema between groups: [{}] vs [{}]",
                                        first.columns().join(", "),
                                        group_schema.columns().join(", ")
                                    )));
                                }
                            }
                        }
                        let key_field = key.unwrap_or_else(|| input_schema.empty().to_string());
                        while let Some(item) = rx.dequeue() {
                            match item {
                                PipeItem::Record(Record::Row(mut row)) => {
                                    if inject_key {
                                        row.insert(0, key_field.clone());
                                    }
                                    sink.row(row)?;
                                }
                                PipeItem::Record(Record::Comment(text)) => sink.comment(&text)?,
                                PipeItem::Header(_) => {
                                    return Err(Error::Schema("schema change mid-stream".into()))
                                }
                            }
                        }
                    }
                }
            }

            if let Some(provenance) = provenance {
                sink.comment(&format!("# | {}", provenance))?;
            }
            sink.finish()
        })
        .expect("failed to spawn worker thread")
}
