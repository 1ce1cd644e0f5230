//! The N-way merge driver: a bounded-parallel binary tree of two-way
//! merges.
//!
//! Inputs sit in a work queue per tree depth. The driver repeatedly takes
//! the two front-most ready items of a depth and schedules a [`MergeTwo`]
//! for them; the output lands one depth up, as a spill file, or, once the
//! whole remaining tree fits under the parallelism budget (the endgame),
//! as an in-memory pipe so the last levels run as a streaming pipeline.
//! The very last merge runs inline on the caller's thread and produces
//! the system output.
//!
//! Scheduling order is what makes the whole tree stable: pairs are taken
//! front-first, outputs keep their pair's queue position (a pending slot
//! placed at schedule time), and a depth's lone leftover is promoted to
//! the back of the next depth only once its own depth is closed.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::thread::JoinHandle;

use crate::channel::{bounded_channel, unbounded_channel, UnboundedReceiver, UnboundedSender};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::filter::{Filter, Input, MergeTwo, Output, Sink, Source};
use crate::key::KeySpec;
use crate::pipe::{pipe_with_capacity, PipeReceiver};
use crate::spill;
use crate::stream::Record;

/// One leaf or intermediate result in the merge tree.
pub enum MergeInput {
    File {
        path: PathBuf,
        /// Delete the file once a merge has consumed it.
        remove: bool,
    },
    Pipe(PipeReceiver),
}

impl MergeInput {
    /// A caller-owned file, left in place after the merge.
    pub fn file<P: Into<PathBuf>>(path: P) -> MergeInput {
        MergeInput::File {
            path: path.into(),
            remove: false,
        }
    }

    /// A file consumed by the merge: deleted (and dropped from the spill
    /// registry) as soon as the merge that read it completes.
    pub fn temp_file<P: Into<PathBuf>>(path: P) -> MergeInput {
        MergeInput::File {
            path: path.into(),
            remove: true,
        }
    }

    fn open_parts(self) -> (Input, Option<PathBuf>) {
        match self {
            MergeInput::File { path, remove } => {
                let cleanup = remove.then(|| path.clone());
                (Input::Path(path), cleanup)
            }
            MergeInput::Pipe(rx) => (Input::Pipe(rx), None),
        }
    }
}

impl std::fmt::Debug for MergeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeInput::File { path, remove } => {
                write!(f, "MergeInput::File({}, remove={})", path.display(), remove)
            }
            MergeInput::Pipe(_) => write!(f, "MergeInput::Pipe"),
        }
    }
}

enum Leaves {
    /// All inputs known up front; depth 0 starts closed.
    Listed(Vec<MergeInput>),
    /// Filenames arrive as rows on an input stream; depth 0 stays open
    /// until that stream ends.
    Xargs(Input),
}

enum Slot {
    Ready(MergeInput),
    /// A merge has been scheduled into this position but has not
    /// produced its output yet.
    Pending(u64),
}

enum Ctl {
    Leaf(Result<MergeInput>),
    LeavesDone,
    Done {
        id: u64,
        depth: usize,
        result: Result<Option<MergeInput>>,
    },
}

/// Merge any number of presorted, schema-compatible inputs into one
/// sorted output with bounded memory and bounded parallelism.
pub struct MergeTree {
    key: KeySpec,
    settings: Settings,
    remove_inputs: bool,
    provenance: Option<String>,
    leaves: Option<Leaves>,
    output: Option<Output>,
}

impl MergeTree {
    pub fn new(inputs: Vec<MergeInput>, output: Output, key: KeySpec) -> MergeTree {
        MergeTree {
            key,
            settings: Settings::default(),
            remove_inputs: false,
            provenance: None,
            leaves: Some(Leaves::Listed(inputs)),
            output: Some(output),
        }
    }

    /// Read the inputs to merge, one filename per row, from a stream.
    pub fn from_xargs(filenames: Input, output: Output, key: KeySpec) -> MergeTree {
        MergeTree {
            key,
            settings: Settings::default(),
            remove_inputs: false,
            provenance: None,
            leaves: Some(Leaves::Xargs(filenames)),
            output: Some(output),
        }
    }

    pub fn settings(mut self, settings: Settings) -> MergeTree {
        self.settings = settings;
        self
    }

    /// Delete every input file as soon as it has been merged.
    pub fn remove_inputs(mut self, remove: bool) -> MergeTree {
        self.remove_inputs = remove;
        self
    }

    pub fn provenance<S: Into<String>>(mut self, provenance: S) -> MergeTree {
        self.provenance = Some(provenance.into());
        self
    }
}

impl Filter for MergeTree {
    fn name(&self) -> String {
        "merge-tree".into()
    }

    fn setup(&mut self) -> Result<()> {
        if let Some(Leaves::Listed(inputs)) = &self.leaves {
            if inputs.len() < 2 {
                return Err(Error::Config(format!(
                    "merge needs at least two inputs, got {}",
                    inputs.len()
                )));
            }
        }
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let leaves = self.leaves.take().expect("run twice");
        let output = self.output.take().expect("run twice");
        let mut driver = Driver::new(
            self.key.clone(),
            self.settings.clone(),
            self.provenance.take(),
        );
        driver.run(leaves, output, self.remove_inputs)
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

struct Driver {
    key: KeySpec,
    settings: Settings,
    provenance: Option<String>,

    levels: Vec<VecDeque<Slot>>,
    closed: Vec<bool>,
    leaf_count: usize,

    /// Live two-way merges; the budget below bounds it.
    live: usize,
    budget: usize,
    /// Gates of merges scheduled while the budget was exhausted, oldest
    /// first.
    deferred: VecDeque<crate::channel::BoundedSender<()>>,
    endgame: bool,

    ctl_tx: UnboundedSender<Ctl>,
    ctl_rx: UnboundedReceiver<Ctl>,
    workers: Vec<JoinHandle<()>>,
    next_id: u64,

    aborting: bool,
    first_err: Option<Error>,
}

/// What the scheduler found to do next.
enum Step {
    /// The two items of the root merge.
    FinalPair(MergeInput, MergeInput),
    /// A single item is the whole result (xargs can end this way when
    /// its last two files were merged before end-of-list was known).
    FinalSingle(MergeInput),
    /// Nothing more to start right now; wait on the control queue.
    Wait,
}

impl Driver {
    fn new(key: KeySpec, settings: Settings, provenance: Option<String>) -> Driver {
        let (ctl_tx, ctl_rx) = unbounded_channel();
        let budget = settings.parallelism.max(1);
        Driver {
            key,
            settings,
            provenance,
            levels: vec![VecDeque::new()],
            closed: vec![false],
            leaf_count: 0,
            live: 0,
            budget,
            deferred: VecDeque::new(),
            endgame: false,
            ctl_tx,
            ctl_rx,
            workers: Vec::new(),
            next_id: 0,
            aborting: false,
            first_err: None,
        }
    }

    fn run(&mut self, leaves: Leaves, output: Output, remove_inputs: bool) -> Result<()> {
        match leaves {
            Leaves::Listed(inputs) => {
                self.leaf_count = inputs.len();
                for input in inputs {
                    let input = match (remove_inputs, input) {
                        (true, MergeInput::File { path, .. }) => MergeInput::temp_file(path),
                        (_, input) => input,
                    };
                    self.levels[0].push_back(Slot::Ready(input));
                }
                self.closed[0] = true;
            }
            Leaves::Xargs(filenames) => {
                self.spawn_leaf_reader(filenames, remove_inputs);
            }
        }

        let final_result = self.drive(output);

        // drain whatever is still in flight before reporting
        while self.live > 0 {
            match self.ctl_rx.recv() {
                Ok(msg) => self.handle(msg),
                Err(_) => break,
            }
        }
        self.deferred.clear();
        self.levels.clear();
        for worker in self.workers.drain(..) {
            worker.join().expect("merge worker panicked");
        }

        match self.first_err.take() {
            Some(e) => Err(e),
            None => final_result,
        }
    }

    /// The main control loop: schedule what can be scheduled, block on
    /// the control queue for progress, stop at the root.
    fn drive(&mut self, output: Output) -> Result<()> {
        loop {
            if self.aborting {
                if self.live == 0 {
                    return Err(self
                        .first_err
                        .take()
                        .unwrap_or_else(|| Error::Config("merge aborted".into())));
                }
            } else {
                match self.schedule()? {
                    Step::FinalPair(left, right) => return self.final_merge(left, right, output),
                    Step::FinalSingle(item) => return self.final_copy(item, output),
                    Step::Wait => {}
                }
            }
            match self.ctl_rx.recv() {
                Ok(msg) => self.handle(msg),
                Err(_) => {
                    return Err(Error::Config("merge driver control queue broke".into()));
                }
            }
        }
    }

    fn handle(&mut self, msg: Ctl) {
        match msg {
            Ctl::Leaf(Ok(input)) => {
                if !self.aborting {
                    self.leaf_count += 1;
                    self.levels[0].push_back(Slot::Ready(input));
                }
            }
            Ctl::Leaf(Err(e)) => self.abort(e),
            Ctl::LeavesDone => {
                self.closed[0] = true;
                if self.leaf_count < 2 && !self.aborting {
                    self.abort(Error::Config(format!(
                        "merge needs at least two inputs, got {}",
                        self.leaf_count
                    )));
                }
            }
            Ctl::Done { id, depth, result } => {
                self.live -= 1;
                match result {
                    Ok(Some(input)) => self.fill_pending(depth, id, input),
                    Ok(None) => {}
                    Err(e) => self.abort(e),
                }
                if !self.aborting {
                    if let Some(gate) = self.deferred.pop_front() {
                        // hand the freed budget to the oldest waiter
                        let _ = gate.send(());
                        self.live += 1;
                    }
                }
            }
        }
    }

    fn abort(&mut self, e: Error) {
        warn!("merge tree aborting: {}", e);
        if self.first_err.is_none() {
            self.first_err = Some(e);
        }
        self.aborting = true;
        // waiting gates die unraised and queued pipe receivers drop,
        // which cancels the merges feeding them
        self.deferred.clear();
        self.levels.clear();
        self.levels.push(VecDeque::new());
    }

    fn total_slots(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    fn all_closed(&self) -> bool {
        self.closed.iter().all(|&c| c)
    }

    fn ensure_level(&mut self, depth: usize) {
        while self.levels.len() <= depth {
            self.levels.push(VecDeque::new());
            self.closed.push(false);
        }
        while self.closed.len() < self.levels.len() {
            self.closed.push(false);
        }
    }

    fn fill_pending(&mut self, depth: usize, id: u64, input: MergeInput) {
        if self.aborting {
            return;
        }
        for slot in self.levels[depth].iter_mut() {
            if matches!(slot, Slot::Pending(p) if *p == id) {
                *slot = Slot::Ready(input);
                return;
            }
        }
        panic!("no pending slot {} at depth {}", id, depth);
    }

    /// One scheduling pass: propagate closure, promote runts, start every
    /// merge the queues and the budget allow, and detect the root.
    fn schedule(&mut self) -> Result<Step> {
        loop {
            // a depth with nothing more arriving closes the one above it
            for d in 0..self.levels.len().saturating_sub(1) {
                if self.closed[d] && self.levels[d].is_empty() {
                    self.closed[d + 1] = true;
                }
            }

            if self.all_closed() {
                match self.total_slots() {
                    1 => {
                        if let Some(item) = self.pop_lone_ready() {
                            return Ok(Step::FinalSingle(item));
                        }
                    }
                    2 => {
                        if let Some((left, right)) = self.pop_final_pair() {
                            return Ok(Step::FinalPair(left, right));
                        }
                    }
                    _ => {}
                }
            }

            self.maybe_enter_endgame();

            let mut progressed = false;

            // promote a closed depth's lone leftover to the next depth
            for d in 0..self.levels.len() {
                if self.closed[d]
                    && self.levels[d].len() == 1
                    && self.total_slots() > 1
                    && matches!(self.levels[d].front(), Some(Slot::Ready(_)))
                {
                    if let Some(Slot::Ready(item)) = self.levels[d].pop_front() {
                        debug!("promoting leftover from depth {} to {}", d, d + 1);
                        self.ensure_level(d + 1);
                        self.levels[d + 1].push_back(Slot::Ready(item));
                        progressed = true;
                    }
                }
            }

            // pair up ready fronts
            for d in 0..self.levels.len() {
                while self.can_pair_at(d) {
                    self.start_pair(d)?;
                    progressed = true;
                }
            }

            if !progressed {
                return Ok(Step::Wait);
            }
        }
    }

    /// Two ready items at the front of this depth, and pairing them does
    /// not consume the root pair.
    fn can_pair_at(&self, d: usize) -> bool {
        if self.all_closed() && self.total_slots() == 2 {
            return false;
        }
        let level = &self.levels[d];
        matches!(
            (level.front(), level.get(1)),
            (Some(Slot::Ready(_)), Some(Slot::Ready(_)))
        )
    }

    fn pop_lone_ready(&mut self) -> Option<MergeInput> {
        let level = self.levels.iter_mut().find(|l| !l.is_empty())?;
        match level.front() {
            Some(Slot::Ready(_)) => match level.pop_front() {
                Some(Slot::Ready(item)) => Some(item),
                _ => unreachable!(),
            },
            _ => None,
        }
    }

    /// The two remaining items, if both are ready. Runt promotion has
    /// already pushed them into the same depth in sibling order.
    fn pop_final_pair(&mut self) -> Option<(MergeInput, MergeInput)> {
        let level = self.levels.iter_mut().find(|l| l.len() == 2)?;
        if !matches!(
            (level.front(), level.get(1)),
            (Some(Slot::Ready(_)), Some(Slot::Ready(_)))
        ) {
            return None;
        }
        let left = match level.pop_front() {
            Some(Slot::Ready(item)) => item,
            _ => unreachable!(),
        };
        let right = match level.pop_front() {
            Some(Slot::Ready(item)) => item,
            _ => unreachable!(),
        };
        Some((left, right))
    }

    /// Switch the remaining tree to streaming pipes once every merge
    /// still to come fits under the parallelism budget at once.
    fn maybe_enter_endgame(&mut self) {
        if self.endgame || !self.settings.endgame || !self.closed[0] {
            return;
        }
        let remaining = self.total_slots().saturating_sub(1);
        if remaining > 0 && self.live + remaining <= self.budget {
            info!(
                "merge endgame: {} merges remaining under budget {}",
                remaining, self.budget
            );
            self.endgame = true;
        }
    }

    /// Start (or defer) the merge of the two front items of depth `d`.
    fn start_pair(&mut self, d: usize) -> Result<()> {
        let left = match self.levels[d].pop_front() {
            Some(Slot::Ready(item)) => item,
            _ => unreachable!("caller checked"),
        };
        let right = match self.levels[d].pop_front() {
            Some(Slot::Ready(item)) => item,
            _ => unreachable!("caller checked"),
        };
        let id = self.next_id;
        self.next_id += 1;
        self.ensure_level(d + 1);

        let ctl = self.ctl_tx.clone();
        let key = self.key.clone();
        let depth = d + 1;

        if self.endgame {
            // streaming: the output is a pipe whose consumer is ready at
            // once, and the budget has room by construction
            let (tx, rx) = pipe_with_capacity(self.settings.pipe_capacity);
            self.levels[depth].push_back(Slot::Ready(MergeInput::Pipe(rx)));
            self.live += 1;
            self.spawn_merge_worker(id, move || {
                let result = run_pair(left, right, Output::Pipe(tx), key).map(|_| None);
                let _ = ctl.send(Ctl::Done { id, depth, result });
            });
        } else {
            self.levels[depth].push_back(Slot::Pending(id));
            let gate = if self.live < self.budget {
                self.live += 1;
                None
            } else {
                let (gate_tx, gate_rx) = bounded_channel::<()>(1);
                self.deferred.push_back(gate_tx);
                Some(gate_rx)
            };
            let dir = self.settings.spill_dir();
            self.spawn_merge_worker(id, move || {
                if let Some(gate) = gate {
                    if gate.recv().is_err() {
                        // the driver is aborting; never started, so no
                        // completion message either
                        return;
                    }
                }
                let result = spill::registry().create_in(&dir).and_then(|path| {
                    run_pair(left, right, Output::Path(path.clone()), key)
                        .map(|_| Some(MergeInput::temp_file(path)))
                });
                let _ = ctl.send(Ctl::Done { id, depth, result });
            });
        }
        Ok(())
    }

    fn spawn_merge_worker<F: FnOnce() + Send + 'static>(&mut self, id: u64, f: F) {
        let handle = std::thread::Builder::new()
            .name(format!("merge{}", id))
            .spawn(f)
            .expect("failed to spawn worker thread");
        self.workers.push(handle);
    }

    fn spawn_leaf_reader(&mut self, filenames: Input, remove_inputs: bool) {
        let ctl = self.ctl_tx.clone();
        let handle = std::thread::Builder::new()
            .name("merge-xargs".into())
            .spawn(move || {
                let mut source = match Source::open(filenames) {
                    Ok(source) => source,
                    Err(e) => {
                        let _ = ctl.send(Ctl::Leaf(Err(e)));
                        let _ = ctl.send(Ctl::LeavesDone);
                        return;
                    }
                };
                loop {
                    match source.next_record() {
                        Ok(Some(Record::Row(row))) => {
                            let input = if remove_inputs {
                                MergeInput::temp_file(&row[0])
                            } else {
                                MergeInput::file(&row[0])
                            };
                            if ctl.send(Ctl::Leaf(Ok(input))).is_err() {
                                return;
                            }
                        }
                        Ok(Some(Record::Comment(_))) => {}
                        Ok(None) => break,
                        Err(e) => {
                            let _ = ctl.send(Ctl::Leaf(Err(e)));
                            break;
                        }
                    }
                }
                let _ = ctl.send(Ctl::LeavesDone);
            })
            .expect("failed to spawn worker thread");
        self.workers.push(handle);
    }

    /// The root merge, run inline on the caller's thread.
    fn final_merge(&mut self, left: MergeInput, right: MergeInput, output: Output) -> Result<()> {
        debug!("running final merge inline");
        let (left, left_cleanup) = left.open_parts();
        let (right, right_cleanup) = right.open_parts();
        let mut merge = MergeTwo::new(left, right, output, self.key.clone());
        if let Some(provenance) = self.provenance.take() {
            merge = merge.provenance(provenance);
        }
        merge.execute()?;
        for path in [left_cleanup, right_cleanup].into_iter().flatten() {
            spill::registry().release(&path);
        }
        Ok(())
    }

    /// A lone result with nothing to merge against: copy it through.
    fn final_copy(&mut self, item: MergeInput, output: Output) -> Result<()> {
        let (input, cleanup) = item.open_parts();
        let mut source = Source::open(input)?;
        let mut sink = Sink::open(output)?;
        sink.commit(source.schema().clone())?;
        while let Some(record) = source.next_record()? {
            sink.record(record)?;
        }
        if let Some(provenance) = self.provenance.take() {
            sink.comment(&format!("# | {}", provenance))?;
        }
        sink.finish()?;
        if let Some(path) = cleanup {
            spill::registry().release(&path);
        }
        Ok(())
    }
}

/// One two-way merge, input cleanup included.
fn run_pair(left: MergeInput, right: MergeInput, output: Output, key: KeySpec) -> Result<()> {
    let (left, left_cleanup) = left.open_parts();
    let (right, right_cleanup) = right.open_parts();
    MergeTwo::new(left, right, output, key).execute()?;
    for path in [left_cleanup, right_cleanup].into_iter().flatten() {
        spill::registry().release(&path);
    }
    Ok(())
}
