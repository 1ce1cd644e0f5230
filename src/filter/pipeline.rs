//! The pipeline builder: instantiate filters, connect them with pipes,
//! start and join the workers.

use crate::error::{Error, Result};
use crate::filter::{spawn_boxed, Filter, Input, Output};
use crate::pipe::{default_capacity, pipe_elastic, pipe_with_capacity};

type StageFactory = Box<dyn FnOnce(Input, Output) -> Result<Box<dyn Filter>> + Send>;

/// Builds a chain `F1 | F2 | … | Fn` out of filter factories.
///
/// The builder creates the n−1 connecting pipes and wires each stage's
/// output to the next stage's input. By default every stage runs on its
/// own worker thread; [`Pipeline::sequential`] instead runs the stages
/// one after the other on the calling thread, with elastic edges that
/// buffer a completed stage's whole output (only sensible when every
/// intermediate stream fits in memory).
pub struct Pipeline {
    stages: Vec<StageFactory>,
    parallel: bool,
    pipe_capacity: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new()
    }
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline {
            stages: Vec::new(),
            parallel: true,
            pipe_capacity: default_capacity(),
        }
    }

    /// Append a stage. The factory receives the endpoints the builder
    /// chose for it and hands back the configured filter.
    pub fn stage<F>(mut self, factory: F) -> Pipeline
    where
        F: FnOnce(Input, Output) -> Result<Box<dyn Filter>> + Send + 'static,
    {
        self.stages.push(Box::new(factory));
        self
    }

    /// Run all stages cooperatively on the calling thread instead of one
    /// worker each.
    pub fn sequential(mut self) -> Pipeline {
        self.parallel = false;
        self
    }

    /// Capacity of the connecting pipes (parallel mode only).
    pub fn pipe_capacity(mut self, cap: usize) -> Pipeline {
        self.pipe_capacity = cap.max(1);
        self
    }

    /// Wire the stages between `input` and `output` and run the chain to
    /// completion, surfacing the first stage error.
    pub fn run(self, input: Input, output: Output) -> Result<()> {
        if self.stages.is_empty() {
            return Err(Error::Config("pipeline has no stages".into()));
        }
        let parallel = self.parallel;
        let filters = self.build(input, output)?;
        if parallel {
            run_parallel(filters)
        } else {
            run_sequential(filters)
        }
    }

    /// Instantiate every stage with its endpoints wired.
    fn build(self, input: Input, output: Output) -> Result<Vec<Box<dyn Filter>>> {
        let last = self.stages.len() - 1;
        let mut filters = Vec::with_capacity(self.stages.len());
        let mut upstream = Some(input);
        let mut output = Some(output);
        for (i, factory) in self.stages.into_iter().enumerate() {
            let stage_in = upstream.take().expect("stage input already taken");
            let stage_out = if i == last {
                output.take().expect("pipeline output already taken")
            } else {
                let (tx, rx) = if self.parallel {
                    pipe_with_capacity(self.pipe_capacity)
                } else {
                    pipe_elastic()
                };
                upstream = Some(Input::Pipe(rx));
                Output::Pipe(tx)
            };
            filters.push(factory(stage_in, stage_out)?);
        }
        Ok(filters)
    }
}

fn run_parallel(filters: Vec<Box<dyn Filter>>) -> Result<()> {
    info!("starting pipeline of {} stages", filters.len());
    let handles: Vec<_> = filters.into_iter().map(spawn_boxed).collect();

    // Join downstream-first, so an error in a late stage is observed
    // before the upstream workers it starved to death. Upstream workers
    // that died of the resulting broken pipe are the cascade, not the
    // cause; keep the most downstream genuine error.
    let mut first_err: Option<Error> = None;
    for handle in handles.into_iter().rev() {
        if let Err(e) = handle.join() {
            match &first_err {
                None => first_err = Some(e),
                Some(kept) if kept.is_downstream_closed() && !e.is_downstream_closed() => {
                    first_err = Some(e)
                }
                Some(_) => debug!("suppressing cascade error: {}", e),
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn run_sequential(filters: Vec<Box<dyn Filter>>) -> Result<()> {
    info!("running pipeline of {} stages cooperatively", filters.len());
    for mut filter in filters {
        filter.execute()?;
        // dropping the stage closes its output pipe so the next stage
        // sees end of stream after draining
    }
    Ok(())
}
