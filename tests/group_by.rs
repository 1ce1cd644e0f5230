use std::sync::Arc;

use itertools::Itertools;

use rowpipe::error::Result;
use rowpipe::filter::{
    builtin_reducer, Filter, FilterIo, GroupBy, Input, Output, Presort, ReducerFactory,
};
use rowpipe::stream::{Record, Schema};
use rowpipe::{Error, Settings};

mod utils;
use utils::{input, OutputBuffer, TestHelper};

fn group_count(text: &str, presort: Presort) -> Result<OutputBuffer> {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let mut group_by = GroupBy::new(
        input(text),
        out.output(),
        "event",
        builtin_reducer("count").unwrap(),
    )
    .presort(presort)
    .settings(Settings::default());
    group_by.execute()?;
    Ok(out)
}

#[test]
fn count_rows_per_group() {
    let text = format!(
        "#rowpipe event\n{}\n{}\n",
        ["A"; 6].join("\n"),
        ["B"; 6].join("\n")
    );
    let out = group_count(&text, Presort::Verify).unwrap();
    assert_eq!(out.header(), "#rowpipe event count");
    assert_eq!(out.rows(), ["A,6", "B,6"]);
}

#[test]
fn unsorted_input_is_sorted_first() {
    let out = group_count("#rowpipe event\nB\nA\nB\nA\n", Presort::No).unwrap();
    assert_eq!(out.rows(), ["A,2", "B,2"]);
}

#[test]
fn broken_group_fails_verification() {
    let err = group_count("#rowpipe event\nA\nB\nA\n", Presort::Verify).unwrap_err();
    assert!(matches!(err, Error::Order(_)));
}

#[test]
fn broken_group_trusted_when_asked() {
    // -S -S skips the contiguity check; the broken group shows up twice
    let out = group_count("#rowpipe event\nA\nB\nA\n", Presort::Trust).unwrap();
    assert_eq!(out.rows(), ["A,1", "B,1", "A,1"]);
}

#[test]
fn empty_input_still_invokes_the_reducer_once() {
    let out = group_count("#rowpipe event\n", Presort::Verify).unwrap();
    assert_eq!(out.header(), "#rowpipe event count");
    assert_eq!(out.rows(), ["-,0"]);
}

#[test]
fn identity_reducer_preserves_the_multiset() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let mut group_by = GroupBy::new(
        input("#rowpipe event x\nb 1\na 2\nb 3\na 4\n"),
        out.output(),
        "event",
        builtin_reducer("identity").unwrap(),
    )
    .presort(Presort::No);
    group_by.execute().unwrap();

    // identity output carries the key column, so nothing is injected
    assert_eq!(out.header(), "#rowpipe event x");
    let sorted = out.rows().into_iter().sorted().collect_vec();
    assert_eq!(sorted, ["a,2", "a,4", "b,1", "b,3"]);
}

/// A group-ignorant reducer that emits (mean, n) without the key, the
/// shape a statistics filter would produce.
struct MeanReducer {
    endpoints: Option<(Input, Output)>,
    io: Option<FilterIo>,
    column: usize,
}

impl MeanReducer {
    fn factory() -> Arc<dyn ReducerFactory> {
        Arc::new(
            |_key: Option<&str>, input: Input, output: Output| -> Result<Box<dyn Filter>> {
                Ok(Box::new(MeanReducer {
                    endpoints: Some((input, output)),
                    io: None,
                    column: 0,
                }))
            },
        )
    }
}

impl Filter for MeanReducer {
    fn name(&self) -> String {
        "mean".into()
    }

    fn setup(&mut self) -> Result<()> {
        let (input, output) = self.endpoints.take().expect("setup run twice");
        let mut io = FilterIo::open(input, output)?;
        self.column = io.input_schema().resolve("x")?;
        let separator = io.input_schema().separator();
        io.commit(Arc::new(Schema::new(separator, vec!["mean", "n"])?))?;
        self.io = Some(io);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        let io = self.io.as_mut().expect("setup not run");
        let mut sum = 0.0;
        let mut n = 0u64;
        while let Some(record) = io.next_record()? {
            if let Record::Row(row) = record {
                sum += row[self.column].parse::<f64>().unwrap_or(0.0);
                n += 1;
            }
        }
        let mean = if n == 0 { 0.0 } else { sum / n as f64 };
        io.emit_row(vec![format!("{}", mean), n.to_string()])
    }

    fn finish(&mut self) -> Result<()> {
        self.io.as_mut().expect("setup not run").finish()
    }
}

#[test]
fn missing_key_column_is_injected() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let mut group_by = GroupBy::new(
        input("#rowpipe g x\nG1 1\nG1 1\nG2 3\nG2 3\nG2 3\nG2 3\n"),
        out.output(),
        "g",
        MeanReducer::factory(),
    )
    .presort(Presort::Verify);
    group_by.execute().unwrap();

    assert_eq!(out.header(), "#rowpipe g mean n");
    assert_eq!(out.rows(), ["G1,1,2", "G2,3,4"]);
}

/// A reducer that returns without reading its group.
struct LazyReducer {
    endpoints: Option<(Input, Output)>,
    io: Option<FilterIo>,
}

impl Filter for LazyReducer {
    fn name(&self) -> String {
        "lazy".into()
    }

    fn setup(&mut self) -> Result<()> {
        let (input, output) = self.endpoints.take().expect("setup run twice");
        let mut io = FilterIo::open(input, output)?;
        io.commit_input_schema()?;
        self.io = Some(io);
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        // deliberately does not consume its input
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.io.as_mut().expect("setup not run").finish()
    }
}

#[test]
fn non_consuming_reducer_is_fatal() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let factory: Arc<dyn ReducerFactory> = Arc::new(
        |_key: Option<&str>, input: Input, output: Output| -> Result<Box<dyn Filter>> {
            Ok(Box::new(LazyReducer {
                endpoints: Some((input, output)),
                io: None,
            }))
        },
    );
    let mut group_by = GroupBy::new(
        input("#rowpipe event\nA\nA\nA\n"),
        out.output(),
        "event",
        factory,
    )
    .presort(Presort::Verify);
    assert!(matches!(
        group_by.execute(),
        Err(Error::Consumption(_))
    ));
}

#[test]
fn group_aware_reducer_sees_the_whole_stream() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    // a group-aware count collapses everything into one row
    let mut group_by = GroupBy::new(
        input("#rowpipe event\nA\nA\nB\n"),
        out.output(),
        "event",
        builtin_reducer("count").unwrap(),
    )
    .presort(Presort::Verify)
    .group_aware(true);
    group_by.execute().unwrap();
    assert_eq!(out.header(), "#rowpipe count");
    assert_eq!(out.rows(), ["3"]);
}

#[test]
fn comments_pass_through_groups() {
    let out = group_count("#rowpipe event\n# preamble\nA\nA\n", Presort::Verify).unwrap();
    assert_eq!(out.rows(), ["A,2"]);
    assert!(out.comments().contains(&"# preamble".to_string()));
}

#[test]
fn changing_reducer_schema_is_fatal() {
    TestHelper::setup();
    struct Flaky {
        endpoints: Option<(Input, Output)>,
        io: Option<FilterIo>,
        wide: bool,
    }
    impl Filter for Flaky {
        fn name(&self) -> String {
            "flaky".into()
        }
        fn setup(&mut self) -> Result<()> {
            let (input, output) = self.endpoints.take().expect("setup run twice");
            let mut io = FilterIo::open(input, output)?;
            let separator = io.input_schema().separator();
            let columns = if self.wide {
                vec!["a", "b"]
            } else {
                vec!["a"]
            };
            io.commit(Arc::new(Schema::new(separator, columns)?))?;
            self.io = Some(io);
            Ok(())
        }
        fn run(&mut self) -> Result<()> {
            let io = self.io.as_mut().expect("setup not run");
            while io.next_record()?.is_some() {}
            Ok(())
        }
        fn finish(&mut self) -> Result<()> {
            self.io.as_mut().expect("setup not run").finish()
        }
    }

    let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let factory: Arc<dyn ReducerFactory> = {
        let calls = calls.clone();
        Arc::new(
            move |_key: Option<&str>, input: Input, output: Output| -> Result<Box<dyn Filter>> {
                let wide = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0;
                Ok(Box::new(Flaky {
                    endpoints: Some((input, output)),
                    io: None,
                    wide,
                }))
            },
        )
    };

    let out = OutputBuffer::new();
    let mut group_by = GroupBy::new(
        input("#rowpipe event\nA\nB\n"),
        out.output(),
        "event",
        factory,
    )
    .presort(Presort::Verify);
    assert!(matches!(group_by.execute(), Err(Error::Schema(_))));
}
