use itertools::Itertools;

use rowpipe::filter::{Filter, MergeInput, MergeTree, MergeTwo};
use rowpipe::key::KeySpec;
use rowpipe::{Error, Settings};

mod utils;
use utils::{input, stream_file, OutputBuffer, TestHelper};

#[test]
fn merge_two_sorted_streams() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let mut merge = MergeTwo::new(
        input("#rowpipe cid cname\n11 numanal\n10 pascal\n"),
        input("#rowpipe cid cname\n12 os\n13 statistics\n"),
        out.output(),
        KeySpec::parse(&["cname"]).unwrap(),
    );
    merge.execute().unwrap();
    assert_eq!(
        out.rows(),
        ["11,numanal", "12,os", "10,pascal", "13,statistics"]
    );
}

#[test]
fn merge_tree_of_many_files() {
    TestHelper::setup();
    let dir = tempfile::TempDir::new().unwrap();

    // nine sorted slices of 0..900, interleaved round-robin
    let mut inputs = Vec::new();
    for i in 0..9u32 {
        let rows = (0..900).filter(|v| v % 9 == i).map(|v| v.to_string()).join("\n");
        let path = stream_file(
            dir.path(),
            &format!("slice{}", i),
            &format!("#rowpipe v\n{}\n", rows),
        );
        inputs.push(MergeInput::file(path));
    }

    let out = OutputBuffer::new();
    let settings = Settings::default().tmp_dir(dir.path());
    let mut tree = MergeTree::new(inputs, out.output(), KeySpec::parse(&["-n", "v"]).unwrap())
        .settings(settings);
    tree.execute().unwrap();

    let expected: Vec<String> = (0..900).map(|v| v.to_string()).collect();
    assert_eq!(out.rows(), expected);
    // the nine originals survive, every intermediate is gone
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 9);
}

#[test]
fn merge_tree_without_endgame_or_parallelism() {
    TestHelper::setup();
    let dir = tempfile::TempDir::new().unwrap();

    let mut inputs = Vec::new();
    for i in 0..5u32 {
        let rows = (0..100).filter(|v| v % 5 == i).map(|v| v.to_string()).join("\n");
        let path = stream_file(
            dir.path(),
            &format!("in{}", i),
            &format!("#rowpipe v\n{}\n", rows),
        );
        inputs.push(MergeInput::file(path));
    }

    let out = OutputBuffer::new();
    // the sequential fallback: one merge at a time, files all the way
    let settings = Settings::default()
        .tmp_dir(dir.path())
        .parallelism(1)
        .endgame(false);
    let mut tree = MergeTree::new(inputs, out.output(), KeySpec::parse(&["-n", "v"]).unwrap())
        .settings(settings);
    tree.execute().unwrap();

    let expected: Vec<String> = (0..100).map(|v| v.to_string()).collect();
    assert_eq!(out.rows(), expected);
}

#[test]
fn merge_is_stable_across_siblings() {
    TestHelper::setup();
    let dir = tempfile::TempDir::new().unwrap();

    // equal keys everywhere: output must follow input order
    let mut inputs = Vec::new();
    for i in 0..4u32 {
        let path = stream_file(
            dir.path(),
            &format!("in{}", i),
            &format!("#rowpipe k src\nsame {}\nsame {}\n", i * 2, i * 2 + 1),
        );
        inputs.push(MergeInput::file(path));
    }

    let out = OutputBuffer::new();
    let settings = Settings::default().tmp_dir(dir.path());
    let mut tree = MergeTree::new(inputs, out.output(), KeySpec::parse(&["k"]).unwrap())
        .settings(settings);
    tree.execute().unwrap();

    let srcs: Vec<String> = out
        .rows()
        .iter()
        .map(|r| r.split(',').nth(1).unwrap().to_string())
        .collect();
    assert_eq!(srcs, (0..8).map(|v| v.to_string()).collect::<Vec<_>>());
}

#[test]
fn merge_removes_inputs_on_request() {
    TestHelper::setup();
    let dir = tempfile::TempDir::new().unwrap();
    let a = stream_file(dir.path(), "a", "#rowpipe v\n1\n3\n");
    let b = stream_file(dir.path(), "b", "#rowpipe v\n2\n4\n");

    let out = OutputBuffer::new();
    let settings = Settings::default().tmp_dir(dir.path());
    let mut tree = MergeTree::new(
        vec![MergeInput::file(&a), MergeInput::file(&b)],
        out.output(),
        KeySpec::parse(&["-n", "v"]).unwrap(),
    )
    .settings(settings)
    .remove_inputs(true);
    tree.execute().unwrap();

    assert_eq!(out.rows(), ["1", "2", "3", "4"]);
    assert!(!a.exists());
    assert!(!b.exists());
}

#[test]
fn merge_single_input_is_a_configuration_error() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let mut tree = MergeTree::new(
        vec![MergeInput::file("/nonexistent")],
        out.output(),
        KeySpec::parse(&["v"]).unwrap(),
    );
    assert!(matches!(tree.execute(), Err(Error::Config(_))));
}

#[test]
fn merge_xargs_streams_arriving_filenames() {
    TestHelper::setup();
    let dir = tempfile::TempDir::new().unwrap();
    let a = stream_file(dir.path(), "a", "#rowpipe v\n1\n4\n");
    let b = stream_file(dir.path(), "b", "#rowpipe v\n2\n5\n");
    let c = stream_file(dir.path(), "c", "#rowpipe v\n3\n6\n");

    let filenames = format!(
        "#rowpipe filename\n{}\n{}\n{}\n",
        a.display(),
        b.display(),
        c.display()
    );
    let out = OutputBuffer::new();
    let settings = Settings::default().tmp_dir(dir.path());
    let mut tree = MergeTree::from_xargs(
        input(&filenames),
        out.output(),
        KeySpec::parse(&["-n", "v"]).unwrap(),
    )
    .settings(settings);
    tree.execute().unwrap();

    assert_eq!(out.rows(), ["1", "2", "3", "4", "5", "6"]);
}

#[test]
fn merge_xargs_with_one_file_fails() {
    TestHelper::setup();
    let dir = tempfile::TempDir::new().unwrap();
    let a = stream_file(dir.path(), "a", "#rowpipe v\n1\n");

    let out = OutputBuffer::new();
    let mut tree = MergeTree::from_xargs(
        input(&format!("#rowpipe filename\n{}\n", a.display())),
        out.output(),
        KeySpec::parse(&["-n", "v"]).unwrap(),
    );
    assert!(matches!(tree.execute(), Err(Error::Config(_))));
}

#[test]
fn merge_incompatible_inputs_fail() {
    TestHelper::setup();
    let dir = tempfile::TempDir::new().unwrap();
    let a = stream_file(dir.path(), "a", "#rowpipe x\n1\n");
    let b = stream_file(dir.path(), "b", "#rowpipe y\n2\n");

    let out = OutputBuffer::new();
    let mut tree = MergeTree::new(
        vec![MergeInput::file(a), MergeInput::file(b)],
        out.output(),
        KeySpec::parse(&["x"]).unwrap(),
    )
    .settings(Settings::default().tmp_dir(dir.path()));
    assert!(matches!(tree.execute(), Err(Error::Schema(_))));
}

#[test]
fn merge_unsorted_input_fails() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let mut merge = MergeTwo::new(
        input("#rowpipe v\n3\n1\n"),
        input("#rowpipe v\n2\n"),
        out.output(),
        KeySpec::parse(&["-n", "v"]).unwrap(),
    );
    assert!(matches!(merge.execute(), Err(Error::Order(_))));
}

#[test]
fn merge_comments_pass_through() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let mut merge = MergeTwo::new(
        input("#rowpipe v\n# from left\n1\n"),
        input("#rowpipe v\n# from right\n2\n"),
        out.output(),
        KeySpec::parse(&["-n", "v"]).unwrap(),
    );
    merge.execute().unwrap();
    assert_eq!(out.rows(), ["1", "2"]);
    assert!(out.comments().contains(&"# from left".to_string()));
    assert!(out.comments().contains(&"# from right".to_string()));
}
