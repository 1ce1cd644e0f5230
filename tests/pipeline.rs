use rowpipe::filter::{IdentityReducer, Pipeline, Sort};
use rowpipe::key::KeySpec;
use rowpipe::Error;

mod utils;
use utils::{input, OutputBuffer, TestHelper};

#[test]
fn pipeline_connects_stages_with_pipes() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let result = Pipeline::new()
        .stage(|input, output| {
            Ok(Box::new(Sort::new(
                input,
                output,
                KeySpec::parse(&["-n", "v"]).unwrap(),
            )))
        })
        .stage(|input, output| Ok(Box::new(IdentityReducer::new(input, output))))
        .run(input("#rowpipe v\n3\n1\n2\n"), out.output());
    result.unwrap();
    assert_eq!(out.rows(), ["1", "2", "3"]);
}

#[test]
fn pipeline_sequential_mode() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let result = Pipeline::new()
        .sequential()
        .stage(|input, output| {
            Ok(Box::new(Sort::new(
                input,
                output,
                KeySpec::parse(&["w"]).unwrap(),
            )))
        })
        .stage(|input, output| Ok(Box::new(IdentityReducer::new(input, output))))
        .run(input("#rowpipe w\nbeta\nalpha\n"), out.output());
    result.unwrap();
    assert_eq!(out.rows(), ["alpha", "beta"]);
}

#[test]
fn pipeline_with_no_stages_is_a_configuration_error() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let result = Pipeline::new().run(input("#rowpipe v\n1\n"), out.output());
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn pipeline_surfaces_a_downstream_stage_error() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    let result = Pipeline::new()
        .stage(|input, output| Ok(Box::new(IdentityReducer::new(input, output))))
        .stage(|input, output| {
            // this stage's key does not exist; its schema error must win
            // over the upstream's broken pipe
            Ok(Box::new(Sort::new(
                input,
                output,
                KeySpec::parse(&["missing"]).unwrap(),
            )))
        })
        .run(input("#rowpipe v\n1\n2\n"), out.output());
    assert!(matches!(result, Err(Error::Schema(_))));
}

#[test]
fn pipeline_comments_reach_the_end() {
    TestHelper::setup();
    let out = OutputBuffer::new();
    Pipeline::new()
        .stage(|input, output| Ok(Box::new(IdentityReducer::new(input, output))))
        .stage(|input, output| Ok(Box::new(IdentityReducer::new(input, output))))
        .run(input("#rowpipe v\n# kept\n1\n"), out.output())
        .unwrap();
    assert_eq!(out.rows(), ["1"]);
    assert!(out.comments().contains(&"# kept".to_string()));
}
