use clap::{CommandFactory, Parser};

use rowpipe::cli::{self, CommonArgs};
use rowpipe::filter::{Input, JoinType, MergeJoin, Output};
use rowpipe::key::KeySpec;
use rowpipe::Settings;

/// Merge-join two streams on a common key tuple.
///
/// Both inputs are sorted by the key first unless -S asserts they
/// already are. The output carries the key columns, then the left
/// side's other columns, then the right side's.
#[derive(Parser)]
#[command(name = "rpjoin", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// The two input streams (give -i twice; `-` for standard input).
    #[arg(short = 'i', long = "input")]
    inputs: Vec<String>,

    /// Full outer join (same as -t outer).
    #[arg(short = 'a', long = "all")]
    all: bool,

    /// Join type: inner or outer.
    #[arg(short = 't', long = "type")]
    join_type: Option<String>,

    /// Empty-value token for the padded side of outer tuples.
    #[arg(short = 'e', long = "empty")]
    empty: Option<String>,

    /// The inputs are already sorted by the join key.
    #[arg(short = 'S', long = "presorted")]
    presorted: bool,

    /// Key columns, interspersed with -n/-N and -r/-R flags.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    keys: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    cli.common.init_logging();
    if cli.common.man {
        let _ = Cli::command().print_long_help();
        std::process::exit(0);
    }

    if cli.inputs.len() != 2 {
        cli::config_error("join needs exactly two --input streams");
    }
    let key = match KeySpec::parse(&cli.keys) {
        Ok(key) => key,
        Err(e) => cli::exit_with(Err(e)),
    };
    let join_type = match &cli.join_type {
        Some(arg) => match JoinType::from_arg(arg) {
            Ok(join_type) => join_type,
            Err(e) => cli::exit_with(Err(e)),
        },
        None if cli.all => JoinType::Outer,
        None => JoinType::Inner,
    };

    let mut join = MergeJoin::new(
        Input::from_arg(&cli.inputs[0]),
        Input::from_arg(&cli.inputs[1]),
        Output::from_arg(&cli.common.output),
        key,
    )
    .join_type(join_type)
    .presorted(cli.presorted)
    .settings(Settings::default());
    if let Some(empty) = &cli.empty {
        join = join.empty(empty.clone());
    }
    if let Some(provenance) = cli.common.provenance() {
        join = join.provenance(provenance);
    }

    cli::run_filter(join, &cli.common)
}
