use std::path::PathBuf;

use clap::{CommandFactory, Parser};

use rowpipe::cli::{self, CommonArgs};
use rowpipe::filter::{Input, MergeInput, MergeTree, Output};
use rowpipe::key::KeySpec;
use rowpipe::spill;
use rowpipe::Settings;

/// Merge presorted, schema-compatible streams into one sorted stream.
///
/// The inputs are merged two at a time in a balanced tree, with
/// bounded parallelism and, near the root, streaming pipes instead of
/// temp files. With --xargs the filenames arrive as rows on standard
/// input and merging starts while they are still coming.
#[derive(Parser)]
#[command(name = "rpmerge", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// An input file to merge; repeat for each file.
    #[arg(short = 'i', long = "input")]
    inputs: Vec<String>,

    /// Read input filenames, one per row, from standard input.
    #[arg(long)]
    xargs: bool,

    /// Delete each input file once it has been merged.
    #[arg(long = "removeinputs")]
    remove_inputs: bool,

    /// Directory for intermediate merge files (default: $TMPDIR).
    #[arg(short = 'T', long = "tmpdir")]
    tmpdir: Option<PathBuf>,

    /// Bound on concurrently running merges (default: CPU count).
    #[arg(long)]
    parallelism: Option<usize>,

    /// Stream the final merge levels through pipes (the default).
    #[arg(long, overrides_with = "noendgame")]
    endgame: bool,

    /// Use temp files all the way to the root.
    #[arg(long)]
    noendgame: bool,

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

    let key = match KeySpec::parse(&cli.keys) {
        Ok(key) => key,
        Err(e) => cli::exit_with(Err(e)),
    };

    let mut settings = Settings::default().endgame(cli.endgame || !cli.noendgame);
    if let Some(dir) = &cli.tmpdir {
        settings = settings.tmp_dir(dir);
    }
    if let Some(parallelism) = cli.parallelism {
        settings = settings.parallelism(parallelism);
    }

    if let Err(e) = spill::registry().install_signal_hooks() {
        cli::exit_with(Err(e));
    }

    let output = Output::from_arg(&cli.common.output);
    let mut tree = if cli.xargs {
        if !cli.inputs.is_empty() {
            cli::config_error("--xargs and --input are mutually exclusive");
        }
        MergeTree::from_xargs(Input::Stdin, output, key)
    } else {
        let inputs = cli.inputs.iter().map(MergeInput::file).collect();
        MergeTree::new(inputs, output, key)
    };
    tree = tree.settings(settings).remove_inputs(cli.remove_inputs);
    if let Some(provenance) = cli.common.provenance() {
        tree = tree.provenance(provenance);
    }

    let result = cli::run_filter_result(tree, &cli.common);
    spill::registry().cleanup();
    cli::exit_with(result)
}
