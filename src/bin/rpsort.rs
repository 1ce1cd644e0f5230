use std::path::PathBuf;

use clap::{CommandFactory, Parser};

use rowpipe::cli::{self, CommonArgs};
use rowpipe::filter::{Input, Output, Sort};
use rowpipe::key::KeySpec;
use rowpipe::spill;
use rowpipe::Settings;

/// Sort a stream by a key specification.
///
/// Runs an external, stable sort: rows are buffered up to the memory
/// budget, overflowing runs spill to the temp directory and are merged
/// back in parallel. Equal keys keep their input order.
#[derive(Parser)]
#[command(name = "rpsort", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Input path, `-` for standard input.
    #[arg(short = 'i', long = "input", default_value = "-")]
    input: String,

    /// Directory for spill files (default: $TMPDIR).
    #[arg(short = 'T', long = "tmpdir")]
    tmpdir: Option<PathBuf>,

    /// In-memory run budget, in bytes.
    #[arg(long = "memory")]
    memory: Option<usize>,

    /// Key columns, interspersed with -n/-N (numeric/lexical) and
    /// -r/-R (descending/ascending) flags.
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

    let mut settings = Settings::default();
    if let Some(dir) = &cli.tmpdir {
        settings = settings.tmp_dir(dir);
    }
    if let Some(memory) = cli.memory {
        settings = settings.sort_run_bytes(memory);
    }

    if let Err(e) = spill::registry().install_signal_hooks() {
        cli::exit_with(Err(e));
    }

    let mut sort = Sort::new(
        Input::from_arg(&cli.input),
        Output::from_arg(&cli.common.output),
        key,
    )
    .settings(settings);
    if let Some(provenance) = cli.common.provenance() {
        sort = sort.provenance(provenance);
    }

    let result = cli::run_filter_result(sort, &cli.common);
    spill::registry().cleanup();
    cli::exit_with(result)
}
