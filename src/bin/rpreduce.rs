use std::sync::Arc;

use clap::{CommandFactory, Parser};

use rowpipe::cli::{self, CommonArgs};
use rowpipe::filter::{
    builtin_reducer, CommandReducerFactory, GroupBy, Input, Output, Presort, ReducerFactory,
};
use rowpipe::Settings;

/// Group a stream by one column and run a reducer per group.
///
/// The input is sorted by the key column first unless -S declares it
/// sorted already. Each group's rows go to a fresh reducer, either a
/// built-in (-C) or an external command reading a stream on stdin and
/// writing one on stdout; if the reducer's output lacks the key
/// column, it is prepended to every row.
#[derive(Parser)]
#[command(name = "rpreduce", version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Input path, `-` for standard input.
    #[arg(short = 'i', long = "input", default_value = "-")]
    input: String,

    /// The column to group by.
    #[arg(short = 'k', long = "key")]
    key: String,

    /// Input is pre-sorted by the key; repeat to skip the contiguity
    /// check.
    #[arg(short = 'S', action = clap::ArgAction::Count)]
    presorted: u8,

    /// The reducer is group-aware: hand it the whole stream.
    #[arg(short = 'M', long = "group-aware")]
    group_aware: bool,

    /// Pass the group key to the external reducer as a final argument.
    #[arg(short = 'K', long = "pass-key")]
    pass_key: bool,

    /// Use a built-in reducer by name (count, identity).
    #[arg(short = 'C', long = "code")]
    builtin: Option<String>,

    /// External reducer command and its arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    cli.common.init_logging();
    if cli.common.man {
        let _ = Cli::command().print_long_help();
        std::process::exit(0);
    }

    let factory: Arc<dyn ReducerFactory> = match (&cli.builtin, cli.command.is_empty()) {
        (Some(_), false) => cli::config_error("give either -C or a reducer command, not both"),
        (Some(name), true) => match builtin_reducer(name) {
            Ok(factory) => factory,
            Err(e) => cli::exit_with(Err(e)),
        },
        (None, true) => cli::config_error("missing reducer: give -C NAME or a command"),
        (None, false) => Arc::new(
            CommandReducerFactory::new(cli.command[0].clone(), cli.command[1..].to_vec())
                .pass_key(cli.pass_key),
        ),
    };

    let presort = match cli.presorted {
        0 => Presort::No,
        1 => Presort::Verify,
        _ => Presort::Trust,
    };

    let mut group_by = GroupBy::new(
        Input::from_arg(&cli.input),
        Output::from_arg(&cli.common.output),
        cli.key.clone(),
        factory,
    )
    .presort(presort)
    .group_aware(cli.group_aware)
    .settings(Settings::default());
    if let Some(provenance) = cli.common.provenance() {
        group_by = group_by.provenance(provenance);
    }

    cli::run_filter(group_by, &cli.common)
}
