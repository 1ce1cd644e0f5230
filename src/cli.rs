//! Option plumbing shared by the engine binaries.

use clap::Args;

use crate::error::Error;

/// Options every engine command accepts.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Output path, `-` for standard output.
    #[arg(short = 'o', long = "output", default_value = "-")]
    pub output: String,

    /// Run the filter on its own worker thread (the default).
    #[arg(long, overrides_with = "noautorun")]
    pub autorun: bool,

    /// Drive the filter on the main thread instead.
    #[arg(long)]
    pub noautorun: bool,

    /// Raise log verbosity (`-d` debug, `-dd` trace).
    #[arg(short = 'd', action = clap::ArgAction::Count)]
    pub debug: u8,

    /// Print the long help, manual style.
    #[arg(long)]
    pub man: bool,

    /// Do not append the provenance trailer comment.
    #[arg(long)]
    pub nolog: bool,
}

impl CommonArgs {
    pub fn init_logging(&self) {
        let mut builder = env_logger::Builder::from_default_env();
        match self.debug {
            0 => {}
            1 => {
                builder.filter_level(log::LevelFilter::Debug);
            }
            _ => {
                builder.filter_level(log::LevelFilter::Trace);
            }
        }
        let _ = builder.try_init();
    }

    /// The provenance trailer for this invocation, unless suppressed.
    pub fn provenance(&self) -> Option<String> {
        if self.nolog {
            return None;
        }
        let mut args = std::env::args();
        let program = args
            .next()
            .map(|p| {
                std::path::Path::new(&p)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or(p)
            })
            .unwrap_or_else(|| "rowpipe".into());
        let mut line = program;
        for arg in args {
            line.push(' ');
            line.push_str(&arg);
        }
        Some(line)
    }
}

/// Run a configured filter honoring `--autorun`/`--noautorun`.
pub fn run_filter_result<F: crate::filter::Filter + 'static>(
    filter: F,
    common: &CommonArgs,
) -> crate::error::Result<()> {
    if common.noautorun {
        let mut filter = filter;
        filter.execute()
    } else {
        crate::filter::spawn(filter).join()
    }
}

/// Run a configured filter and turn the result into the process exit
/// code.
pub fn run_filter<F: crate::filter::Filter + 'static>(filter: F, common: &CommonArgs) -> ! {
    let result = run_filter_result(filter, common);
    exit_with(result)
}

/// Exit 0 on success; report and exit 1 on a fatal error. A broken pipe
/// on the final output means the consumer stopped wanting tail output,
/// which is silent by convention.
pub fn exit_with(result: crate::error::Result<()>) -> ! {
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) if e.is_downstream_closed() => {
            debug!("output closed early: {}", e);
            std::process::exit(0)
        }
        Err(e) => {
            eprintln!("{}: {}", program_name(), e);
            std::process::exit(1)
        }
    }
}

fn program_name() -> String {
    std::env::args()
        .next()
        .as_deref()
        .and_then(|p| std::path::Path::new(p).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rowpipe".into())
}

/// Report a configuration error the way clap reports usage errors.
pub fn config_error(message: &str) -> ! {
    eprintln!("{}: {}", program_name(), Error::Config(message.into()));
    std::process::exit(1)
}
