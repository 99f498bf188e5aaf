//! The `rebuild` CLI entrypoint.

use std::{env, path::PathBuf, process::ExitCode};

use clap::{crate_version, error::ErrorKind, Parser};
use color_eyre::eyre::{eyre, Context as _};
use tracing::instrument;
use tracing_subscriber::util::SubscriberInitExt as _;

// Binary-only modules stay private so the compiler warns about dead code in
// them (https://github.com/rust-lang/rust/issues/74970).
mod log;

const BUILD_FILE_EXT: &str = "toml";

#[derive(Clone, Debug, Parser)]
#[command(
    name = "rebuild",
    about = "A constructive-trace, content-addressed build engine",
    version = crate_version!(),
)]
struct Cli {
    /// The target to build.
    target: String,

    /// When to colorize output.
    #[arg(long, value_enum, default_value_t = log::WhenColor::Auto)]
    color: log::WhenColor,

    /// Shorthand for REBUILD_LOG=debug.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    // Only fails if called twice; harmless here.
    let _ = color_eyre::install();

    // clap's own default exit codes don't match spec: usage errors here must
    // exit 1, not clap's usual 2, and `--help` goes to stderr, not stdout.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                    eprint!("{err}");
                    ExitCode::from(0)
                }
                ErrorKind::DisplayVersion => {
                    print!("{err}");
                    ExitCode::from(0)
                }
                _ => {
                    eprint!("{err}");
                    ExitCode::from(1)
                }
            };
        }
    };

    if cli.verbose && env::var("REBUILD_LOG").is_err() {
        // SAFETY: single-threaded at this point, before the logger or any
        // recipe subprocess has been spawned.
        unsafe { env::set_var("REBUILD_LOG", "debug") };
    }
    log::make_logger(std::io::stderr, cli.color).init();

    match run(&cli.target) {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("rebuild: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

#[instrument(skip_all, fields(target = %target))]
fn run(target: &str) -> color_eyre::Result<()> {
    let build_file = find_build_file(&env::current_dir().context("reading current directory")?)
        .ok_or_else(|| eyre!("no BUILD.{BUILD_FILE_EXT} found in this directory or any parent"))?;

    let provider = rebuild::provider::toml::TomlProvider::load(&build_file)
        .context("loading recipe source")?;
    let store = rebuild::Store::init().context("initializing store")?;

    let mut scheduler = rebuild::Scheduler::create(store, provider);
    scheduler.build(target).map_err(color_eyre::eyre::Error::from)
}

/// Walk from `start` upward looking for `BUILD.<ext>`.
fn find_build_file(start: &std::path::Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(d) = dir {
        let candidate = d.join(format!("BUILD.{BUILD_FILE_EXT}"));
        if candidate.is_file() {
            return Some(candidate);
        }
        dir = d.parent();
    }
    None
}

fn exit_code_for(err: &color_eyre::eyre::Report) -> u8 {
    if let Some(rebuild_err) = err.downcast_ref::<rebuild::Error>() {
        return match rebuild_err {
            rebuild::Error::Parse { .. } => 3,
            rebuild::Error::Exec { .. } => 4,
            _ => 1,
        };
    }
    // A load/parse failure (bad BUILD.toml, missing file) surfaces as a
    // plain eyre report from `find_build_file`/`TomlProvider::load`, not a
    // `rebuild::Error`, but still belongs to the parse/load exit class.
    3
}
