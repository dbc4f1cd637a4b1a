// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use minidump_stackdump::{snapshot, Architecture, ProcessState};
use tracing::{debug, error, info};
use tracing_subscriber::filter::LevelFilter;

mod crash;

use crash::{CrashHandler, CrashKind};

/// Print a thread's raw stack memory annotated with the frames found in it.
#[derive(Debug, Parser)]
#[command(name = "minidump-stackdump", version)]
struct Cli {
    /// Where to write logs to (if unspecified, stderr is used).
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Set the logging level.
    #[arg(long, global = true, value_enum, default_value_t = Verbosity::Error)]
    verbose: Verbosity,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the annotated stack memory of a processed snapshot.
    Stack(StackArgs),
    /// Install the crash handler and crash on purpose.
    Crash {
        /// How to crash.
        #[arg(value_enum)]
        kind: CrashKind,
    },
}

#[derive(Debug, Args)]
struct StackArgs {
    /// Path to the JSON snapshot to read.
    snapshot: PathBuf,

    /// The thread to print (defaults to the requesting thread, or 0).
    #[arg(long, conflicts_with = "all_threads")]
    thread: Option<usize>,

    /// Print every thread's stack.
    #[arg(long)]
    all_threads: bool,

    /// Architecture label to read the stack as (defaults to the snapshot's CPU).
    ///
    /// Accepts names like x86, amd64, x86_64, arm, armeabi-v7a, arm64 or aarch64.
    #[arg(long)]
    arch: Option<Architecture>,

    /// Print a crash summary and the thread's frames before its stack memory.
    #[arg(long)]
    backtrace: bool,

    /// Print a hex dump of the raw stack memory after the annotated words.
    #[arg(long)]
    hexdump: bool,

    /// Emit a machine-readable JSON report.
    #[arg(long, conflicts_with_all = ["backtrace", "hexdump"])]
    json: bool,

    /// Pretty-print --json output.
    #[arg(long, requires = "json")]
    pretty: bool,

    /// Where to write the output to (if unspecified, stdout is used).
    #[arg(long)]
    output_file: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Verbosity {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Verbosity> for LevelFilter {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Off => LevelFilter::OFF,
            Verbosity::Error => LevelFilter::ERROR,
            Verbosity::Warn => LevelFilter::WARN,
            Verbosity::Info => LevelFilter::INFO,
            Verbosity::Debug => LevelFilter::DEBUG,
            Verbosity::Trace => LevelFilter::TRACE,
        }
    }
}

fn init_logging(verbosity: Verbosity, log_file: Option<&Path>) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(verbosity))
        .without_time()
        .with_target(false)
        .with_ansi(false);
    if let Some(log_path) = log_file {
        let log_file = File::create(log_path)
            .with_context(|| format!("creating log file {}", log_path.display()))?;
        builder.with_writer(Mutex::new(log_file)).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
    Ok(())
}

#[cfg_attr(test, allow(dead_code))]
fn main() {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose, cli.log_file.as_deref()) {
        eprintln!("Error initializing logging: {:#}", err);
        std::process::exit(1);
    }

    // Redirect panics to the logger for the rest of the run.
    let _crash_handler = CrashHandler::install();

    match cli.command {
        Command::Stack(args) => {
            if let Err(code) = run_stack(&args) {
                std::process::exit(code);
            }
        }
        Command::Crash { kind } => crash::trigger(kind),
    }
}

fn run_stack(args: &StackArgs) -> Result<(), i32> {
    let state = match snapshot::read_path(&args.snapshot) {
        Ok(state) => state,
        Err(err) => {
            error!("{} - Error reading snapshot: {}", err.name(), err);
            return Err(1);
        }
    };

    let arch = args.arch.unwrap_or(state.system_info.cpu);
    if arch != state.system_info.cpu {
        info!(
            "reading stacks as {} although the snapshot was written on {}",
            arch, state.system_info.cpu
        );
    }

    let threads: Vec<usize> = if args.all_threads {
        (0..state.threads.len()).collect()
    } else {
        vec![args.thread.unwrap_or_else(|| state.default_thread())]
    };
    debug!("printing threads {:?}", threads);

    let mut stdout;
    let mut output_f;
    let output: &mut dyn Write = if let Some(ref output_path) = args.output_file {
        output_f = match File::create(output_path) {
            Ok(f) => f,
            Err(err) => {
                error!("Io - Error creating {}: {}", output_path.display(), err);
                return Err(1);
            }
        };
        &mut output_f
    } else {
        stdout = std::io::stdout();
        &mut stdout
    };

    if let Err(err) = print_stacks(output, &state, &threads, arch, args) {
        error!("{} - Error printing stack: {}", err.name(), err);
        return Err(1);
    }
    Ok(())
}

fn print_stacks(
    mut output: &mut dyn Write,
    state: &ProcessState,
    threads: &[usize],
    arch: Architecture,
    args: &StackArgs,
) -> Result<(), minidump_stackdump::StackDumpError> {
    if args.backtrace {
        state.print_summary(&mut output)?;
    }
    for &thread_index in threads {
        let dump = state.stack_dump(thread_index, arch)?;
        if args.json {
            dump.print_json(&mut output, args.pretty)?;
            continue;
        }

        if args.all_threads {
            writeln!(output, "Thread {}", thread_index)?;
        }
        if args.backtrace {
            state.threads[thread_index].print(&mut output)?;
            writeln!(output)?;
        }
        dump.print(&mut output)?;
        if args.hexdump {
            writeln!(output)?;
            state.thread_memory_regions[thread_index].print_contents(&mut output)?;
        }
        if args.all_threads {
            writeln!(output)?;
        }
    }
    output.flush()?;
    Ok(())
}
