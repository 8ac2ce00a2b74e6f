//! Fer CLI
//!
//! `fer` with no script starts the REPL; `fer path/to/script.fer` runs the
//! file once. Exit codes follow the sysexits convention the interpreter
//! has always used: 64 for bad usage, 65 for compile errors, 70 for
//! runtime errors, 74 for unreadable files.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser as ClapParser;
use clap::error::ErrorKind;
use tracing_subscriber::EnvFilter;

use fer_runtime::{InterpretError, Vm, VmOptions};

mod repl;

const EXIT_USAGE: i32 = 64;
const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;
const EXIT_IO_ERROR: i32 = 74;

#[derive(ClapParser)]
#[command(name = "fer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fer interpreter - run a script or start a REPL", long_about = None)]
struct Cli {
    /// Script to run; omit for an interactive session
    script: Option<PathBuf>,

    /// Disassemble each function as it compiles
    #[arg(long)]
    print_code: bool,

    /// Trace every instruction as it executes
    #[arg(long)]
    trace: bool,

    /// Collect garbage on every allocation
    #[arg(long)]
    stress_gc: bool,

    /// Log collector activity (equivalent to RUST_LOG=fer_core=debug)
    #[arg(long)]
    log_gc: bool,
}

fn main() {
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = e.print();
                process::exit(0);
            }
            _ => {
                let _ = e.print();
                process::exit(EXIT_USAGE);
            }
        }
    });

    init_tracing(cli.log_gc);

    let options = VmOptions {
        trace_execution: cli.trace,
        dump_bytecode: cli.print_code,
        stress_gc: cli.stress_gc,
    };
    let mut vm = Vm::new(options);

    match cli.script {
        Some(path) => run_file(&mut vm, &path),
        None => repl::run(&mut vm),
    }
}

fn init_tracing(log_gc: bool) {
    let default_filter = if log_gc { "fer_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_file(vm: &mut Vm, path: &Path) {
    // Raw bytes: a Fer source is not required to be valid UTF-8, and
    // non-ASCII content passes through strings untouched.
    let source = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => {
            eprintln!("Could not open file \"{}\".", path.display());
            process::exit(EXIT_IO_ERROR);
        }
    };

    match vm.interpret(&source) {
        Ok(()) => {}
        Err(InterpretError::Compile(e)) => {
            eprintln!("{}", e);
            process::exit(EXIT_COMPILE_ERROR);
        }
        Err(InterpretError::Runtime(e)) => {
            eprintln!("{}", e);
            process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}
