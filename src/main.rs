use std::{fs, path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use log::debug;

use spigot_lang::{error::Result, object::Value, parse_source, run_source};

#[derive(Parser)]
#[command(name = "spigot", version, about = "The Spigot language interpreter")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a Spigot source file
    Run {
        /// Path to a .spg source file
        file: PathBuf,
    },
    /// Parse a source file and report syntax errors without running it
    Check {
        /// Path to a .spg source file
        file: PathBuf,
    },
    /// Evaluate an inline expression and print its value
    Eval {
        /// Source text, e.g. '[1, 2, 3] +> even?'
        source: String,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { file } => run_file(&file),
        Command::Check { file } => check_file(&file),
        Command::Eval { source } => eval_inline(&source),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run_file(file: &PathBuf) -> Result<()> {
    debug!("running {}", file.display());
    let source = fs::read_to_string(file)?;
    run_source(&source)?;
    Ok(())
}

fn check_file(file: &PathBuf) -> Result<()> {
    let source = fs::read_to_string(file)?;
    let program = parse_source(&source)?;
    println!("ok: {} top-level statement(s)", program.statements.len());
    Ok(())
}

fn eval_inline(source: &str) -> Result<()> {
    let value = run_source(source)?;
    if !matches!(value, Value::Null) {
        println!("{}", value);
    }
    Ok(())
}
