#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use clap::error::ErrorKind;
use sqlagent::cli::app::{Cli, Command, RuntimeArgs};
use sqlagent::cli::commands;
use sqlagent::config::RuntimePaths;
use sqlagent::evaluate::EvaluationHalted;
use tracing_subscriber::EnvFilter;

const EXIT_SUCCESS: i32 = 0;
const EXIT_RUNTIME_FAILURE: i32 = 1;
const EXIT_UNRESOLVED: i32 = 2;
const EXIT_USAGE_ERROR: i32 = 64;

const LOG_ENV: &str = "SQLAGENT_LOG";

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error) => return exit_code_for_parse_error(error),
    };
    init_tracing();
    let command_name = command_name(&cli.command);
    println!("sqlagent: starting `{command_name}`");

    match execute(cli) {
        Ok(()) => {
            println!("sqlagent: completed `{command_name}` (exit_code={EXIT_SUCCESS})");
            EXIT_SUCCESS
        }
        Err(error) => {
            let exit_code = classify_runtime_error(&error);
            eprintln!("sqlagent: failed `{command_name}` (exit_code={exit_code})");
            eprintln!("{error:#}");
            exit_code
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn execute(cli: Cli) -> Result<()> {
    let runtime_paths = resolve_runtime_paths(&cli.runtime)?;
    match cli.command {
        Command::Ask(args) => commands::ask::run(&args, &runtime_paths),
        Command::Evaluate(args) => commands::evaluate::run(&args, &runtime_paths),
        Command::Optimize(args) => commands::optimize::run(&args, &runtime_paths),
        Command::Analyze(args) => commands::analyze::run(&args, &runtime_paths),
    }
}

fn classify_runtime_error(error: &anyhow::Error) -> i32 {
    if error
        .downcast_ref::<commands::ask::UnresolvedQuestion>()
        .is_some()
        || error.downcast_ref::<EvaluationHalted>().is_some()
    {
        EXIT_UNRESOLVED
    } else {
        EXIT_RUNTIME_FAILURE
    }
}

fn exit_code_for_parse_error(error: clap::Error) -> i32 {
    match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = error.print();
            EXIT_SUCCESS
        }
        _ => {
            let _ = error.print();
            EXIT_USAGE_ERROR
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Ask(_) => "ask",
        Command::Evaluate(_) => "evaluate",
        Command::Optimize(_) => "optimize",
        Command::Analyze(_) => "analyze",
    }
}

fn resolve_runtime_paths(args: &RuntimeArgs) -> Result<RuntimePaths> {
    let home_dir = match &args.home_dir {
        Some(path) => path.clone(),
        None => std::env::var_os("HOME")
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("HOME is not set; pass --home-dir"))?,
    };

    let cwd = match &args.cwd {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    sqlagent::config::resolve_runtime_paths(
        &home_dir,
        &cwd,
        args.out_dir.as_deref(),
        args.db_root.as_deref(),
    )
}
