use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::{
    analyze::AnalyzeArgs, ask::AskArgs, evaluate::EvaluateArgs, optimize::OptimizeArgs,
};

#[derive(Debug, Parser)]
#[command(
    name = "sqlagent",
    version,
    about = "Staged text-to-SQL with execution-validated repair"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,

    /// Directory holding `<db_id>/<db_id>.sqlite` databases.
    #[arg(long, global = true, value_name = "PATH")]
    pub db_root: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Answer one question against one database.
    Ask(AskArgs),
    /// Run a labeled dataset and report execution accuracy.
    Evaluate(EvaluateArgs),
    /// Derive a new instruction set version from evaluation records.
    Optimize(OptimizeArgs),
    /// Summarize failure signatures in evaluation records.
    Analyze(AnalyzeArgs),
}
