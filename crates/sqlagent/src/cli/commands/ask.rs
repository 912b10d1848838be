use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;

use super::{PipelineArgs, ServiceArgs, build_service, load_instructions};
use crate::config::RuntimePaths;
use crate::models::{CellValue, ExecutionOutcome};
use crate::pipeline::Pipeline;
use crate::sqlite::DatabaseHandle;
use crate::stages::QuestionInput;

const PREVIEW_ROWS: usize = 10;

#[derive(Debug, Clone, Args)]
pub struct AskArgs {
    #[arg(value_name = "QUESTION")]
    pub question: String,

    #[arg(long, value_name = "DB_ID")]
    pub db_id: String,

    /// External knowledge passed to every stage.
    #[arg(long)]
    pub evidence: Option<String>,

    /// Database file to use instead of `<db_root>/<db_id>/<db_id>.sqlite`.
    #[arg(long, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Print the full trace as JSON after the result.
    #[arg(long, default_value_t = false)]
    pub show_trace: bool,

    #[command(flatten)]
    pub service: ServiceArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

/// Returned when the pipeline finished without a successfully executing query.
#[derive(Debug)]
pub struct UnresolvedQuestion {
    pub outcome: String,
}

impl std::fmt::Display for UnresolvedQuestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "question unresolved; last outcome: {}", self.outcome)
    }
}

impl std::error::Error for UnresolvedQuestion {}

pub fn run(args: &AskArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    if args.question.trim().is_empty() {
        bail!("question must not be empty");
    }
    let db = match &args.db_path {
        Some(path) => DatabaseHandle::new(args.db_id.clone(), runtime_paths.resolve(path)?),
        None => DatabaseHandle::from_root(&runtime_paths.db_root, &args.db_id),
    };
    if !db.exists() {
        bail!("database not found: {}", db.path.display());
    }

    let instructions = load_instructions(runtime_paths, args.pipeline.instructions_version)?;
    let config = args.pipeline.pipeline_config();
    println!(
        "ask: start db_id={} db={} backend={} instructions=v{} max_repairs={}",
        db.db_id,
        db.path.display(),
        args.service.backend.as_str(),
        instructions.version,
        config.max_repair_attempts
    );

    let service = build_service(&args.service)?;
    let pipeline = Pipeline::new(service.as_ref(), &instructions, &config);
    let question = QuestionInput::new(args.question.clone()).with_evidence(args.evidence.clone());
    let outcome = pipeline
        .run(&db, &question)
        .with_context(|| format!("pipeline failed for database `{}`", db.db_id))?;

    for entry in &outcome.trace.entries {
        println!(
            "ask: stage {} attempt={} outcome={} duration_ms={} detail={}",
            entry.stage.as_str(),
            entry.attempt,
            entry.outcome,
            entry.duration_ms,
            entry.output_summary
        );
    }
    println!(
        "ask: result resolved={} termination={} repairs={} outcome={}",
        outcome.resolved,
        outcome.termination.as_str(),
        outcome.trace.repair_count(),
        outcome.final_outcome.summary()
    );
    println!("{}", outcome.final_sql);
    print_preview(&outcome.final_outcome);

    if args.show_trace {
        let encoded =
            serde_json::to_string_pretty(&outcome.trace).context("failed to encode trace")?;
        println!("{encoded}");
    }

    if !outcome.resolved {
        return Err(UnresolvedQuestion {
            outcome: outcome.final_outcome.summary(),
        }
        .into());
    }
    Ok(())
}

fn print_preview(outcome: &ExecutionOutcome) {
    let ExecutionOutcome::Success { columns, rows } = outcome else {
        return;
    };
    println!("{}", columns.join(" | "));
    for row in rows.iter().take(PREVIEW_ROWS) {
        println!("{}", render_row(row));
    }
    if rows.len() > PREVIEW_ROWS {
        println!("... {} more row(s)", rows.len() - PREVIEW_ROWS);
    }
}

fn render_row(row: &[CellValue]) -> String {
    row.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" | ")
}
