use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{PipelineArgs, ServiceArgs, build_service, load_instructions};
use crate::config::RuntimePaths;
use crate::evaluate::{
    DEFAULT_WORKERS, Evaluator, InterimWriter, build_evaluation_layout, ensure_not_halted,
    load_bird_dataset, write_records_artifact, write_report_artifact, write_schema_artifact,
};
use crate::pipeline::Pipeline;
use crate::validator::ExecutionValidator;

#[derive(Debug, Clone, Args)]
pub struct EvaluateArgs {
    /// BIRD-style JSON array of labeled questions.
    #[arg(long, value_name = "PATH")]
    pub dataset: PathBuf,

    /// Evaluate only the first N questions.
    #[arg(long, value_name = "N")]
    pub sample_size: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    #[command(flatten)]
    pub service: ServiceArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,
}

pub fn run(args: &EvaluateArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let dataset_path = runtime_paths.resolve(&args.dataset)?;
    let questions = load_bird_dataset(&dataset_path, args.sample_size)?;
    let instructions = load_instructions(runtime_paths, args.pipeline.instructions_version)?;
    let config = args.pipeline.pipeline_config();
    println!(
        "evaluate: start dataset={} questions={} workers={} backend={} instructions=v{} db_root={} out_dir={}",
        dataset_path.display(),
        questions.len(),
        args.workers,
        args.service.backend.as_str(),
        instructions.version,
        runtime_paths.db_root.display(),
        runtime_paths.out_dir.display()
    );

    let service = build_service(&args.service)?;
    let pipeline = Pipeline::new(service.as_ref(), &instructions, &config);
    let layout = build_evaluation_layout(&runtime_paths.evaluation_dir());
    let mut interim = InterimWriter::create(&layout.interim_jsonl)?;
    println!(
        "evaluate: checkpoint interim {}",
        layout.interim_jsonl.display()
    );

    println!("evaluate: stage run");
    let evaluator = Evaluator::new(
        &pipeline,
        runtime_paths.db_root.clone(),
        ExecutionValidator::new(config.execution_budget),
    )
    .with_workers(args.workers);
    let total = questions.len();
    let mut completed = 0_usize;
    let run = evaluator.evaluate(&questions, |record| {
        completed += 1;
        println!(
            "evaluate: question {}/{} id={} db_id={} matched={} resolved={} outcome={}",
            completed,
            total,
            record.question_id,
            record.db_id,
            record.matched,
            record.resolved,
            record.outcome.label()
        );
        interim.append(record)
    })?;

    println!("evaluate: stage write_artifacts");
    write_records_artifact(&layout.records_jsonl, &run.records)?;
    write_report_artifact(&layout.report_json, &run.report)?;
    write_schema_artifact(&layout.schema_json)?;
    for group in &run.report.per_database {
        println!(
            "evaluate: database db_id={} attempted={} matched={} accuracy_pct={:.2}",
            group.key, group.attempted, group.matched, group.accuracy_pct
        );
    }
    for group in &run.report.per_difficulty {
        println!(
            "evaluate: difficulty level={} attempted={} matched={} accuracy_pct={:.2}",
            group.key, group.attempted, group.matched, group.accuracy_pct
        );
    }
    println!(
        "evaluate: report attempted={} matched={} resolved={} accuracy={:.4} accuracy_pct={:.2} records={} report={}",
        run.report.attempted,
        run.report.matched,
        run.report.resolved,
        run.report.accuracy,
        run.report.accuracy_pct,
        layout.records_jsonl.display(),
        layout.report_json.display()
    );

    if let Some(reason) = &run.report.halted_reason {
        eprintln!(
            "evaluate: halted attempted={} total={} reason={} next=check_reasoning_service",
            run.report.attempted, run.report.total_questions, reason
        );
    }
    ensure_not_halted(&run.report)
}
