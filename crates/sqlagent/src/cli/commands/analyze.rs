use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use crate::config::RuntimePaths;
use crate::evaluate::{build_evaluation_layout, read_records_artifact};
use crate::optimize::analyze;

#[derive(Debug, Clone, Args)]
pub struct AnalyzeArgs {
    /// Evaluation records to analyze; defaults to the last `evaluate` run.
    #[arg(long, value_name = "PATH")]
    pub records: Option<PathBuf>,
}

pub fn run(args: &AnalyzeArgs, runtime_paths: &RuntimePaths) -> Result<()> {
    let layout = build_evaluation_layout(&runtime_paths.evaluation_dir());
    let records_path = match &args.records {
        Some(path) => runtime_paths.resolve(path)?,
        None => layout.records_jsonl.clone(),
    };
    println!("analyze: start records={}", records_path.display());

    let records = read_records_artifact(&records_path)?;
    let report = analyze(&records);
    println!(
        "analyze: summary total={} incorrect={} incorrect_pct={:.2}",
        report.total, report.incorrect, report.incorrect_pct
    );
    for share in &report.signatures {
        println!(
            "analyze: signature {} count={} pct={:.2}",
            share.key, share.count, share.pct
        );
    }
    for share in &report.databases {
        println!(
            "analyze: database {} count={} pct={:.2}",
            share.key, share.count, share.pct
        );
    }

    let encoded =
        serde_json::to_vec_pretty(&report).context("failed to encode analysis report")?;
    std::fs::create_dir_all(runtime_paths.evaluation_dir())
        .context("failed to create evaluation directory")?;
    std::fs::write(&layout.analysis_json, encoded).with_context(|| {
        format!(
            "failed to write analysis report: {}",
            layout.analysis_json.display()
        )
    })?;
    println!("analyze: complete report={}", layout.analysis_json.display());
    Ok(())
}
