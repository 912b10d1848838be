use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ResultRecord, result_record_json_schema};
use crate::utils::time::now_utc_rfc3339;

pub const EVALUATION_REPORT_SCHEMA_VERSION: &str = "sqlagent.evaluation-report.v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationLayout {
    pub records_jsonl: PathBuf,
    pub interim_jsonl: PathBuf,
    pub report_json: PathBuf,
    pub schema_json: PathBuf,
    pub analysis_json: PathBuf,
}

#[must_use]
pub fn build_evaluation_layout(evaluation_dir: &Path) -> EvaluationLayout {
    EvaluationLayout {
        records_jsonl: evaluation_dir.join("records.jsonl"),
        interim_jsonl: evaluation_dir.join("interim_records.jsonl"),
        report_json: evaluation_dir.join("report.json"),
        schema_json: evaluation_dir.join("result_record.schema.json"),
        analysis_json: evaluation_dir.join("analysis.json"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub key: String,
    pub attempted: usize,
    pub matched: usize,
    pub accuracy_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub schema_version: String,
    pub generated_at_utc: String,
    pub instruction_version: u32,
    pub total_questions: usize,
    pub attempted: usize,
    pub matched: usize,
    pub resolved: usize,
    /// `matched / attempted`, 0.0 when nothing was attempted.
    pub accuracy: f64,
    pub accuracy_pct: f64,
    pub per_database: Vec<GroupSummary>,
    pub per_difficulty: Vec<GroupSummary>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_reason: Option<String>,

    pub duration_ms: u64,
}

impl EvaluationReport {
    #[must_use]
    pub fn halted(&self) -> bool {
        self.halted_reason.is_some()
    }
}

#[must_use]
pub fn accuracy(matched: usize, attempted: usize) -> f64 {
    if attempted == 0 {
        return 0.0;
    }
    matched as f64 / attempted as f64
}

#[must_use]
pub fn percentage(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    ((numerator as f64 * 10_000.0) / denominator as f64).round() / 100.0
}

#[must_use]
pub fn build_evaluation_report(
    records: &[ResultRecord],
    total_questions: usize,
    instruction_version: u32,
    halted_reason: Option<String>,
    duration_ms: u64,
) -> EvaluationReport {
    let attempted = records.len();
    let matched = records.iter().filter(|record| record.matched).count();
    let resolved = records.iter().filter(|record| record.resolved).count();

    EvaluationReport {
        schema_version: EVALUATION_REPORT_SCHEMA_VERSION.to_string(),
        generated_at_utc: now_utc_rfc3339(),
        instruction_version,
        total_questions,
        attempted,
        matched,
        resolved,
        accuracy: accuracy(matched, attempted),
        accuracy_pct: percentage(matched, attempted),
        per_database: group_summaries(records, |record| Some(record.db_id.clone())),
        per_difficulty: group_summaries(records, |record| record.difficulty.clone()),
        halted_reason,
        duration_ms,
    }
}

fn group_summaries(
    records: &[ResultRecord],
    key_for: impl Fn(&ResultRecord) -> Option<String>,
) -> Vec<GroupSummary> {
    let mut counters: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for record in records {
        let Some(key) = key_for(record) else {
            continue;
        };
        let entry = counters.entry(key).or_insert((0, 0));
        entry.0 += 1;
        if record.matched {
            entry.1 += 1;
        }
    }

    counters
        .into_iter()
        .map(|(key, (attempted, matched))| GroupSummary {
            key,
            attempted,
            matched,
            accuracy_pct: percentage(matched, attempted),
        })
        .collect()
}

#[must_use]
pub fn build_schema_document() -> Value {
    result_record_json_schema()
}

pub fn write_schema_artifact(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create schema artifact directory")?;
    }

    let schema = build_schema_document();
    let encoded = serde_json::to_vec_pretty(&schema).context("failed to encode schema json")?;
    std::fs::write(path, encoded).context("failed to write schema artifact")
}

pub fn write_records_artifact(path: &Path, records: &[ResultRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create records artifact directory")?;
    }

    let file = File::create(path).context("failed to create records artifact")?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record).context("failed to encode records jsonl row")?;
        writer
            .write_all(b"\n")
            .context("failed to write records newline")?;
    }
    writer
        .flush()
        .context("failed to flush records artifact writer")
}

pub fn read_records_artifact(path: &Path) -> Result<Vec<ResultRecord>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open records artifact: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", index + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ResultRecord = serde_json::from_str(&line).with_context(|| {
            format!(
                "failed to parse result record on line {} of {}",
                index + 1,
                path.display()
            )
        })?;
        records.push(record);
    }
    Ok(records)
}

pub fn write_report_artifact(path: &Path, report: &EvaluationReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("failed to create report artifact directory")?;
    }

    let encoded =
        serde_json::to_vec_pretty(report).context("failed to encode evaluation report")?;
    std::fs::write(path, encoded)
        .with_context(|| format!("failed to write evaluation report: {}", path.display()))
}

/// Appends records to the interim checkpoint as questions finish, in completion order.
#[derive(Debug)]
pub struct InterimWriter {
    writer: BufWriter<File>,
}

impl InterimWriter {
    /// Truncates any checkpoint left over from an earlier run.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context("failed to create interim checkpoint directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to open interim checkpoint: {}", path.display()))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, record: &ResultRecord) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)
            .context("failed to encode interim record")?;
        self.writer
            .write_all(b"\n")
            .context("failed to write interim newline")?;
        self.writer
            .flush()
            .context("failed to flush interim checkpoint")
    }
}

#[cfg(test)]
mod tests {
    use super::{accuracy, percentage};

    #[test]
    fn zero_matches_is_zero_accuracy() {
        assert_eq!(accuracy(0, 7), 0.0);
        assert_eq!(accuracy(0, 0), 0.0);
        assert_eq!(accuracy(3, 4), 0.75);
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(5, 0), 0.0);
    }
}
