pub mod compare;
pub mod dataset;
pub mod report;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Result, anyhow};

use crate::error::PipelineError;
use crate::models::{
    ExecutionErrorKind, ExecutionOutcome, RESULT_RECORD_SCHEMA_VERSION, ResultRecord,
    SchemaDescription, Trace,
};
use crate::pipeline::Pipeline;
use crate::profiler::profile_database;
use crate::sqlite::DatabaseHandle;
use crate::utils::time::elapsed_ms;
use crate::validator::ExecutionValidator;

pub use compare::results_match;
pub use dataset::{LabeledQuestion, load_bird_dataset};
pub use report::{
    EvaluationLayout, EvaluationReport, GroupSummary, InterimWriter, accuracy,
    build_evaluation_layout, build_evaluation_report, percentage, read_records_artifact,
    write_records_artifact, write_report_artifact, write_schema_artifact,
};

pub const DEFAULT_WORKERS: usize = 4;

/// Shared flag that stops a batch from starting new questions. In-flight questions finish.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct EvaluationRun {
    /// One record per attempted question, in dataset order.
    pub records: Vec<ResultRecord>,
    pub report: EvaluationReport,
}

enum QuestionResult {
    Recorded(Box<ResultRecord>),
    Halted(String),
}

type ProfiledSchema = Result<(Arc<SchemaDescription>, u64), String>;

/// Runs the pipeline over a labeled set on a bounded worker pool.
pub struct Evaluator<'p, 'a> {
    pipeline: &'p Pipeline<'a>,
    db_root: PathBuf,
    workers: usize,
    gold_validator: ExecutionValidator,
    cancellation: CancellationToken,
    schemas: Mutex<HashMap<String, ProfiledSchema>>,
}

impl<'p, 'a> Evaluator<'p, 'a> {
    #[must_use]
    pub fn new(pipeline: &'p Pipeline<'a>, db_root: PathBuf, gold_validator: ExecutionValidator) -> Self {
        Self {
            pipeline,
            db_root,
            workers: DEFAULT_WORKERS,
            gold_validator,
            cancellation: CancellationToken::new(),
            schemas: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Evaluates every question. `on_record` sees each record as soon as it completes, in
    /// completion order; an error from it aborts the batch after in-flight questions.
    pub fn evaluate<F>(&self, questions: &[LabeledQuestion], mut on_record: F) -> Result<EvaluationRun>
    where
        F: FnMut(&ResultRecord) -> Result<()>,
    {
        let started_at = Instant::now();
        let next_index = AtomicUsize::new(0);
        let worker_count = self.workers.min(questions.len()).max(1);
        let (sender, receiver) = mpsc::channel::<(usize, QuestionResult)>();

        let mut collected = BTreeMap::new();
        let mut halted_reason = None;
        let mut callback_error = None;

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                let sender = sender.clone();
                let next_index = &next_index;
                scope.spawn(move || {
                    loop {
                        if self.cancellation.is_cancelled() {
                            break;
                        }
                        let index = next_index.fetch_add(1, Ordering::SeqCst);
                        let Some(question) = questions.get(index) else {
                            break;
                        };
                        let result = self.evaluate_question(index, question);
                        if matches!(result, QuestionResult::Halted(_)) {
                            self.cancellation.cancel();
                        }
                        if sender.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(sender);

            for (index, result) in receiver {
                match result {
                    QuestionResult::Recorded(record) => {
                        if callback_error.is_none() {
                            if let Err(error) = on_record(&record) {
                                self.cancellation.cancel();
                                callback_error = Some(error);
                            }
                        }
                        collected.insert(index, *record);
                    }
                    QuestionResult::Halted(reason) => {
                        tracing::warn!(question_index = index, reason = %reason, "evaluation halted");
                        halted_reason.get_or_insert(reason);
                    }
                }
            }
        });

        if let Some(error) = callback_error {
            return Err(error);
        }

        let records = collected.into_values().collect::<Vec<_>>();
        let report = build_evaluation_report(
            &records,
            questions.len(),
            self.pipeline.instruction_version(),
            halted_reason,
            elapsed_ms(started_at),
        );
        Ok(EvaluationRun { records, report })
    }

    fn evaluate_question(&self, index: usize, question: &LabeledQuestion) -> QuestionResult {
        let db = DatabaseHandle::from_root(&self.db_root, &question.db_id);
        let gold_outcome = self.gold_validator.execute(&db, &question.gold_sql);

        let (schema, profile_ms) = match self.profiled_schema(&db) {
            Ok(profiled) => profiled,
            Err(message) => {
                return QuestionResult::Recorded(Box::new(self.failure_record(
                    index,
                    question,
                    gold_outcome,
                    ExecutionOutcome::error(ExecutionErrorKind::DatabaseUnavailable, message.clone()),
                    format!("profile_failed: {message}"),
                )));
            }
        };

        match self
            .pipeline
            .run_profiled(&db, &schema, profile_ms, &question.input())
        {
            Ok(outcome) => {
                let matched = results_match(&gold_outcome, &outcome.final_outcome);
                tracing::info!(
                    question_id = %question.question_id,
                    db_id = %question.db_id,
                    matched,
                    resolved = outcome.resolved,
                    "question evaluated"
                );
                QuestionResult::Recorded(Box::new(ResultRecord {
                    schema_version: RESULT_RECORD_SCHEMA_VERSION.to_string(),
                    question_index: index,
                    question_id: question.question_id.clone(),
                    question: question.question.clone(),
                    db_id: question.db_id.clone(),
                    evidence: question.evidence.clone(),
                    difficulty: question.difficulty.clone(),
                    predicted_sql: outcome.final_sql,
                    gold_sql: question.gold_sql.clone(),
                    matched,
                    resolved: outcome.resolved,
                    outcome: outcome.final_outcome,
                    gold_outcome,
                    instruction_version: self.pipeline.instruction_version(),
                    trace: outcome.trace,
                    failure: None,
                }))
            }
            Err(error @ PipelineError::ServiceUnavailable { .. }) => {
                QuestionResult::Halted(error.to_string())
            }
            Err(PipelineError::Profile(error)) => {
                let message = error.to_string();
                QuestionResult::Recorded(Box::new(self.failure_record(
                    index,
                    question,
                    gold_outcome,
                    ExecutionOutcome::error(ExecutionErrorKind::DatabaseUnavailable, message.clone()),
                    format!("profile_failed: {message}"),
                )))
            }
        }
    }

    fn failure_record(
        &self,
        index: usize,
        question: &LabeledQuestion,
        gold_outcome: ExecutionOutcome,
        outcome: ExecutionOutcome,
        failure: String,
    ) -> ResultRecord {
        tracing::warn!(
            question_id = %question.question_id,
            db_id = %question.db_id,
            failure = %failure,
            "question recorded as failure"
        );
        ResultRecord {
            schema_version: RESULT_RECORD_SCHEMA_VERSION.to_string(),
            question_index: index,
            question_id: question.question_id.clone(),
            question: question.question.clone(),
            db_id: question.db_id.clone(),
            evidence: question.evidence.clone(),
            difficulty: question.difficulty.clone(),
            predicted_sql: String::new(),
            gold_sql: question.gold_sql.clone(),
            matched: false,
            resolved: false,
            outcome,
            gold_outcome,
            instruction_version: self.pipeline.instruction_version(),
            trace: Trace::empty(self.pipeline.instruction_version()),
            failure: Some(failure),
        }
    }

    /// Profiles each database once per batch; later questions reuse the description.
    fn profiled_schema(&self, db: &DatabaseHandle) -> ProfiledSchema {
        if let Some(cached) = self
            .schemas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&db.db_id)
        {
            return cached.clone();
        }

        let started_at = Instant::now();
        let profiled = profile_database(db)
            .map(|schema| (Arc::new(schema), elapsed_ms(started_at)))
            .map_err(|error| error.to_string());
        self.schemas
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(db.db_id.clone())
            .or_insert(profiled)
            .clone()
    }
}

/// Fails when the batch was halted, so callers can map it to a distinct exit status.
pub fn ensure_not_halted(report: &EvaluationReport) -> Result<()> {
    match &report.halted_reason {
        Some(reason) => Err(anyhow!(EvaluationHalted {
            reason: reason.clone()
        })),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("evaluation halted: {reason}")]
pub struct EvaluationHalted {
    pub reason: String,
}
