use std::sync::Arc;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, ServiceError, StageError};
use crate::models::{
    Candidate, ExecutionOutcome, InstructionSet, ReducedSchema, SchemaDescription, Stage, Trace,
    TraceBuilder, TraceStage, TraceStep,
};
use crate::profiler::profile_database;
use crate::reasoning::ReasoningService;
use crate::sqlite::DatabaseHandle;
use crate::stages::{self, QuestionInput, StageContext};
use crate::utils::time::elapsed_ms;
use crate::validator::ExecutionValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The last candidate executed successfully.
    Resolved,
    /// Every allowed repair was spent without a successful execution.
    Exhausted { repairs: u32 },
}

impl Termination {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Exhausted { .. } => "exhausted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub final_sql: String,
    pub final_outcome: ExecutionOutcome,
    pub candidate: Arc<Candidate>,
    pub trace: Trace,
    pub resolved: bool,
    pub termination: Termination,
    pub reduced_schema: ReducedSchema,
}

/// Selector, decomposer, then the validate/repair loop for one question.
pub struct Pipeline<'a> {
    service: &'a dyn ReasoningService,
    instructions: &'a InstructionSet,
    config: &'a PipelineConfig,
    validator: ExecutionValidator,
}

enum LoopState {
    Validate(Arc<Candidate>),
    Repair {
        candidate: Arc<Candidate>,
        outcome: ExecutionOutcome,
    },
    Done {
        candidate: Arc<Candidate>,
        outcome: ExecutionOutcome,
        termination: Termination,
    },
}

impl<'a> Pipeline<'a> {
    #[must_use]
    pub fn new(
        service: &'a dyn ReasoningService,
        instructions: &'a InstructionSet,
        config: &'a PipelineConfig,
    ) -> Self {
        Self {
            service,
            instructions,
            config,
            validator: ExecutionValidator::new(config.execution_budget),
        }
    }

    #[must_use]
    pub fn instruction_version(&self) -> u32 {
        self.instructions.version
    }

    /// Profiles `db` and answers `question` against it.
    pub fn run(
        &self,
        db: &DatabaseHandle,
        question: &QuestionInput,
    ) -> Result<PipelineOutcome, PipelineError> {
        let started_at = Instant::now();
        let schema = profile_database(db)?;
        self.run_profiled(db, &schema, elapsed_ms(started_at), question)
    }

    /// Answers `question` with a schema that was already profiled from `db`.
    pub fn run_profiled(
        &self,
        db: &DatabaseHandle,
        schema: &SchemaDescription,
        profile_ms: u64,
        question: &QuestionInput,
    ) -> Result<PipelineOutcome, PipelineError> {
        let context = StageContext {
            service: self.service,
            instructions: self.instructions,
            config: self.config,
        };
        let mut trace = TraceBuilder::new(self.instructions.version);

        trace.record(TraceStep {
            stage: TraceStage::Profiler,
            attempt: 0,
            input_summary: format!("db_id={}", db.db_id),
            output_summary: format!(
                "tables={} columns={} foreign_keys={}",
                schema.tables.len(),
                schema.column_count(),
                schema.foreign_keys.len()
            ),
            outcome: "ok",
            candidate_sql: None,
            duration_ms: profile_ms,
        });

        let reduced = self.run_selector(&context, question, schema, &mut trace)?;
        let generated = self.run_decomposer(&context, question, &reduced, &mut trace)?;
        let (candidate, final_outcome, termination) =
            self.run_repair_loop(&context, db, question, &reduced, generated, &mut trace)?;

        tracing::info!(
            db_id = %db.db_id,
            termination = termination.as_str(),
            attempts = candidate.attempt() + 1,
            outcome = final_outcome.label(),
            "pipeline finished"
        );

        Ok(PipelineOutcome {
            final_sql: candidate.sql().to_string(),
            final_outcome,
            resolved: termination == Termination::Resolved,
            candidate,
            trace: trace.finish(),
            termination,
            reduced_schema: reduced,
        })
    }

    fn run_selector(
        &self,
        context: &StageContext<'_>,
        question: &QuestionInput,
        schema: &SchemaDescription,
        trace: &mut TraceBuilder,
    ) -> Result<ReducedSchema, PipelineError> {
        let started_at = Instant::now();
        let result = stages::select(context, question, schema);
        let duration_ms = elapsed_ms(started_at);
        let input_summary = format!(
            "tables={} columns={}",
            schema.tables.len(),
            schema.column_count()
        );

        let (reduced, outcome) = match result {
            Ok(selection) => (selection.reduced, "ok"),
            Err(error) => {
                fail_if_unavailable(Stage::Selector, &error)?;
                tracing::debug!(error = %error, "selector fell back to the full schema");
                (ReducedSchema::full(schema), error.code())
            }
        };

        trace.record(TraceStep {
            stage: TraceStage::Selector,
            attempt: 0,
            input_summary,
            output_summary: reduced.summary(),
            outcome,
            candidate_sql: None,
            duration_ms,
        });
        Ok(reduced)
    }

    fn run_decomposer(
        &self,
        context: &StageContext<'_>,
        question: &QuestionInput,
        reduced: &ReducedSchema,
        trace: &mut TraceBuilder,
    ) -> Result<Arc<Candidate>, PipelineError> {
        let started_at = Instant::now();
        let result = stages::decompose(context, question, reduced);
        let duration_ms = elapsed_ms(started_at);

        let (candidate, output_summary, outcome) = match result {
            Ok(decomposition) => (
                Candidate::generated(decomposition.sql.clone()),
                decomposition.summary(),
                "ok",
            ),
            Err(error) => {
                fail_if_unavailable(Stage::Decomposer, &error)?;
                tracing::debug!(error = %error, "decomposer produced no SQL");
                (Candidate::sentinel(None), error.to_string(), error.code())
            }
        };

        trace.record(TraceStep {
            stage: TraceStage::Decomposer,
            attempt: candidate.attempt(),
            input_summary: reduced.summary(),
            output_summary,
            outcome,
            candidate_sql: Some(candidate.sql()),
            duration_ms,
        });
        Ok(candidate)
    }

    fn run_repair_loop(
        &self,
        context: &StageContext<'_>,
        db: &DatabaseHandle,
        question: &QuestionInput,
        reduced: &ReducedSchema,
        first: Arc<Candidate>,
        trace: &mut TraceBuilder,
    ) -> Result<(Arc<Candidate>, ExecutionOutcome, Termination), PipelineError> {
        let max_repairs = self.config.max_repair_attempts;
        let mut repairs = 0_u32;
        let mut state = LoopState::Validate(first);

        loop {
            state = match state {
                LoopState::Validate(candidate) => {
                    let started_at = Instant::now();
                    let outcome = self.validator.execute(db, candidate.sql());
                    trace.record(TraceStep {
                        stage: TraceStage::Validator,
                        attempt: candidate.attempt(),
                        input_summary: format!("sql_chars={}", candidate.sql().len()),
                        output_summary: outcome.summary(),
                        outcome: outcome.label(),
                        candidate_sql: None,
                        duration_ms: elapsed_ms(started_at),
                    });

                    if outcome.is_success() {
                        LoopState::Done {
                            candidate,
                            outcome,
                            termination: Termination::Resolved,
                        }
                    } else if repairs >= max_repairs {
                        LoopState::Done {
                            candidate,
                            outcome,
                            termination: Termination::Exhausted { repairs },
                        }
                    } else {
                        LoopState::Repair { candidate, outcome }
                    }
                }
                LoopState::Repair { candidate, outcome } => {
                    repairs += 1;
                    let started_at = Instant::now();
                    let result = stages::refine(context, question, reduced, candidate.sql(), &outcome);
                    let duration_ms = elapsed_ms(started_at);

                    let (repaired, result_code) = match result {
                        Ok(sql) => (Candidate::repaired(&candidate, sql), "ok"),
                        Err(error) => {
                            fail_if_unavailable(Stage::Refiner, &error)?;
                            tracing::debug!(error = %error, attempt = repairs, "refiner produced no SQL");
                            (Candidate::sentinel(Some(&candidate)), error.code())
                        }
                    };

                    trace.record(TraceStep {
                        stage: TraceStage::Refiner,
                        attempt: repaired.attempt(),
                        input_summary: format!(
                            "attempt={} outcome={}",
                            candidate.attempt(),
                            outcome.label()
                        ),
                        output_summary: format!("sql_chars={}", repaired.sql().len()),
                        outcome: result_code,
                        candidate_sql: Some(repaired.sql()),
                        duration_ms,
                    });
                    LoopState::Validate(repaired)
                }
                LoopState::Done {
                    candidate,
                    outcome,
                    termination,
                } => return Ok((candidate, outcome, termination)),
            };
        }
    }
}

fn fail_if_unavailable(stage: Stage, error: &StageError) -> Result<(), PipelineError> {
    match error {
        StageError::Service(ServiceError::Unavailable(detail)) => {
            Err(PipelineError::ServiceUnavailable {
                stage,
                detail: detail.clone(),
            })
        }
        _ => Ok(()),
    }
}
