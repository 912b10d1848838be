pub mod decomposer;
pub mod extract;
pub mod refiner;
pub mod selector;

use std::fmt::Write as _;
use std::thread;

use crate::config::PipelineConfig;
use crate::error::ServiceError;
use crate::models::{InstructionSet, Stage};
use crate::reasoning::{CompletionRequest, ReasoningService};

pub use decomposer::{Complexity, Decomposition, decompose};
pub use extract::extract_sql;
pub use refiner::refine;
pub use selector::{Selection, parse_selection, select};

/// Characters of service output kept in trace summaries and generation errors.
pub const OUTPUT_EXCERPT_CHARS: usize = 160;

/// Natural-language question plus optional external knowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionInput {
    pub question: String,
    pub evidence: Option<String>,
}

impl QuestionInput {
    #[must_use]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            evidence: None,
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, evidence: Option<String>) -> Self {
        self.evidence = evidence.filter(|value| !value.trim().is_empty());
        self
    }

    /// Header shared by every stage input.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = format!("QUESTION: {}\n", self.question.trim());
        if let Some(evidence) = &self.evidence {
            let _ = writeln!(rendered, "RELEVANT KNOWLEDGE: {}", evidence.trim());
        }
        rendered
    }
}

/// Everything a stage needs besides its own typed inputs.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub service: &'a dyn ReasoningService,
    pub instructions: &'a InstructionSet,
    pub config: &'a PipelineConfig,
}

impl StageContext<'_> {
    /// Sends one stage request, repeating it after transient failures.
    pub fn call_service(&self, stage: Stage, input: String) -> Result<String, ServiceError> {
        let request = CompletionRequest {
            stage,
            instruction: self.instructions.render(stage),
            input,
            temperature: self.config.temperature(stage),
        };

        let mut attempt = 0_u32;
        loop {
            match self.service.complete(&request) {
                Ok(text) => return Ok(text),
                Err(error) if error.is_transient() && attempt < self.config.service_retries => {
                    attempt += 1;
                    tracing::warn!(
                        stage = %stage,
                        service = self.service.name(),
                        attempt,
                        error = %error,
                        "retrying reasoning call"
                    );
                    let backoff = self.config.retry_backoff.saturating_mul(attempt);
                    if !backoff.is_zero() {
                        thread::sleep(backoff);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}
