use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    Decomposer,
    Refiner,
    /// Placeholder produced when a stage returned no extractable SQL.
    Sentinel,
}

impl CandidateOrigin {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Decomposer => "decomposer",
            Self::Refiner => "refiner",
            Self::Sentinel => "sentinel",
        }
    }
}

/// One concrete SQL text produced during generation or repair.
///
/// Candidates are never edited. A repair builds a new candidate that points back at the
/// one it replaces, so the chain of attempts for a question can always be walked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    attempt: u32,
    sql: String,
    origin: CandidateOrigin,
    previous: Option<Arc<Candidate>>,
}

impl Candidate {
    #[must_use]
    pub fn generated(sql: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            attempt: 0,
            sql: sql.into(),
            origin: CandidateOrigin::Decomposer,
            previous: None,
        })
    }

    #[must_use]
    pub fn repaired(previous: &Arc<Candidate>, sql: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            attempt: previous.attempt + 1,
            sql: sql.into(),
            origin: CandidateOrigin::Refiner,
            previous: Some(Arc::clone(previous)),
        })
    }

    #[must_use]
    pub fn sentinel(previous: Option<&Arc<Candidate>>) -> Arc<Self> {
        Arc::new(Self {
            attempt: previous.map_or(0, |candidate| candidate.attempt + 1),
            sql: String::new(),
            origin: CandidateOrigin::Sentinel,
            previous: previous.map(Arc::clone),
        })
    }

    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn origin(&self) -> CandidateOrigin {
        self.origin
    }

    #[must_use]
    pub fn previous(&self) -> Option<&Arc<Candidate>> {
        self.previous.as_ref()
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.origin == CandidateOrigin::Sentinel
    }

    /// Every attempt leading to this candidate, oldest first.
    #[must_use]
    pub fn lineage(&self) -> Vec<&Candidate> {
        let mut chain = vec![self];
        let mut cursor = self.previous.as_deref();
        while let Some(candidate) = cursor {
            chain.push(candidate);
            cursor = candidate.previous.as_deref();
        }
        chain.reverse();
        chain
    }
}
