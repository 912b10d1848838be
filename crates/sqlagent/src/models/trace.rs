use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TraceStage {
    Profiler,
    Selector,
    Decomposer,
    Validator,
    Refiner,
}

impl TraceStage {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profiler => "profiler",
            Self::Selector => "selector",
            Self::Decomposer => "decomposer",
            Self::Validator => "validator",
            Self::Refiner => "refiner",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TraceEntry {
    pub sequence: u32,
    pub stage: TraceStage,
    pub attempt: u32,
    pub input_summary: String,
    pub output_summary: String,
    pub outcome: String,

    /// Set on entries that produced a candidate (decomposer, refiner).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_sql: Option<String>,

    pub duration_ms: u64,
}

/// Finalized per-question record of every stage invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Trace {
    pub instruction_version: u32,
    pub entries: Vec<TraceEntry>,
}

impl Trace {
    #[must_use]
    pub fn empty(instruction_version: u32) -> Self {
        Self {
            instruction_version,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn entries_for(&self, stage: TraceStage) -> Vec<&TraceEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.stage == stage)
            .collect()
    }

    #[must_use]
    pub fn candidate_entries(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.candidate_sql.is_some())
            .count()
    }

    #[must_use]
    pub fn repair_count(&self) -> usize {
        self.entries_for(TraceStage::Refiner).len()
    }
}

/// Append-only builder used while a pipeline run is in flight.
#[derive(Debug)]
pub struct TraceBuilder {
    instruction_version: u32,
    entries: Vec<TraceEntry>,
}

pub struct TraceStep<'a> {
    pub stage: TraceStage,
    pub attempt: u32,
    pub input_summary: String,
    pub output_summary: String,
    pub outcome: &'a str,
    pub candidate_sql: Option<&'a str>,
    pub duration_ms: u64,
}

impl TraceBuilder {
    #[must_use]
    pub fn new(instruction_version: u32) -> Self {
        Self {
            instruction_version,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, step: TraceStep<'_>) {
        let sequence = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries.push(TraceEntry {
            sequence,
            stage: step.stage,
            attempt: step.attempt,
            input_summary: step.input_summary,
            output_summary: step.output_summary,
            outcome: step.outcome.to_string(),
            candidate_sql: step.candidate_sql.map(ToString::to_string),
            duration_ms: step.duration_ms,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn finish(self) -> Trace {
        Trace {
            instruction_version: self.instruction_version,
            entries: self.entries,
        }
    }
}
