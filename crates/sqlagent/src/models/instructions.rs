use std::collections::BTreeMap;
use std::fmt::Write as _;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::utils::time::now_utc_rfc3339;

pub const INSTRUCTION_SET_SCHEMA_VERSION: &str = "sqlagent.instruction-set.v1";
pub const BASELINE_VERSION: u32 = 1;

pub const BASE_SELECTOR_INSTRUCTIONS: &str = "You are a database expert who narrows a database schema down to what a question needs.

TASK:
Given a question and a database schema, name ONLY the tables and columns needed to answer it.

INSTRUCTIONS:
1. Work out which entities, filters and aggregates the question asks about.
2. Keep every table that holds one of those values, plus any table needed to join them.
3. Keep the key columns used by the join conditions.
4. Use table and column names exactly as they appear in the schema.

OUTPUT FORMAT:
One line per relevant table, written as `table: column, column, ...`.";

pub const BASE_DECOMPOSER_INSTRUCTIONS: &str = "You are an expert in SQL generation and in breaking complex questions into steps.

TASK:
Given a question and the relevant part of a database schema, write one SQLite query that answers it.

INSTRUCTIONS:
1. Start your answer with `COMPLEXITY: simple` or `COMPLEXITY: multi-part`.
2. For a multi-part question, list the sub-questions as `Sub-question 1: ...` and reason about each in SQL before combining them.
3. Pay close attention to:
   - exact table and column names
   - JOIN conditions between tables
   - WHERE filters, grouping, ordering and aggregation
   - nested queries where a step depends on another
4. Use SQLite syntax: single-quoted string literals, STRFTIME/SUBSTR for dates, explicit NULL handling, CAST before dividing integers.

OUTPUT:
Reason step by step, then end with the final query inside a ```sql fenced block.";

pub const BASE_REFINER_INSTRUCTIONS: &str = "You are an expert SQL debugger.

TASK:
Given a question, a database schema, a SQL query and the result of executing it, return a corrected query.

INSTRUCTIONS:
1. Read the execution error or timeout notice first and fix its cause.
2. Check for:
   - syntax errors
   - wrong table or column references
   - missing or incorrect JOIN conditions
   - incorrect aggregation or grouping
   - type mismatches in comparisons
   - misuse of SQL functions such as STRFTIME and SUBSTR
3. Keep whatever already answers the question; change only what is broken.
4. The query must be a single read-only SELECT statement.

OUTPUT:
Return the corrected query inside a ```sql fenced block.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Selector,
    Decomposer,
    Refiner,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Selector, Stage::Decomposer, Stage::Refiner];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Selector => "selector",
            Self::Decomposer => "decomposer",
            Self::Refiner => "refiner",
        }
    }

    #[must_use]
    pub const fn default_temperature(self) -> f32 {
        match self {
            Self::Selector | Self::Refiner => 0.2,
            Self::Decomposer => 0.3,
        }
    }

    #[must_use]
    pub const fn base_instructions(self) -> &'static str {
        match self {
            Self::Selector => BASE_SELECTOR_INSTRUCTIONS,
            Self::Decomposer => BASE_DECOMPOSER_INSTRUCTIONS,
            Self::Refiner => BASE_REFINER_INSTRUCTIONS,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GuidanceExample {
    pub question: String,
    pub incorrect_sql: String,
    pub correct_sql: String,
}

/// One piece of failure-avoidance advice appended by the optimizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Guidance {
    pub id: String,
    pub signature: String,
    pub text: String,
    pub added_in_version: u32,
    pub last_seen_version: u32,
    /// Failures observed for this signature across optimizer runs.
    pub support: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<GuidanceExample>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Exemplar {
    pub question: String,
    pub db_id: String,
    pub sql: String,
    pub added_in_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StageInstructions {
    pub base: String,

    #[serde(default)]
    pub guidance: Vec<Guidance>,

    #[serde(default)]
    pub exemplars: Vec<Exemplar>,
}

impl StageInstructions {
    #[must_use]
    pub fn baseline(stage: Stage) -> Self {
        Self {
            base: stage.base_instructions().to_string(),
            guidance: Vec::new(),
            exemplars: Vec::new(),
        }
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = self.base.clone();

        if !self.guidance.is_empty() {
            rendered.push_str("\n\nCOMMON ERRORS TO AVOID:\n");
            for (index, guidance) in self.guidance.iter().enumerate() {
                let _ = writeln!(rendered, "{}. {}", index + 1, guidance.text);
                if let Some(example) = &guidance.example {
                    let _ = writeln!(rendered, "   Question: {}", example.question);
                    let _ = writeln!(rendered, "   Incorrect: {}", example.incorrect_sql);
                    let _ = writeln!(rendered, "   Correct: {}", example.correct_sql);
                }
            }
        }

        if !self.exemplars.is_empty() {
            rendered.push_str("\n\nEXAMPLES:\n");
            for (index, exemplar) in self.exemplars.iter().enumerate() {
                let _ = write!(rendered, "\nExample {}:\nQuestion: {}\n", index + 1, exemplar.question);
                if let Some(evidence) = &exemplar.evidence {
                    let _ = writeln!(rendered, "Evidence: {evidence}");
                }
                let _ = writeln!(rendered, "SQL: {}", exemplar.sql);
            }
        }

        rendered
    }
}

/// Versioned per-stage instructions. New versions are derived, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InstructionSet {
    pub schema_version: String,
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version: Option<u32>,

    pub created_at_utc: String,
    pub stages: BTreeMap<Stage, StageInstructions>,
}

impl Default for InstructionSet {
    fn default() -> Self {
        Self::baseline()
    }
}

impl InstructionSet {
    #[must_use]
    pub fn baseline() -> Self {
        Self {
            schema_version: INSTRUCTION_SET_SCHEMA_VERSION.to_string(),
            version: BASELINE_VERSION,
            parent_version: None,
            created_at_utc: now_utc_rfc3339(),
            stages: Stage::ALL
                .into_iter()
                .map(|stage| (stage, StageInstructions::baseline(stage)))
                .collect(),
        }
    }

    /// Builds the next version from `stages`, recording this set as its parent.
    #[must_use]
    pub fn successor(&self, stages: BTreeMap<Stage, StageInstructions>) -> Self {
        self.successor_as(self.version + 1, stages)
    }

    /// Like [`Self::successor`] but numbered `version`, for sets derived from an older parent.
    #[must_use]
    pub fn successor_as(&self, version: u32, stages: BTreeMap<Stage, StageInstructions>) -> Self {
        Self {
            schema_version: INSTRUCTION_SET_SCHEMA_VERSION.to_string(),
            version,
            parent_version: Some(self.version),
            created_at_utc: now_utc_rfc3339(),
            stages,
        }
    }

    #[must_use]
    pub fn stage(&self, stage: Stage) -> Option<&StageInstructions> {
        self.stages.get(&stage)
    }

    /// Instruction text for `stage`, falling back to the built-in base when absent.
    #[must_use]
    pub fn render(&self, stage: Stage) -> String {
        self.stage(stage).map_or_else(
            || stage.base_instructions().to_string(),
            StageInstructions::render,
        )
    }

    #[must_use]
    pub fn guidance_count(&self) -> usize {
        self.stages.values().map(|stage| stage.guidance.len()).sum()
    }
}
