use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::outcome::ExecutionOutcome;
use super::trace::Trace;

pub const RESULT_RECORD_SCHEMA_VERSION: &str = "sqlagent.result-record.v1";

/// Persisted outcome of evaluating one labeled question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResultRecord {
    pub schema_version: String,
    pub question_index: usize,
    pub question_id: String,
    pub question: String,
    pub db_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,

    pub predicted_sql: String,
    pub gold_sql: String,
    pub matched: bool,
    pub resolved: bool,
    pub outcome: ExecutionOutcome,
    pub gold_outcome: ExecutionOutcome,
    pub instruction_version: u32,
    pub trace: Trace,

    /// Why the pipeline could not run for this question, when it could not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

#[must_use]
pub fn result_record_json_schema() -> Value {
    let schema = schemars::schema_for!(ResultRecord);
    match serde_json::to_value(schema) {
        Ok(value) => value,
        Err(error) => {
            panic!("failed to serialize generated result record schema: {error}");
        }
    }
}
