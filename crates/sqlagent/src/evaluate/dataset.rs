use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;

use crate::stages::QuestionInput;

/// One benchmark question with its gold query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledQuestion {
    pub question_id: String,
    pub db_id: String,
    pub question: String,
    pub evidence: Option<String>,
    pub gold_sql: String,
    pub difficulty: Option<String>,
}

impl LabeledQuestion {
    #[must_use]
    pub fn input(&self) -> QuestionInput {
        QuestionInput::new(self.question.clone()).with_evidence(self.evidence.clone())
    }
}

#[derive(Debug, Deserialize)]
struct BirdEntry {
    #[serde(default)]
    question_id: Option<Value>,
    db_id: String,
    question: String,
    #[serde(default)]
    evidence: Option<String>,
    #[serde(rename = "SQL", alias = "sql", alias = "query")]
    sql: String,
    #[serde(default)]
    difficulty: Option<String>,
}

/// Reads a BIRD-style JSON array. `sample_size` keeps the first N entries.
pub fn load_bird_dataset(path: &Path, sample_size: Option<usize>) -> Result<Vec<LabeledQuestion>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset: {}", path.display()))?;
    let entries: Vec<BirdEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse dataset JSON: {}", path.display()))?;
    if entries.is_empty() {
        bail!("dataset contains no questions: {}", path.display());
    }

    let limit = sample_size.filter(|size| *size > 0).unwrap_or(entries.len());
    let mut seen_ids = BTreeSet::new();
    let mut questions = Vec::with_capacity(limit.min(entries.len()));

    for (index, entry) in entries.into_iter().take(limit).enumerate() {
        let question_id = match entry.question_id {
            Some(Value::String(id)) => id,
            Some(Value::Number(id)) => id.to_string(),
            Some(other) => bail!("question {index} has an unsupported question_id: {other}"),
            None => index.to_string(),
        };
        if !seen_ids.insert(question_id.clone()) {
            bail!("dataset contains duplicate question_id `{question_id}`");
        }
        if entry.db_id.trim().is_empty() {
            bail!("question `{question_id}` has an empty db_id");
        }

        questions.push(LabeledQuestion {
            question_id,
            db_id: entry.db_id,
            question: entry.question,
            evidence: entry.evidence.filter(|value| !value.trim().is_empty()),
            gold_sql: entry.sql,
            difficulty: entry.difficulty.filter(|value| !value.trim().is_empty()),
        });
    }

    Ok(questions)
}
