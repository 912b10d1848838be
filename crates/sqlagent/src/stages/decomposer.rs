use std::sync::OnceLock;

use regex::Regex;

use super::{OUTPUT_EXCERPT_CHARS, QuestionInput, StageContext, extract_sql};
use crate::error::StageError;
use crate::models::{ReducedSchema, Stage};
use crate::reasoning::excerpt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    MultiPart,
    /// The output did not declare its complexity.
    Undeclared,
}

impl Complexity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::MultiPart => "multi-part",
            Self::Undeclared => "undeclared",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decomposition {
    pub sql: String,
    pub complexity: Complexity,
    pub sub_questions: usize,
    pub raw_output: String,
}

impl Decomposition {
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "complexity={} sub_questions={}",
            self.complexity.as_str(),
            self.sub_questions
        )
    }
}

/// One service call that classifies the question, reasons through any sub-questions and
/// returns a single SQL candidate.
pub fn decompose(
    context: &StageContext<'_>,
    question: &QuestionInput,
    reduced: &ReducedSchema,
) -> Result<Decomposition, StageError> {
    let input = format!(
        "{}\nRELEVANT SCHEMA:\n{}\nGenerate a SQL query to answer this question.",
        question.render(),
        reduced.render()
    );
    let raw_output = context.call_service(Stage::Decomposer, input)?;
    parse_decomposition(raw_output)
}

pub fn parse_decomposition(raw_output: String) -> Result<Decomposition, StageError> {
    let Some(sql) = extract_sql(&raw_output) else {
        return Err(StageError::Generation {
            stage: Stage::Decomposer,
            excerpt: excerpt(&raw_output, OUTPUT_EXCERPT_CHARS),
        });
    };

    let complexity = complexity_regex()
        .captures(&raw_output)
        .and_then(|captures| captures.get(1))
        .map_or(Complexity::Undeclared, |value| {
            if value.as_str().to_ascii_lowercase().starts_with("multi") {
                Complexity::MultiPart
            } else {
                Complexity::Simple
            }
        });
    let sub_questions = sub_question_regex().find_iter(&raw_output).count();

    Ok(Decomposition {
        sql,
        complexity,
        sub_questions,
        raw_output,
    })
}

fn complexity_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?im)^\W*complexity\W*:\W*(simple|multi[- ]?part)")
            .expect("complexity regex should compile")
    })
}

fn sub_question_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?im)^\W*sub-?question\s*\d+\s*:").expect("sub-question regex should compile")
    })
}

#[cfg(test)]
mod tests {
    use super::{Complexity, parse_decomposition};
    use crate::error::StageError;
    use crate::models::Stage;

    #[test]
    fn multi_part_output_is_classified_and_sub_questions_counted() {
        let output = "COMPLEXITY: multi-part\nSub-question 1: customers paying in EUR\nSub-question 2: customers paying in CZK\n```sql\nSELECT 1.0 * SUM(Currency = 'EUR') / SUM(Currency = 'CZK') FROM customers\n```";
        let decomposition =
            parse_decomposition(output.to_string()).expect("decomposition should parse");

        assert_eq!(decomposition.complexity, Complexity::MultiPart);
        assert_eq!(decomposition.sub_questions, 2);
        assert!(decomposition.sql.starts_with("SELECT 1.0 * SUM"));
        assert_eq!(decomposition.summary(), "complexity=multi-part sub_questions=2");
    }

    #[test]
    fn bold_markdown_complexity_still_parses() {
        let decomposition = parse_decomposition(
            "**Complexity:** simple\n```sql\nSELECT COUNT(*) FROM customers\n```".to_string(),
        )
        .expect("decomposition should parse");
        assert_eq!(decomposition.complexity, Complexity::Simple);
        assert_eq!(decomposition.sub_questions, 0);
    }

    #[test]
    fn missing_sql_is_a_generation_error() {
        let error = parse_decomposition("I am not sure which table to use.".to_string())
            .expect_err("no SQL means a generation error");
        assert_eq!(
            error,
            StageError::Generation {
                stage: Stage::Decomposer,
                excerpt: "I am not sure which table to use.".to_string(),
            }
        );
    }
}
