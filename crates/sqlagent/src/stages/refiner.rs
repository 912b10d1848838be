use std::fmt::Write as _;

use super::{OUTPUT_EXCERPT_CHARS, QuestionInput, StageContext, extract_sql};
use crate::error::StageError;
use crate::models::{ExecutionOutcome, ReducedSchema, Stage};
use crate::reasoning::excerpt;

/// Asks the service to repair `sql` given the outcome of executing it. Returns the SQL text
/// of the repaired query; the caller decides how it enters the candidate chain.
pub fn refine(
    context: &StageContext<'_>,
    question: &QuestionInput,
    reduced: &ReducedSchema,
    sql: &str,
    outcome: &ExecutionOutcome,
) -> Result<String, StageError> {
    let input = render_refiner_input(question, reduced, sql, outcome);
    let raw_output = context.call_service(Stage::Refiner, input)?;

    extract_sql(&raw_output).ok_or_else(|| StageError::Generation {
        stage: Stage::Refiner,
        excerpt: excerpt(&raw_output, OUTPUT_EXCERPT_CHARS),
    })
}

#[must_use]
pub fn render_refiner_input(
    question: &QuestionInput,
    reduced: &ReducedSchema,
    sql: &str,
    outcome: &ExecutionOutcome,
) -> String {
    let mut input = question.render();
    let _ = write!(input, "\n{}\n", reduced.render());

    let shown_sql = if sql.trim().is_empty() {
        "(no SQL was produced)"
    } else {
        sql
    };
    let _ = write!(input, "SQL QUERY:\n{shown_sql}\n\nEXECUTION RESULT:\n");

    match outcome {
        ExecutionOutcome::ExecutionError { message, .. } => {
            let _ = writeln!(input, "Error: {message}");
            input.push_str("\nFix the error and return the corrected query.");
        }
        ExecutionOutcome::Timeout { budget_ms } => {
            let _ = writeln!(input, "The query did not finish within {budget_ms} ms.");
            input.push_str(
                "\nSimplify the query: avoid unnecessary joins and subqueries, filter early, and drop unneeded DISTINCT or ORDER BY.",
            );
        }
        ExecutionOutcome::Success { columns, rows } => {
            let _ = writeln!(
                input,
                "Returned {} rows with columns: {}",
                rows.len(),
                columns.join(", ")
            );
            input.push_str("\nCheck that the query answers the question and fix it if not.");
        }
    }

    input
}
