pub mod guardrail;

use std::time::{Duration, Instant};

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode};

use crate::config::DEFAULT_EXECUTION_BUDGET_MS;
use crate::models::{CellValue, ExecutionErrorKind, ExecutionOutcome};
use crate::sqlite::DatabaseHandle;

pub use guardrail::{GuardrailViolation, strip_trailing_semicolons, validate_read_only_sql};

const PROGRESS_HANDLER_OPS: i32 = 1_000;

/// Runs candidate SQL read-only under a wall-clock budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionValidator {
    budget: Duration,
}

impl Default for ExecutionValidator {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_EXECUTION_BUDGET_MS))
    }
}

impl ExecutionValidator {
    #[must_use]
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    #[must_use]
    pub fn budget(&self) -> Duration {
        self.budget
    }

    #[must_use]
    pub fn budget_ms(&self) -> u64 {
        u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX)
    }

    /// Opens a fresh read-only connection for this one execution.
    #[must_use]
    pub fn execute(&self, db: &DatabaseHandle, sql: &str) -> ExecutionOutcome {
        if let Err(violation) = validate_read_only_sql(sql) {
            return ExecutionOutcome::error(violation.kind(), violation.to_string());
        }

        let connection = match db.open_read_only() {
            Ok(connection) => connection,
            Err(error) => {
                return ExecutionOutcome::error(
                    ExecutionErrorKind::DatabaseUnavailable,
                    error.to_string(),
                );
            }
        };

        self.execute_validated(&connection, sql)
    }

    /// Same as [`Self::execute`] against a caller-owned connection.
    #[must_use]
    pub fn execute_on(&self, connection: &Connection, sql: &str) -> ExecutionOutcome {
        if let Err(violation) = validate_read_only_sql(sql) {
            return ExecutionOutcome::error(violation.kind(), violation.to_string());
        }
        self.execute_validated(connection, sql)
    }

    fn execute_validated(&self, connection: &Connection, sql: &str) -> ExecutionOutcome {
        let started_at = Instant::now();
        let budget = self.budget;
        connection.progress_handler(
            PROGRESS_HANDLER_OPS,
            Some(move || started_at.elapsed() >= budget),
        );

        let result = run_query(connection, strip_trailing_semicolons(sql));
        connection.progress_handler(PROGRESS_HANDLER_OPS, None::<fn() -> bool>);

        match result {
            Ok((columns, rows)) => ExecutionOutcome::Success { columns, rows },
            Err(QueryError::WriteIntent) => ExecutionOutcome::error(
                ExecutionErrorKind::UnsafeStatement,
                "statement is not read-only according to sqlite",
            ),
            Err(QueryError::Sqlite(error))
                if error.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) =>
            {
                tracing::debug!(budget_ms = self.budget_ms(), "execution interrupted by budget");
                ExecutionOutcome::Timeout {
                    budget_ms: self.budget_ms(),
                }
            }
            Err(QueryError::Sqlite(error)) => {
                ExecutionOutcome::error(ExecutionErrorKind::Database, error.to_string())
            }
        }
    }
}

type ResultSet = (Vec<String>, Vec<Vec<CellValue>>);

enum QueryError {
    /// The prepared statement would write; it was never stepped.
    WriteIntent,
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for QueryError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Sqlite(error)
    }
}

fn run_query(connection: &Connection, sql: &str) -> Result<ResultSet, QueryError> {
    let mut statement = connection.prepare(sql)?;
    if !statement.readonly() {
        return Err(QueryError::WriteIntent);
    }

    let columns = statement
        .column_names()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    let width = columns.len();

    let mut rows = statement.query([])?;
    let mut result_rows = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(width);
        for index in 0..width {
            cells.push(CellValue::from(row.get::<usize, SqlValue>(index)?));
        }
        result_rows.push(cells);
    }

    Ok((columns, result_rows))
}
