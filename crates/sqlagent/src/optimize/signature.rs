use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{ExecutionErrorKind, ExecutionOutcome, ResultRecord, Stage};

/// Heuristic label for why a question failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSignature {
    NoSuchTable,
    NoSuchColumn,
    AmbiguousColumn,
    AggregateMisuse,
    SyntaxError,
    NoSuchFunction,
    ExecutionError,
    Timeout,
    UnsafeStatement,
    EmptyQuery,
    DatabaseUnavailable,
    MissingJoin,
    MissingFilter,
    MissingGroupBy,
    MissingOrderBy,
    DateFormat,
    ConditionalLogic,
    WrongResult,
    /// The gold query itself did not run; the record says nothing about the pipeline.
    GoldExecutionFailed,
}

impl ErrorSignature {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSuchTable => "no_such_table",
            Self::NoSuchColumn => "no_such_column",
            Self::AmbiguousColumn => "ambiguous_column",
            Self::AggregateMisuse => "aggregate_misuse",
            Self::SyntaxError => "syntax_error",
            Self::NoSuchFunction => "no_such_function",
            Self::ExecutionError => "execution_error",
            Self::Timeout => "timeout",
            Self::UnsafeStatement => "unsafe_statement",
            Self::EmptyQuery => "empty_query",
            Self::DatabaseUnavailable => "database_unavailable",
            Self::MissingJoin => "missing_join",
            Self::MissingFilter => "missing_filter",
            Self::MissingGroupBy => "missing_group_by",
            Self::MissingOrderBy => "missing_order_by",
            Self::DateFormat => "date_format",
            Self::ConditionalLogic => "conditional_logic",
            Self::WrongResult => "wrong_result",
            Self::GoldExecutionFailed => "gold_execution_failed",
        }
    }

    /// Stages whose instructions receive guidance for this signature. Empty when the
    /// failure is not something better instructions can fix.
    #[must_use]
    pub const fn target_stages(self) -> &'static [Stage] {
        match self {
            Self::NoSuchTable | Self::NoSuchColumn | Self::AmbiguousColumn => {
                &[Stage::Selector, Stage::Decomposer, Stage::Refiner]
            }
            Self::AggregateMisuse
            | Self::SyntaxError
            | Self::NoSuchFunction
            | Self::ExecutionError
            | Self::Timeout
            | Self::UnsafeStatement
            | Self::MissingJoin
            | Self::MissingFilter
            | Self::MissingGroupBy
            | Self::MissingOrderBy
            | Self::DateFormat
            | Self::ConditionalLogic => &[Stage::Decomposer, Stage::Refiner],
            Self::EmptyQuery | Self::WrongResult => &[Stage::Decomposer],
            Self::DatabaseUnavailable | Self::GoldExecutionFailed => &[],
        }
    }

    #[must_use]
    pub const fn guidance(self) -> Option<&'static str> {
        let text = match self {
            Self::NoSuchTable => {
                "Only reference tables that appear in the schema, spelled exactly as listed."
            }
            Self::NoSuchColumn => {
                "Only reference columns that exist in the table you qualify them with; check each column against the schema."
            }
            Self::AmbiguousColumn => {
                "Qualify every column with its table name or alias when more than one table is joined."
            }
            Self::AggregateMisuse => {
                "Do not nest aggregate functions or use them in WHERE; filter aggregates with HAVING or a subquery."
            }
            Self::SyntaxError => {
                "Write plain SQLite syntax: single-quoted strings, double-quoted identifiers with spaces, balanced parentheses."
            }
            Self::NoSuchFunction => {
                "Use only SQLite built-in functions (STRFTIME, SUBSTR, IIF, CAST, ROUND); SQLite has no YEAR(), DATE_FORMAT() or CONCAT()."
            }
            Self::ExecutionError => {
                "Re-read the execution error and make sure the query runs on SQLite before refining its logic."
            }
            Self::Timeout => {
                "Keep queries cheap: join on key columns, filter early, and avoid correlated subqueries over large tables."
            }
            Self::UnsafeStatement => {
                "Return exactly one read-only SELECT statement; never modify the database."
            }
            Self::EmptyQuery => {
                "Always finish with a single SQL query inside a ```sql fenced block, even when unsure."
            }
            Self::MissingJoin => {
                "Ensure proper JOIN conditions between tables when the query involves multiple tables."
            }
            Self::MissingFilter => {
                "Translate every condition in the question and the evidence into a WHERE clause."
            }
            Self::MissingGroupBy => {
                "Include GROUP BY when computing an aggregate per entity or category."
            }
            Self::MissingOrderBy => {
                "Use ORDER BY (with LIMIT) for questions about the highest, lowest, first or last values."
            }
            Self::DateFormat => "Use SQLite date functions correctly (STRFTIME, SUBSTR, etc.).",
            Self::ConditionalLogic => "Use IIF or CASE WHEN for conditional logic.",
            Self::WrongResult => {
                "Check that the selected columns and the computed values answer exactly what the question asks."
            }
            Self::DatabaseUnavailable | Self::GoldExecutionFailed => return None,
        };
        Some(text)
    }
}

impl std::fmt::Display for ErrorSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a non-matching record. Matching records have no signature.
#[must_use]
pub fn classify(record: &ResultRecord) -> Option<ErrorSignature> {
    if record.matched {
        return None;
    }
    if !record.gold_outcome.is_success() {
        return Some(ErrorSignature::GoldExecutionFailed);
    }

    let signature = match &record.outcome {
        ExecutionOutcome::ExecutionError { kind, message } => match kind {
            ExecutionErrorKind::Database => classify_message(message),
            ExecutionErrorKind::UnsafeStatement => ErrorSignature::UnsafeStatement,
            ExecutionErrorKind::EmptyStatement => ErrorSignature::EmptyQuery,
            ExecutionErrorKind::DatabaseUnavailable => ErrorSignature::DatabaseUnavailable,
        },
        ExecutionOutcome::Timeout { .. } => ErrorSignature::Timeout,
        ExecutionOutcome::Success { .. } => classify_structure(&record.gold_sql, &record.predicted_sql),
    };
    Some(signature)
}

#[must_use]
pub fn classify_message(message: &str) -> ErrorSignature {
    let patterns: &[(&Regex, ErrorSignature)] = &[
        (no_such_table_regex(), ErrorSignature::NoSuchTable),
        (no_such_column_regex(), ErrorSignature::NoSuchColumn),
        (ambiguous_column_regex(), ErrorSignature::AmbiguousColumn),
        (aggregate_misuse_regex(), ErrorSignature::AggregateMisuse),
        (no_such_function_regex(), ErrorSignature::NoSuchFunction),
        (syntax_error_regex(), ErrorSignature::SyntaxError),
    ];

    patterns
        .iter()
        .find(|(regex, _)| regex.is_match(message))
        .map_or(ErrorSignature::ExecutionError, |(_, signature)| *signature)
}

/// Compares the shape of the predicted query against the gold query for queries that ran
/// but returned the wrong rows.
#[must_use]
pub fn classify_structure(gold_sql: &str, predicted_sql: &str) -> ErrorSignature {
    let gold = normalize_sql(gold_sql);
    let predicted = normalize_sql(predicted_sql);
    let gold_has = |needle: &str| has_keyword(&gold, needle);
    let predicted_has = |needle: &str| has_keyword(&predicted, needle);

    if gold_has("join") && !predicted_has("join") {
        ErrorSignature::MissingJoin
    } else if gold_has("where") && !predicted_has("where") {
        ErrorSignature::MissingFilter
    } else if gold_has("group by") && !predicted_has("group by") {
        ErrorSignature::MissingGroupBy
    } else if gold_has("order by") && !predicted_has("order by") {
        ErrorSignature::MissingOrderBy
    } else if gold_has("strftime") && !predicted_has("strftime") {
        ErrorSignature::DateFormat
    } else if (gold_has("iif") || gold_has("case when"))
        && !(predicted_has("iif") || predicted_has("case when"))
    {
        ErrorSignature::ConditionalLogic
    } else {
        ErrorSignature::WrongResult
    }
}

fn normalize_sql(sql: &str) -> String {
    sql.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn has_keyword(normalized_sql: &str, keyword: &str) -> bool {
    normalized_sql.match_indices(keyword).any(|(start, _)| {
        let before = normalized_sql[..start].chars().next_back();
        let after = normalized_sql[start + keyword.len()..].chars().next();
        let is_word = |ch: char| ch.is_alphanumeric() || ch == '_';
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

fn no_such_table_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?i)no such table").expect("no-such-table regex should compile"))
}

fn no_such_column_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)no such column|has no column named")
            .expect("no-such-column regex should compile")
    })
}

fn ambiguous_column_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)ambiguous column name").expect("ambiguous-column regex should compile")
    })
}

fn aggregate_misuse_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)misuse of (?:aggregate|window)|aggregate functions are not allowed")
            .expect("aggregate-misuse regex should compile")
    })
}

fn no_such_function_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)no such function|wrong number of arguments to function")
            .expect("no-such-function regex should compile")
    })
}

fn syntax_error_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"(?i)syntax error|incomplete input|unrecognized token"#)
            .expect("syntax-error regex should compile")
    })
}

#[cfg(test)]
mod tests {
    use super::{ErrorSignature, classify_message, classify_structure};

    #[test]
    fn sqlite_messages_map_to_signatures() {
        assert_eq!(
            classify_message("no such table: customer"),
            ErrorSignature::NoSuchTable
        );
        assert_eq!(
            classify_message("no such column: T1.Curency"),
            ErrorSignature::NoSuchColumn
        );
        assert_eq!(
            classify_message("ambiguous column name: CustomerID"),
            ErrorSignature::AmbiguousColumn
        );
        assert_eq!(
            classify_message("misuse of aggregate function COUNT()"),
            ErrorSignature::AggregateMisuse
        );
        assert_eq!(
            classify_message("near \"FORM\": syntax error"),
            ErrorSignature::SyntaxError
        );
        assert_eq!(
            classify_message("no such function: YEAR"),
            ErrorSignature::NoSuchFunction
        );
        assert_eq!(
            classify_message("database is locked"),
            ErrorSignature::ExecutionError
        );
    }

    #[test]
    fn structural_checks_follow_keyword_precedence() {
        assert_eq!(
            classify_structure(
                "SELECT T2.Consumption FROM customers AS T1 JOIN yearmonth AS T2 ON T1.CustomerID = T2.CustomerID",
                "SELECT Consumption FROM yearmonth",
            ),
            ErrorSignature::MissingJoin
        );
        assert_eq!(
            classify_structure(
                "SELECT COUNT(*) FROM gasstations GROUP BY Country",
                "SELECT COUNT(*) FROM gasstations",
            ),
            ErrorSignature::MissingGroupBy
        );
        assert_eq!(
            classify_structure(
                "SELECT SUM(IIF(Currency = 'EUR', 1, 0)) FROM customers",
                "SELECT COUNT(*) FROM customers",
            ),
            ErrorSignature::ConditionalLogic
        );
        assert_eq!(
            classify_structure("SELECT 1", "SELECT 2"),
            ErrorSignature::WrongResult
        );
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert_eq!(
            classify_structure(
                "SELECT Date FROM yearmonth WHERE Date LIKE '2012%'",
                "SELECT Date FROM yearmonth_where",
            ),
            ErrorSignature::MissingFilter
        );
    }

    #[test]
    fn every_guidance_signature_targets_a_stage() {
        for signature in [
            ErrorSignature::NoSuchTable,
            ErrorSignature::Timeout,
            ErrorSignature::EmptyQuery,
            ErrorSignature::WrongResult,
        ] {
            assert!(signature.guidance().is_some());
            assert!(!signature.target_stages().is_empty());
        }
        assert!(ErrorSignature::GoldExecutionFailed.guidance().is_none());
        assert!(ErrorSignature::DatabaseUnavailable.target_stages().is_empty());
    }
}
