use std::fmt::{Display, Formatter};

use crate::models::ExecutionErrorKind;

const MUTATING_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "create", "alter", "drop", "replace", "truncate", "attach",
    "detach", "pragma", "vacuum", "reindex", "analyze", "begin", "commit", "rollback",
    "savepoint", "release",
];

/// Reason a statement was refused before it reached SQLite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailViolation {
    Empty,
    MultiStatement,
    Mutating { keyword: String },
    Unsupported { leading_keyword: String },
}

impl GuardrailViolation {
    #[must_use]
    pub fn kind(&self) -> ExecutionErrorKind {
        match self {
            Self::Empty => ExecutionErrorKind::EmptyStatement,
            Self::MultiStatement | Self::Mutating { .. } | Self::Unsupported { .. } => {
                ExecutionErrorKind::UnsafeStatement
            }
        }
    }
}

impl Display for GuardrailViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("SQL query is empty; nothing to execute"),
            Self::MultiStatement => f.write_str(
                "multi-statement SQL is not allowed; submit exactly one read-only statement",
            ),
            Self::Mutating { keyword } => {
                write!(f, "write-intent keyword `{keyword}` is not allowed")
            }
            Self::Unsupported { leading_keyword } => write!(
                f,
                "only SELECT and WITH ... SELECT statements are allowed (found `{leading_keyword}`)"
            ),
        }
    }
}

/// Accepts exactly one `SELECT`, `WITH ... SELECT` or `EXPLAIN [QUERY PLAN] SELECT`
/// statement. Literals and quoted identifiers are ignored while scanning for keywords.
pub fn validate_read_only_sql(raw_sql: &str) -> Result<(), GuardrailViolation> {
    let candidate = strip_trailing_semicolons(raw_sql);
    if candidate.is_empty() {
        return Err(GuardrailViolation::Empty);
    }

    let masked = mask_quoted_text(candidate);
    if masked.contains(';') {
        return Err(GuardrailViolation::MultiStatement);
    }

    let normalized = masked.to_ascii_lowercase();
    if let Some(keyword) = first_mutating_keyword(&normalized) {
        return Err(GuardrailViolation::Mutating { keyword });
    }

    let normalized_whitespace = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
    let allowed = normalized_whitespace.starts_with("select")
        || normalized_whitespace.starts_with("with")
        || normalized_whitespace.starts_with("(select")
        || normalized_whitespace.starts_with("explain select")
        || normalized_whitespace.starts_with("explain query plan select");
    if !allowed {
        return Err(GuardrailViolation::Unsupported {
            leading_keyword: leading_keyword(&normalized),
        });
    }

    Ok(())
}

#[must_use]
pub fn strip_trailing_semicolons(raw_sql: &str) -> &str {
    let mut candidate = raw_sql.trim();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate
}

/// Blanks out the contents of string literals, quoted identifiers and comments so that
/// `'drop'` or `"Update Date"` never look like statements.
fn mask_quoted_text(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' => {
                masked.push(ch);
                while let Some(inner) = chars.next() {
                    if inner == ch {
                        if chars.peek() == Some(&ch) {
                            chars.next();
                            masked.push_str("  ");
                            continue;
                        }
                        masked.push(ch);
                        break;
                    }
                    masked.push(' ');
                }
            }
            '[' => {
                masked.push(ch);
                for inner in chars.by_ref() {
                    if inner == ']' {
                        masked.push(inner);
                        break;
                    }
                    masked.push(' ');
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        masked.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = ' ';
                for inner in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
                masked.push(' ');
            }
            _ => masked.push(ch),
        }
    }

    masked
}

fn first_mutating_keyword(normalized_sql: &str) -> Option<String> {
    let mut search_from = 0;
    for token in normalized_sql.split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_') {
        let token_start = normalized_sql[search_from..]
            .find(token)
            .map_or(search_from, |offset| search_from + offset);
        search_from = token_start + token.len();

        if !MUTATING_KEYWORDS.contains(&token) {
            continue;
        }
        // `replace(x, y, z)` is the string function, not `REPLACE INTO`.
        if token == "replace" && normalized_sql[search_from..].trim_start().starts_with('(') {
            continue;
        }
        return Some(token.to_string());
    }
    None
}

fn leading_keyword(normalized_sql: &str) -> String {
    normalized_sql
        .split(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
        .find(|token| !token.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::{GuardrailViolation, validate_read_only_sql};
    use crate::models::ExecutionErrorKind;

    #[test]
    fn allows_select_with_optional_trailing_semicolon() {
        assert!(validate_read_only_sql("SELECT 1").is_ok());
        assert!(validate_read_only_sql("select 1 ; ").is_ok());
    }

    #[test]
    fn allows_with_and_explain_select_forms() {
        assert!(
            validate_read_only_sql("WITH x AS (SELECT 1) SELECT * FROM x").is_ok(),
            "WITH ... SELECT should be allowed"
        );
        assert!(
            validate_read_only_sql("EXPLAIN QUERY PLAN SELECT * FROM customers").is_ok(),
            "EXPLAIN QUERY PLAN SELECT should be allowed"
        );
    }

    #[test]
    fn keywords_inside_literals_and_identifiers_are_ignored() {
        assert!(validate_read_only_sql("SELECT * FROM logs WHERE action = 'DROP TABLE x; --'").is_ok());
        assert!(validate_read_only_sql("SELECT \"Update Date\" FROM events").is_ok());
        assert!(validate_read_only_sql("SELECT REPLACE(Date, '-', '') FROM yearmonth").is_ok());
    }

    #[test]
    fn rejects_empty_multi_statement_and_mutating_sql() {
        let empty = validate_read_only_sql("   ;").expect_err("empty SQL must be rejected");
        assert_eq!(empty, GuardrailViolation::Empty);
        assert_eq!(empty.kind(), ExecutionErrorKind::EmptyStatement);

        let multi = validate_read_only_sql("SELECT 1; SELECT 2")
            .expect_err("multi-statement SQL must be rejected");
        assert_eq!(multi, GuardrailViolation::MultiStatement);
        assert_eq!(multi.kind(), ExecutionErrorKind::UnsafeStatement);

        let mutating = validate_read_only_sql("INSERT INTO t VALUES (1)")
            .expect_err("mutating SQL must be rejected");
        assert_eq!(
            mutating,
            GuardrailViolation::Mutating {
                keyword: "insert".to_string()
            }
        );
        assert!(mutating.to_string().contains("insert"));

        let replace_into = validate_read_only_sql("REPLACE INTO t VALUES (1)")
            .expect_err("REPLACE INTO must be rejected");
        assert_eq!(replace_into.kind(), ExecutionErrorKind::UnsafeStatement);
    }

    #[test]
    fn rejects_explain_non_select_statements() {
        let violation = validate_read_only_sql("EXPLAIN DELETE FROM customers")
            .expect_err("EXPLAIN DELETE should still be rejected");
        assert_eq!(
            violation,
            GuardrailViolation::Mutating {
                keyword: "delete".to_string()
            }
        );
    }

    #[test]
    fn rejects_non_select_leading_keywords() {
        let violation =
            validate_read_only_sql("VALUES (1)").expect_err("VALUES should be rejected");
        assert_eq!(
            violation,
            GuardrailViolation::Unsupported {
                leading_keyword: "values".to_string()
            }
        );
    }
}
