use std::sync::OnceLock;

use regex::Regex;

use crate::validator::strip_trailing_semicolons;

/// Pulls the SQL statement out of free-form service output.
///
/// Preference order: the last ```sql fenced block, then the last untagged fence whose body
/// starts with `SELECT`/`WITH`, then a line scan from the first `SELECT`/`WITH` line up to
/// the line that ends with `;`.
#[must_use]
pub fn extract_sql(text: &str) -> Option<String> {
    let fenced = sql_fence_regex()
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|body| body.as_str())
        .filter(|body| !body.trim().is_empty())
        .last();
    if let Some(body) = fenced {
        return finish(body);
    }

    let generic = any_fence_regex()
        .captures_iter(text)
        .filter_map(|captures| captures.get(1))
        .map(|body| body.as_str())
        .filter(|body| starts_with_query_keyword(body.trim_start()))
        .last();
    if let Some(body) = generic {
        return finish(body);
    }

    scan_lines(text)
}

fn scan_lines(text: &str) -> Option<String> {
    let mut collected = Vec::new();
    for line in text.lines().map(str::trim) {
        if collected.is_empty() && !starts_with_query_keyword(line) {
            continue;
        }
        if line.starts_with("```") {
            break;
        }
        collected.push(line);
        if line.ends_with(';') {
            break;
        }
    }

    if collected.is_empty() {
        return None;
    }
    finish(&collected.join(" "))
}

fn finish(body: &str) -> Option<String> {
    let sql = strip_trailing_semicolons(body);
    (!sql.is_empty()).then(|| sql.to_string())
}

fn starts_with_query_keyword(line: &str) -> bool {
    query_start_regex().is_match(line)
}

fn sql_fence_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?is)```[ \t]*(?:sqlite|sql)\b[ \t]*\r?\n?(.*?)```")
            .expect("sql fence regex should compile")
    })
}

fn any_fence_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").expect("fence regex should compile")
    })
}

fn query_start_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)^(?:select|with)\b").expect("query start regex should compile")
    })
}

#[cfg(test)]
mod tests {
    use super::extract_sql;

    #[test]
    fn prefers_the_last_sql_fence() {
        let text = "Sub-question 1: count EUR\n```sql\nSELECT COUNT(*) FROM customers WHERE Currency = 'EUR'\n```\nFinal:\n```SQL\nSELECT 1;\n```";
        assert_eq!(extract_sql(text).as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn accepts_an_untagged_fence_that_holds_a_query() {
        let text = "Here you go:\n```\nWITH t AS (SELECT 1 AS x) SELECT x FROM t\n```";
        assert_eq!(
            extract_sql(text).as_deref(),
            Some("WITH t AS (SELECT 1 AS x) SELECT x FROM t")
        );
    }

    #[test]
    fn falls_back_to_a_line_scan_ending_at_semicolon() {
        let text = "The query is\nSELECT Currency\nFROM customers\nWHERE CustomerID = 3;\nThat is all.";
        assert_eq!(
            extract_sql(text).as_deref(),
            Some("SELECT Currency FROM customers WHERE CustomerID = 3")
        );
    }

    #[test]
    fn returns_none_without_any_query() {
        assert_eq!(extract_sql("I cannot answer that."), None);
        assert_eq!(extract_sql("```sql\n   \n```"), None);
        assert_eq!(extract_sql("```python\nprint('hi')\n```"), None);
    }
}
