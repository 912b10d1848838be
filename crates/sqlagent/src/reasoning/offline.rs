use super::{CompletionRequest, ReasoningService};
use crate::error::ServiceError;
use crate::models::Stage;

const EUR_CZK_RATIO_SQL: &str = "SELECT CAST(SUM(CASE WHEN Currency = 'EUR' THEN 1 ELSE 0 END) AS FLOAT) / SUM(CASE WHEN Currency = 'CZK' THEN 1 ELSE 0 END) AS ratio FROM customers";

/// Deterministic keyword-driven backend that answers without a model.
///
/// It reads the question and table names out of the stage input, so it exercises the
/// whole pipeline for demos and smoke runs without network access.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineService;

impl ReasoningService for OfflineService {
    fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        let question = section_line(&request.input, "QUESTION:").unwrap_or_default();
        let tables = schema_tables(&request.input);
        let table = pick_table(&question, &tables);

        let response = match request.stage {
            Stage::Selector => match table {
                Some(table) => format!("{table}: *"),
                None => String::new(),
            },
            Stage::Decomposer => format!(
                "COMPLEXITY: simple\n```sql\n{}\n```",
                heuristic_sql(&question, table)
            ),
            Stage::Refiner => {
                let fallback = table.map_or_else(
                    || "SELECT 1".to_string(),
                    |table| format!("SELECT * FROM {table} LIMIT 5"),
                );
                format!("```sql\n{fallback}\n```")
            }
        };
        Ok(response)
    }

    fn name(&self) -> &str {
        "offline"
    }
}

fn section_line(input: &str, label: &str) -> Option<String> {
    input
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .map(|rest| rest.trim().to_string())
}

fn schema_tables(input: &str) -> Vec<&str> {
    input
        .lines()
        .filter_map(|line| line.strip_prefix("Table: "))
        .map(str::trim)
        .collect()
}

fn pick_table<'a>(question: &str, tables: &[&'a str]) -> Option<&'a str> {
    let lowered = question.to_ascii_lowercase();
    tables
        .iter()
        .find(|table| lowered.contains(&table.to_ascii_lowercase()))
        .or_else(|| {
            tables
                .iter()
                .find(|table| table.eq_ignore_ascii_case("customers"))
        })
        .or_else(|| tables.first())
        .copied()
}

fn heuristic_sql(question: &str, table: Option<&str>) -> String {
    let lowered = question.to_ascii_lowercase();
    let table = table.unwrap_or("customers");

    if lowered.contains("ratio") && lowered.contains("eur") && lowered.contains("czk") {
        EUR_CZK_RATIO_SQL.to_string()
    } else if lowered.contains("count") || lowered.contains("how many") {
        format!("SELECT COUNT(*) FROM {table}")
    } else {
        format!("SELECT * FROM {table} LIMIT 5")
    }
}
