use std::collections::{BTreeMap, BTreeSet};

use super::{QuestionInput, StageContext};
use crate::error::StageError;
use crate::models::{
    ColumnSpec, ReducedSchema, ReducedTable, SchemaDescription, SelectionReason, Stage, TableSpec,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub reduced: ReducedSchema,
    pub raw_output: String,
}

/// Asks the service which tables and columns matter for `question`.
///
/// Names the service mentions are matched against `schema`; anything that does not exist
/// there is dropped. An empty match is [`StageError::EmptySelection`].
pub fn select(
    context: &StageContext<'_>,
    question: &QuestionInput,
    schema: &SchemaDescription,
) -> Result<Selection, StageError> {
    let input = format!(
        "{}\n{}\nIdentify only the tables and columns needed to answer this question.",
        question.render(),
        schema.render()
    );
    let raw_output = context.call_service(Stage::Selector, input)?;
    let reduced = parse_selection(&raw_output, schema)?;
    Ok(Selection {
        reduced,
        raw_output,
    })
}

/// Builds the reduced schema from free-form selector output.
///
/// A table is kept when its name appears as a whole identifier. Its columns are the ones
/// named on the lines that mention the table (or qualified as `table.column` anywhere),
/// plus primary keys and join keys towards other kept tables. A kept table with no named
/// columns keeps all of them.
pub fn parse_selection(
    output: &str,
    schema: &SchemaDescription,
) -> Result<ReducedSchema, StageError> {
    let lowered = output.to_lowercase();
    let kept_tables = schema
        .tables
        .iter()
        .filter(|table| contains_identifier(&lowered, &table.name.to_lowercase()))
        .collect::<Vec<_>>();
    if kept_tables.is_empty() {
        return Err(StageError::EmptySelection);
    }

    let kept_names = kept_tables
        .iter()
        .map(|table| table.name.to_lowercase())
        .collect::<BTreeSet<_>>();
    let foreign_keys = schema
        .foreign_keys
        .iter()
        .filter(|key| {
            kept_names.contains(&key.table.to_lowercase())
                && kept_names.contains(&key.ref_table.to_lowercase())
        })
        .cloned()
        .collect::<Vec<_>>();

    let tables = kept_tables
        .into_iter()
        .map(|table| {
            let join_keys = foreign_keys
                .iter()
                .flat_map(|key| {
                    let mut columns = Vec::with_capacity(2);
                    if key.table.eq_ignore_ascii_case(&table.name) {
                        columns.push(key.column.to_lowercase());
                    }
                    if key.ref_table.eq_ignore_ascii_case(&table.name) {
                        columns.push(key.ref_column.to_lowercase());
                    }
                    columns
                })
                .collect::<BTreeSet<_>>();
            reduce_table(table, &lowered, &join_keys)
        })
        .collect();

    Ok(ReducedSchema {
        db_id: schema.db_id.clone(),
        tables,
        foreign_keys,
        fallback: false,
    })
}

fn reduce_table(table: &TableSpec, lowered_output: &str, join_keys: &BTreeSet<String>) -> ReducedTable {
    let table_name = table.name.to_lowercase();
    let table_lines = lowered_output
        .lines()
        .filter(|line| contains_identifier(line, &table_name))
        .collect::<Vec<_>>();

    let mentioned = table
        .columns
        .iter()
        .filter(|column| {
            let column_name = column.name.to_lowercase();
            let qualified = format!("{table_name}.{column_name}");
            lowered_output.contains(&qualified)
                || table_lines
                    .iter()
                    .any(|line| contains_identifier(&line.replace(&table_name, " "), &column_name))
        })
        .map(|column| column.name.to_lowercase())
        .collect::<BTreeSet<_>>();

    let mut column_reasons = BTreeMap::new();
    let columns = if mentioned.is_empty() {
        for column in &table.columns {
            column_reasons.insert(column.name.clone(), SelectionReason::AllColumnsKept);
        }
        table.columns.clone()
    } else {
        table
            .columns
            .iter()
            .filter_map(|column| {
                let reason = column_reason(column, &mentioned, join_keys)?;
                column_reasons.insert(column.name.clone(), reason);
                Some(column.clone())
            })
            .collect()
    };

    ReducedTable {
        spec: TableSpec {
            name: table.name.clone(),
            columns,
        },
        reason: SelectionReason::MentionedByService,
        column_reasons,
    }
}

fn column_reason(
    column: &ColumnSpec,
    mentioned: &BTreeSet<String>,
    join_keys: &BTreeSet<String>,
) -> Option<SelectionReason> {
    let name = column.name.to_lowercase();
    if mentioned.contains(&name) {
        Some(SelectionReason::ColumnMentioned)
    } else if join_keys.contains(&name) {
        Some(SelectionReason::JoinKey)
    } else if column.primary_key {
        Some(SelectionReason::PrimaryKey)
    } else {
        None
    }
}

/// Whole-identifier containment: `customers` does not match inside `customers_2`.
fn contains_identifier(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_identifier_char) && !after.is_some_and(is_identifier_char)
    })
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
