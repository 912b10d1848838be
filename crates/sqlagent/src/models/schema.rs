use std::collections::BTreeMap;
use std::fmt::Write as _;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Number of sample rows shown per table when a schema is rendered for a prompt.
pub const RENDERED_SAMPLE_ROWS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnSpec {
    pub name: String,
    pub declared_type: String,

    #[serde(default)]
    pub primary_key: bool,

    /// One rendered value per sampled row, aligned across the columns of a table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns
            .iter()
            .find(|column| column.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn sample_row_count(&self) -> usize {
        self.columns
            .iter()
            .map(|column| column.sample_values.len())
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

impl ForeignKey {
    #[must_use]
    pub fn connects(&self, left: &str, right: &str) -> bool {
        (self.table.eq_ignore_ascii_case(left) && self.ref_table.eq_ignore_ascii_case(right))
            || (self.table.eq_ignore_ascii_case(right) && self.ref_table.eq_ignore_ascii_case(left))
    }
}

/// Full description of one database, built once per handle by the profiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaDescription {
    pub db_id: String,
    pub tables: Vec<TableSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,
}

impl SchemaDescription {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables
            .iter()
            .find(|table| table.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|table| table.columns.len()).sum()
    }

    #[must_use]
    pub fn render(&self) -> String {
        render_schema(self.tables.iter(), &self.foreign_keys)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    MentionedByService,
    ColumnMentioned,
    PrimaryKey,
    JoinKey,
    AllColumnsKept,
    FullSchemaFallback,
}

impl SelectionReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MentionedByService => "mentioned_by_service",
            Self::ColumnMentioned => "column_mentioned",
            Self::PrimaryKey => "primary_key",
            Self::JoinKey => "join_key",
            Self::AllColumnsKept => "all_columns_kept",
            Self::FullSchemaFallback => "full_schema_fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReducedTable {
    pub spec: TableSpec,
    pub reason: SelectionReason,
    pub column_reasons: BTreeMap<String, SelectionReason>,
}

/// Subset of a [`SchemaDescription`] judged relevant to one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReducedSchema {
    pub db_id: String,
    pub tables: Vec<ReducedTable>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKey>,

    pub fallback: bool,
}

impl ReducedSchema {
    /// Keeps every table and column; used when selection fails or comes back empty.
    #[must_use]
    pub fn full(schema: &SchemaDescription) -> Self {
        let tables = schema
            .tables
            .iter()
            .map(|table| ReducedTable {
                spec: table.clone(),
                reason: SelectionReason::FullSchemaFallback,
                column_reasons: table
                    .columns
                    .iter()
                    .map(|column| (column.name.clone(), SelectionReason::FullSchemaFallback))
                    .collect(),
            })
            .collect();

        Self {
            db_id: schema.db_id.clone(),
            tables,
            foreign_keys: schema.foreign_keys.clone(),
            fallback: true,
        }
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        self.tables
            .iter()
            .map(|table| table.spec.name.as_str())
            .collect()
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|table| table.spec.columns.len()).sum()
    }

    /// True when every kept table and column exists in `schema` with the same definition.
    #[must_use]
    pub fn is_subset_of(&self, schema: &SchemaDescription) -> bool {
        if self.db_id != schema.db_id {
            return false;
        }

        let tables_ok = self.tables.iter().all(|reduced| {
            schema.table(&reduced.spec.name).is_some_and(|full| {
                reduced
                    .spec
                    .columns
                    .iter()
                    .all(|column| full.columns.contains(column))
            })
        });
        let keys_ok = self
            .foreign_keys
            .iter()
            .all(|key| schema.foreign_keys.contains(key));

        tables_ok && keys_ok
    }

    #[must_use]
    pub fn render(&self) -> String {
        render_schema(
            self.tables.iter().map(|table| &table.spec),
            &self.foreign_keys,
        )
    }

    #[must_use]
    pub fn summary(&self) -> String {
        let tables = self.table_names().join(",");
        format!(
            "tables={} columns={} fallback={}",
            if tables.is_empty() {
                "none"
            } else {
                tables.as_str()
            },
            self.column_count(),
            self.fallback
        )
    }
}

fn render_schema<'a>(
    tables: impl Iterator<Item = &'a TableSpec>,
    foreign_keys: &[ForeignKey],
) -> String {
    let mut rendered = String::from("DATABASE SCHEMA:\n");

    for table in tables {
        let _ = writeln!(rendered, "Table: {}", table.name);
        rendered.push_str("Columns:\n");
        for column in &table.columns {
            let declared_type = if column.declared_type.is_empty() {
                "unknown"
            } else {
                column.declared_type.as_str()
            };
            let marker = if column.primary_key { ", primary key" } else { "" };
            let _ = writeln!(rendered, "  - {} ({declared_type}{marker})", column.name);
        }

        let sample_rows = table.sample_row_count().min(RENDERED_SAMPLE_ROWS);
        if sample_rows > 0 {
            rendered.push_str("Sample data:\n");
            for row in 0..sample_rows {
                let cells = table
                    .columns
                    .iter()
                    .filter_map(|column| {
                        column
                            .sample_values
                            .get(row)
                            .map(|value| format!("{}={value}", column.name))
                    })
                    .collect::<Vec<_>>();
                let _ = writeln!(rendered, "  {}", cells.join(", "));
            }
        }
        rendered.push('\n');
    }

    if !foreign_keys.is_empty() {
        rendered.push_str("Foreign Keys:\n");
        for key in foreign_keys {
            let _ = writeln!(
                rendered,
                "  {}.{} -> {}.{}",
                key.table, key.column, key.ref_table, key.ref_column
            );
        }
    }

    rendered
}

#[cfg(test)]
mod tests {
    use super::{ColumnSpec, ForeignKey, ReducedSchema, SchemaDescription, TableSpec};

    fn column(name: &str, declared_type: &str, samples: &[&str]) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            declared_type: declared_type.to_string(),
            primary_key: name == "CustomerID",
            sample_values: samples.iter().map(ToString::to_string).collect(),
        }
    }

    fn sample_schema() -> SchemaDescription {
        SchemaDescription {
            db_id: "debit_card_specializing".to_string(),
            tables: vec![
                TableSpec {
                    name: "customers".to_string(),
                    columns: vec![
                        column("CustomerID", "INTEGER", &["3", "5", "6"]),
                        column("Currency", "TEXT", &["EUR", "CZK", "CZK"]),
                    ],
                },
                TableSpec {
                    name: "yearmonth".to_string(),
                    columns: vec![
                        column("CustomerID", "INTEGER", &[]),
                        column("Consumption", "REAL", &[]),
                    ],
                },
            ],
            foreign_keys: vec![ForeignKey {
                table: "yearmonth".to_string(),
                column: "CustomerID".to_string(),
                ref_table: "customers".to_string(),
                ref_column: "CustomerID".to_string(),
            }],
        }
    }

    #[test]
    fn render_lists_tables_two_sample_rows_and_foreign_keys() {
        let rendered = sample_schema().render();

        assert!(rendered.starts_with("DATABASE SCHEMA:\nTable: customers\n"));
        assert!(rendered.contains("  - CustomerID (INTEGER, primary key)\n"));
        assert!(rendered.contains("  CustomerID=3, Currency=EUR\n"));
        assert!(rendered.contains("  CustomerID=5, Currency=CZK\n"));
        assert!(!rendered.contains("CustomerID=6"), "only two sample rows render");
        assert!(rendered.contains("  yearmonth.CustomerID -> customers.CustomerID\n"));
    }

    #[test]
    fn full_reduction_is_a_subset_and_marked_fallback() {
        let schema = sample_schema();
        let reduced = ReducedSchema::full(&schema);

        assert!(reduced.fallback);
        assert!(reduced.is_subset_of(&schema));
        assert_eq!(reduced.table_names(), vec!["customers", "yearmonth"]);
        assert_eq!(reduced.column_count(), 4);
    }

    #[test]
    fn subset_check_rejects_foreign_columns() {
        let schema = sample_schema();
        let mut reduced = ReducedSchema::full(&schema);
        reduced.tables[0].spec.columns.push(column("Segment", "TEXT", &[]));

        assert!(!reduced.is_subset_of(&schema));
    }
}
