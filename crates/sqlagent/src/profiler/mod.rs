use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;

use crate::error::ProfileError;
use crate::models::{CellValue, ColumnSpec, ForeignKey, SchemaDescription, TableSpec};
use crate::sqlite::{DatabaseHandle, quote_identifier, sqlite_single_quoted};

/// Rows sampled per table while profiling.
pub const SAMPLE_ROW_LIMIT: usize = 3;
const MAX_SAMPLE_VALUE_CHARS: usize = 80;

/// Builds the schema description for `db`. This is the only pipeline step whose failure
/// aborts a run.
pub fn profile_database(db: &DatabaseHandle) -> Result<SchemaDescription, ProfileError> {
    let connection = db.open_read_only()?;
    let schema = profile_connection(&connection, &db.db_id)?;
    tracing::debug!(
        db_id = %db.db_id,
        tables = schema.tables.len(),
        columns = schema.column_count(),
        foreign_keys = schema.foreign_keys.len(),
        "profiled database schema"
    );
    Ok(schema)
}

pub fn profile_connection(
    connection: &Connection,
    db_id: &str,
) -> Result<SchemaDescription, ProfileError> {
    let table_names = load_table_names(connection)?;

    let mut tables = Vec::with_capacity(table_names.len());
    let mut foreign_keys = Vec::new();
    for name in table_names {
        let mut columns = load_columns(connection, &name)?;
        attach_sample_values(connection, &name, &mut columns)?;
        foreign_keys.extend(load_foreign_keys(connection, &name)?);
        tables.push(TableSpec { name, columns });
    }

    Ok(SchemaDescription {
        db_id: db_id.to_string(),
        tables,
        foreign_keys,
    })
}

fn introspection_error(object: &str) -> impl FnOnce(rusqlite::Error) -> ProfileError + '_ {
    move |source| ProfileError::Introspection {
        object: object.to_string(),
        source,
    }
}

fn load_table_names(connection: &Connection) -> Result<Vec<String>, ProfileError> {
    let mut statement = connection
        .prepare(
            "SELECT name
             FROM sqlite_schema
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY rowid ASC",
        )
        .map_err(introspection_error("sqlite_schema"))?;

    let rows = statement
        .query_map([], |row| row.get::<usize, String>(0))
        .map_err(introspection_error("sqlite_schema"))?;

    rows.map(|row| row.map_err(introspection_error("sqlite_schema")))
        .collect()
}

fn load_columns(connection: &Connection, table: &str) -> Result<Vec<ColumnSpec>, ProfileError> {
    let pragma_sql = format!("PRAGMA table_info({})", sqlite_single_quoted(table));
    let mut statement = connection
        .prepare(&pragma_sql)
        .map_err(introspection_error(table))?;

    let rows = statement
        .query_map([], |row| {
            Ok(ColumnSpec {
                name: row.get::<usize, String>(1)?,
                declared_type: row.get::<usize, Option<String>>(2)?.unwrap_or_default(),
                primary_key: row.get::<usize, i64>(5)? > 0,
                sample_values: Vec::new(),
            })
        })
        .map_err(introspection_error(table))?;

    rows.map(|row| row.map_err(introspection_error(table)))
        .collect()
}

fn attach_sample_values(
    connection: &Connection,
    table: &str,
    columns: &mut [ColumnSpec],
) -> Result<(), ProfileError> {
    let sample_sql = format!(
        "SELECT * FROM {} LIMIT {SAMPLE_ROW_LIMIT}",
        quote_identifier(table)
    );
    let mut statement = connection
        .prepare(&sample_sql)
        .map_err(introspection_error(table))?;
    let width = statement.column_count().min(columns.len());

    let mut rows = statement.query([]).map_err(introspection_error(table))?;
    while let Some(row) = rows.next().map_err(introspection_error(table))? {
        for (index, column) in columns.iter_mut().enumerate().take(width) {
            let value = row
                .get::<usize, SqlValue>(index)
                .map_err(introspection_error(table))?;
            column
                .sample_values
                .push(render_sample(&CellValue::from(value)));
        }
    }

    Ok(())
}

fn render_sample(value: &CellValue) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() <= MAX_SAMPLE_VALUE_CHARS {
        return rendered;
    }
    let mut truncated = rendered
        .chars()
        .take(MAX_SAMPLE_VALUE_CHARS)
        .collect::<String>();
    truncated.push_str("...");
    truncated
}

fn load_foreign_keys(connection: &Connection, table: &str) -> Result<Vec<ForeignKey>, ProfileError> {
    let pragma_sql = format!("PRAGMA foreign_key_list({})", sqlite_single_quoted(table));
    let mut statement = connection
        .prepare(&pragma_sql)
        .map_err(introspection_error(table))?;

    let rows = statement
        .query_map([], |row| {
            Ok(ForeignKey {
                table: table.to_string(),
                ref_table: row.get::<usize, String>(2)?,
                column: row.get::<usize, String>(3)?,
                ref_column: row.get::<usize, Option<String>>(4)?.unwrap_or_default(),
            })
        })
        .map_err(introspection_error(table))?;

    rows.map(|row| row.map_err(introspection_error(table)))
        .collect()
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::profile_connection;

    #[test]
    fn profiles_tables_columns_samples_and_foreign_keys() {
        let connection = Connection::open_in_memory().expect("in-memory sqlite should open");
        connection
            .execute_batch(
                "CREATE TABLE customers (CustomerID INTEGER PRIMARY KEY, Currency TEXT);
                 CREATE TABLE transactions_1k (
                     TransactionID INTEGER PRIMARY KEY,
                     CustomerID INTEGER REFERENCES customers(CustomerID),
                     Amount REAL
                 );
                 INSERT INTO customers VALUES (1, 'EUR'), (2, 'CZK'), (3, 'CZK'), (4, NULL);
                 INSERT INTO transactions_1k VALUES (10, 1, 12.5);",
            )
            .expect("fixture schema should apply");

        let schema = profile_connection(&connection, "debit").expect("profile should succeed");

        assert_eq!(schema.db_id, "debit");
        assert_eq!(
            schema
                .tables
                .iter()
                .map(|table| table.name.as_str())
                .collect::<Vec<_>>(),
            vec!["customers", "transactions_1k"]
        );
        let customers = schema.table("customers").expect("customers should exist");
        assert!(customers.columns[0].primary_key);
        assert_eq!(customers.columns[1].declared_type, "TEXT");
        assert_eq!(customers.columns[1].sample_values, vec!["EUR", "CZK", "CZK"]);

        assert_eq!(schema.foreign_keys.len(), 1);
        let key = &schema.foreign_keys[0];
        assert_eq!(
            (key.table.as_str(), key.column.as_str()),
            ("transactions_1k", "CustomerID")
        );
        assert_eq!(
            (key.ref_table.as_str(), key.ref_column.as_str()),
            ("customers", "CustomerID")
        );
    }
}
