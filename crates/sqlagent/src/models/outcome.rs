use std::fmt::{Display, Formatter};

use rusqlite::types::Value as SqlValue;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Null,
    Integer(i64),
    /// Infinities and NaN are written as the strings `inf`, `-inf` and `nan`.
    Real(
        #[serde(with = "real_cell")]
        #[schemars(with = "RealRepr")]
        f64,
    ),
    Text(String),
    /// Lowercase hex encoding of the blob bytes.
    Blob(String),
}

impl From<SqlValue> for CellValue {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => Self::Null,
            SqlValue::Integer(value) => Self::Integer(value),
            SqlValue::Real(value) => Self::Real(value),
            SqlValue::Text(value) => Self::Text(value),
            SqlValue::Blob(value) => Self::Blob(encode_blob_hex(&value)),
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
            Self::Blob(value) => write!(f, "x'{value}'"),
        }
    }
}

/// Wire form of a real cell. JSON numbers cannot carry non-finite values.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
enum RealRepr {
    Finite(f64),
    NonFinite(NonFiniteReal),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
enum NonFiniteReal {
    #[serde(rename = "inf")]
    Infinity,
    #[serde(rename = "-inf")]
    NegativeInfinity,
    #[serde(rename = "nan")]
    NotANumber,
}

mod real_cell {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::{NonFiniteReal, RealRepr};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        let repr = if value.is_nan() {
            RealRepr::NonFinite(NonFiniteReal::NotANumber)
        } else if *value == f64::INFINITY {
            RealRepr::NonFinite(NonFiniteReal::Infinity)
        } else if *value == f64::NEG_INFINITY {
            RealRepr::NonFinite(NonFiniteReal::NegativeInfinity)
        } else {
            RealRepr::Finite(*value)
        };
        repr.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(match RealRepr::deserialize(deserializer)? {
            RealRepr::Finite(value) => value,
            RealRepr::NonFinite(NonFiniteReal::Infinity) => f64::INFINITY,
            RealRepr::NonFinite(NonFiniteReal::NegativeInfinity) => f64::NEG_INFINITY,
            RealRepr::NonFinite(NonFiniteReal::NotANumber) => f64::NAN,
        })
    }
}

fn encode_blob_hex(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push(HEX[(byte >> 4) as usize] as char);
        output.push(HEX[(byte & 0x0f) as usize] as char);
    }
    output
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// SQLite rejected or failed the statement.
    Database,
    /// The statement was refused before execution because it is not read-only.
    UnsafeStatement,
    /// There was no SQL to run (sentinel candidate).
    EmptyStatement,
    /// The database file could not be opened.
    DatabaseUnavailable,
}

impl ExecutionErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::UnsafeStatement => "unsafe_statement",
            Self::EmptyStatement => "empty_statement",
            Self::DatabaseUnavailable => "database_unavailable",
        }
    }
}

/// Result of running one SQL text once. Produced fresh for every execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success {
        columns: Vec<String>,
        rows: Vec<Vec<CellValue>>,
    },
    ExecutionError {
        kind: ExecutionErrorKind,
        message: String,
    },
    Timeout {
        budget_ms: u64,
    },
}

impl ExecutionOutcome {
    #[must_use]
    pub fn error(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self::ExecutionError {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::ExecutionError { .. } => "execution_error",
            Self::Timeout { .. } => "timeout",
        }
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::ExecutionError { message, .. } => Some(message),
            Self::Success { .. } | Self::Timeout { .. } => None,
        }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        match self {
            Self::Success { rows, .. } => rows.len(),
            Self::ExecutionError { .. } | Self::Timeout { .. } => 0,
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Success { columns, rows } => {
                format!("success rows={} columns={}", rows.len(), columns.len())
            }
            Self::ExecutionError { kind, message } => {
                format!("execution_error({}): {message}", kind.as_str())
            }
            Self::Timeout { budget_ms } => format!("timeout budget_ms={budget_ms}"),
        }
    }
}
