use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::error::ProfileError;

pub const DATABASE_FILE_EXTENSION: &str = "sqlite";

/// Location of one target database. Every execution opens its own connection from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHandle {
    pub db_id: String,
    pub path: PathBuf,
}

impl DatabaseHandle {
    #[must_use]
    pub fn new(db_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            db_id: db_id.into(),
            path: path.into(),
        }
    }

    /// Resolves `<db_root>/<db_id>/<db_id>.sqlite`.
    #[must_use]
    pub fn from_root(db_root: &Path, db_id: &str) -> Self {
        let path = db_root
            .join(db_id)
            .join(format!("{db_id}.{DATABASE_FILE_EXTENSION}"));
        Self::new(db_id, path)
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Opens a read-only connection. Never creates the file.
    pub fn open_read_only(&self) -> Result<Connection, ProfileError> {
        if !self.exists() {
            return Err(ProfileError::Missing {
                path: self.path.clone(),
            });
        }

        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| ProfileError::Open {
            path: self.path.clone(),
            source,
        })
    }
}

#[must_use]
pub fn sqlite_single_quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[must_use]
pub fn quote_identifier(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}
