//! Identity of an analyzable object (table or partition).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::result::AppResult;

/// A table, or one partition of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentity {
    /// Schema (database) name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Partition name, when the object is a single partition.
    pub partition: Option<String>,
}

impl TableIdentity {
    /// Identity of a whole table.
    pub fn table(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            partition: None,
        }
    }

    /// Identity of one partition of a table.
    pub fn partition(
        schema: impl Into<String>,
        table: impl Into<String>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            partition: Some(partition.into()),
        }
    }

    /// Unique scheduling key: `schema.table` or `schema.table.partition`.
    ///
    /// A name containing `.` or `"` is double-quoted with embedded quotes
    /// doubled, so `app.orders.p1` (a partition) and `app."orders.p1"`
    /// (a table) stay distinct.
    pub fn key(&self) -> String {
        let mut key = key_part(&self.schema);
        key.push('.');
        key.push_str(&key_part(&self.table));
        if let Some(partition) = &self.partition {
            key.push('.');
            key.push_str(&key_part(partition));
        }
        key
    }

    /// The relation that actually gets analyzed: the partition if present,
    /// otherwise the table.
    pub fn target_relation(&self) -> &str {
        self.partition.as_deref().unwrap_or(&self.table)
    }

    /// Reject empty names.
    pub fn validate(&self) -> AppResult<()> {
        if self.schema.trim().is_empty() {
            return Err(AppError::validation(format!(
                "Object '{}' has an empty schema name",
                self.key()
            )));
        }
        if self.table.trim().is_empty() {
            return Err(AppError::validation(format!(
                "Object '{}' has an empty table name",
                self.key()
            )));
        }
        if matches!(&self.partition, Some(p) if p.trim().is_empty()) {
            return Err(AppError::validation(format!(
                "Object '{}' has an empty partition name",
                self.key()
            )));
        }
        Ok(())
    }
}

fn key_part(name: &str) -> String {
    if name.contains(['.', '"']) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            Some(partition) => write!(
                f,
                "{}.{} partition {}",
                self.schema, self.table, partition
            ),
            None => write!(f, "{}.{}", self.schema, self.table),
        }
    }
}
