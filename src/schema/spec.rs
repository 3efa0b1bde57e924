//! Table specification types.
//!
//! A [`TableSpec`] describes one queryable view over a raw `(id, proto)`
//! table: which paths become columns, which columns get automatic indexes,
//! and any composite indexes beyond those. Specs are plain values supplied by
//! the caller at every setup call.

use crate::error::{Error, Result};

/// Declared SQL type of a view column.
///
/// The extraction function is opaque to the query planner, so the generator
/// wraps every column expression in an explicit `CAST` to this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Blob,
}

impl ColumnType {
    /// Returns the SQLite type name used in generated SQL.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Blob => "BLOB",
        }
    }
}

/// Whether a column is expected to select rows on its own.
///
/// Strong selectors (the default) get an automatic index on their extraction
/// expression. Weak selectors don't, though they may still appear in explicit
/// [`IndexSpec`]s. It's easier to drop an index than to build one late, so
/// when in doubt leave a column strong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selector {
    #[default]
    Strong,
    Weak,
}

/// One view column extracted from the row's protobuf blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// View column name.
    pub name: String,

    /// Declared SQL type for the `CAST` around the extraction.
    pub sql_type: ColumnType,

    /// Path passed to `protobuf_extract`.
    pub path: String,

    /// Index strength; strong columns are indexed automatically.
    pub selector: Selector,
}

impl ColumnSpec {
    /// Creates a strong-selector column.
    pub fn new(name: impl Into<String>, sql_type: ColumnType, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type,
            path: path.into(),
            selector: Selector::Strong,
        }
    }

    /// Marks the column as a weak selector (no automatic index).
    pub fn weak(mut self) -> Self {
        self.selector = Selector::Weak;
        self
    }
}

/// An additional composite index on the raw table.
///
/// Components naming a view column are replaced with that column's extraction
/// expression; anything else passes through verbatim as a SQL expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Distinguishing suffix in the generated index name.
    pub name_suffix: String,

    /// Ordered component list (column names or literal SQL expressions).
    pub components: Vec<String>,
}

impl IndexSpec {
    pub fn new(name_suffix: impl Into<String>, components: Vec<String>) -> Self {
        Self {
            name_suffix: name_suffix.into(),
            components,
        }
    }
}

/// A complete proto table description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// View name; the backing raw table is `<name>_raw`.
    pub name: String,

    /// Fully qualified protobuf type of every row's blob.
    pub message_type: String,

    /// View columns, in declaration order.
    pub columns: Vec<ColumnSpec>,

    /// Additional composite indexes.
    pub indexes: Vec<IndexSpec>,

    /// Log the generated SQL when the setup script is first built.
    pub log_sql: bool,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_type: message_type.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            log_sql: false,
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn log_sql(mut self, log_sql: bool) -> Self {
        self.log_sql = log_sql;
        self
    }

    /// Checks the structural invariants before any SQL is generated.
    ///
    /// Names are interpolated into DDL, so everything that names a catalog
    /// object must be a plain identifier; column names must be unique and
    /// must not shadow the two raw columns.
    pub fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return self.invalid("table name is not a valid identifier");
        }
        if self.message_type.is_empty() {
            return self.invalid("message type name is empty");
        }

        for (i, column) in self.columns.iter().enumerate() {
            if !is_identifier(&column.name) {
                return self.invalid(format!("column '{}' is not a valid identifier", column.name));
            }
            if column.name == "id" || column.name == "proto" {
                return self.invalid(format!("column '{}' collides with a raw column", column.name));
            }
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return self.invalid(format!("duplicate column '{}'", column.name));
            }
        }

        for index in &self.indexes {
            if !is_identifier(&index.name_suffix) {
                return self.invalid(format!(
                    "index suffix '{}' is not a valid identifier",
                    index.name_suffix
                ));
            }
            if index.components.is_empty() {
                return self.invalid(format!("index '{}' has no components", index.name_suffix));
            }
        }

        Ok(())
    }

    fn invalid(&self, reason: impl Into<String>) -> Result<()> {
        Err(Error::InvalidSpec {
            table: self.name.clone(),
            reason: reason.into(),
        })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
