//! SQL script generation for proto tables.
//!
//! A pure compiler from [`TableSpec`] to the DDL that realizes it: the raw
//! table, the view, the INSTEAD OF triggers, the functional indexes, and the
//! query that lists indexes left behind by earlier specs. Output is
//! deterministic, so generating twice for the same spec yields identical
//! text, and index names move only when the underlying expressions move.

use xxhash_rust::xxh3::xxh3_128;

use crate::error::Result;
use crate::schema::spec::{IndexSpec, Selector, TableSpec};

/// The generated setup script for one table spec.
///
/// `schema_sql` is the idempotent DDL batch; `stale_index_sql` is the query
/// that names every `proto_[auto]index__` index on the raw table that this
/// spec did not produce. They are separate statements because the engine's
/// batch execution cannot hand back result rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableScript {
    pub schema_sql: String,
    pub stale_index_sql: String,
    /// Index names the script creates, in emission order.
    pub index_names: Vec<String>,
}

/// Escapes a string for inclusion in a single-quoted SQL literal.
pub(crate) fn escape_sql_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Fingerprints an index expression for content-addressed naming.
///
/// The digest is what makes index names change whenever a column's path or
/// declared type changes, which in turn is the staleness signal.
fn fingerprint(expression: &str) -> String {
    hex::encode(xxh3_128(expression.as_bytes()).to_be_bytes())
}

struct ViewColumn {
    name: String,
    expression: String,
    auto_index: bool,
}

fn column_expressions(spec: &TableSpec) -> Vec<ViewColumn> {
    spec.columns
        .iter()
        .map(|column| ViewColumn {
            name: column.name.clone(),
            expression: format!(
                "CAST(protobuf_extract(proto, '{}', '{}', NULL) AS {})",
                escape_sql_literal(&spec.message_type),
                escape_sql_literal(&column.path),
                column.sql_type.sql_type()
            ),
            auto_index: column.selector == Selector::Strong,
        })
        .collect()
}

/// Builds one `CREATE INDEX IF NOT EXISTS` statement and its computed name.
///
/// Components naming a view column expand to that column's extraction
/// expression; anything else is passed through verbatim.
fn create_index(
    table: &str,
    columns: &[ViewColumn],
    index: &IndexSpec,
    auto_index: bool,
) -> (String, String) {
    let expression = index
        .components
        .iter()
        .map(|component| {
            columns
                .iter()
                .find(|column| &column.name == component)
                .map_or(component.as_str(), |column| column.expression.as_str())
        })
        .map(|expr| format!("\n  {expr}"))
        .collect::<Vec<_>>()
        .join(",");

    let name = format!(
        "proto_{}index__{}__{}__{}",
        if auto_index { "auto" } else { "" },
        table,
        index.name_suffix,
        fingerprint(&expression)
    );

    let statement = format!("CREATE INDEX IF NOT EXISTS {name}\nON {table}_raw({expression}\n);");
    (name, statement)
}

/// Generates the full setup script for `spec`.
///
/// The raw table is only ever created, never dropped; the view and triggers
/// are dropped and recreated since they hold no data. Index statements reuse
/// any index that already exists under the same content-addressed name.
pub fn generate(spec: &TableSpec) -> Result<TableScript> {
    spec.validate()?;

    let table = &spec.name;
    let columns = column_expressions(spec);

    let create_raw = format!(
        "CREATE TABLE IF NOT EXISTS {table}_raw (\n  id INTEGER PRIMARY KEY ASC NOT NULL,\n  proto BLOB NOT NULL\n);"
    );

    let column_names: String = columns
        .iter()
        .map(|c| format!(",\n  {}", c.name))
        .collect();
    let column_exprs: String = columns
        .iter()
        .map(|c| format!(",\n  {}", c.expression))
        .collect();

    let create_view = format!(
        "DROP VIEW IF EXISTS {table};\n\
         CREATE VIEW {table} (\n  id,\n  proto{column_names}\n) AS SELECT\n  id,\n  proto{column_exprs}\nFROM {table}_raw;"
    );

    let create_triggers = format!(
        "DROP TRIGGER IF EXISTS {table}_insert;\n\
         CREATE TRIGGER {table}_insert INSTEAD OF INSERT ON {table}\n\
         BEGIN\n  INSERT INTO {table}_raw(proto) VALUES(NEW.proto);\nEND;\n\
         DROP TRIGGER IF EXISTS {table}_update;\n\
         CREATE TRIGGER {table}_update INSTEAD OF UPDATE OF proto ON {table}\n\
         BEGIN\n  UPDATE {table}_raw SET proto = NEW.proto WHERE id = OLD.id;\nEND;\n\
         DROP TRIGGER IF EXISTS {table}_delete;\n\
         CREATE TRIGGER {table}_delete INSTEAD OF DELETE ON {table}\n\
         BEGIN\n  DELETE FROM {table}_raw WHERE id = OLD.id;\nEND;"
    );

    let mut index_names = Vec::new();
    let mut create_indexes = String::new();

    // One automatic index per strong-selector column.
    for column in columns.iter().filter(|c| c.auto_index) {
        let single = IndexSpec::new(column.name.clone(), vec![column.name.clone()]);
        let (name, statement) = create_index(table, &columns, &single, true);
        index_names.push(name);
        create_indexes.push('\n');
        create_indexes.push_str(&statement);
    }

    // Then any explicit composite indexes.
    for index in &spec.indexes {
        let (name, statement) = create_index(table, &columns, index, false);
        index_names.push(name);
        create_indexes.push('\n');
        create_indexes.push_str(&statement);
    }

    let known = if index_names.is_empty() {
        String::new()
    } else {
        let quoted: Vec<String> = index_names.iter().map(|n| format!("'{n}'")).collect();
        format!(" AND\n  name NOT IN ({})", quoted.join(", "))
    };

    let stale_index_sql = format!(
        "SELECT name FROM sqlite_master WHERE\n\
         \x20 type = 'index' AND tbl_name = '{table}_raw' AND\n\
         \x20 (name LIKE 'proto_index__%' OR name LIKE 'proto_autoindex__%'){known};"
    );

    let schema_sql = format!(
        "BEGIN EXCLUSIVE TRANSACTION;\n{create_raw}\n{create_view}\n\n{create_triggers}\n{create_indexes}\nCOMMIT TRANSACTION;\n"
    );

    Ok(TableScript {
        schema_sql,
        stale_index_sql,
        index_names,
    })
}
