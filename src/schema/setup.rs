//! Schema setup: executing a generated script and collecting stale indexes.

use rusqlite::Connection;

use crate::error::Result;
use crate::schema::generator::{generate, TableScript};
use crate::schema::spec::TableSpec;

/// Brings the spec'd table, view, triggers, and indexes into the expected
/// state on `conn`.
///
/// On the first call with an empty `cache` slot the script is generated from
/// `spec` and stored; a non-empty slot must have been populated by a prior
/// call for the *same* spec; it is trusted without re-validation. After the
/// script runs, any index matching the generated naming convention that the
/// script did not produce is dropped.
///
/// Script generation failures (an invalid spec) leave the database untouched.
pub fn setup(
    cache: &mut Option<TableScript>,
    conn: &Connection,
    spec: &TableSpec,
) -> Result<()> {
    if cache.is_none() {
        let script = generate(spec)?;
        if spec.log_sql {
            tracing::info!(table = %spec.name, sql = %script.schema_sql, "generated proto table SQL");
        }
        *cache = Some(script);
    }
    let script = cache.as_ref().expect("setup cache populated above");

    conn.execute_batch(&script.schema_sql)?;

    let stale: Vec<String> = {
        let mut stmt = conn.prepare(&script.stale_index_sql)?;
        let names = stmt.query_map([], |row| row.get(0))?;
        names.collect::<rusqlite::Result<_>>()?
    };

    for name in stale {
        tracing::warn!(table = %spec.name, index = %name, "dropping stale proto index");
        conn.execute_batch(&format!("DROP INDEX IF EXISTS \"{name}\";"))?;
    }

    Ok(())
}
