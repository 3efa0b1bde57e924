//! Connection wrapper with nestable transactions and write batching.
//!
//! SQLite does not nest transactions, so [`ProtoDb`] counts scope depth and
//! only touches the real transaction on transitions between depth 0 and 1. Two kinds of
//! scope exist: plain transactions (opened for correctness) and batch
//! transactions (opened purely for write throughput). While every open scope
//! is a batch scope, the wrapper may commit and immediately reopen the real
//! transaction at any point to flush accumulated writes; a single plain scope
//! anywhere in the stack pins the transaction open, since its caller may
//! rely on atomicity across the whole nested region.
//!
//! Rolling back through this wrapper is rarely a good idea: a ROLLBACK
//! discards every overlapping scope, not just the innermost one.

use rusqlite::{named_params, Connection};

use crate::error::Result;

/// Default write count between autocommit flushes.
///
/// High enough to amortise the commit fsync, low enough that the write
/// journal stays inside the page cache.
pub const DEFAULT_BATCH_SIZE: u32 = 20_000;

/// A SQLite connection with transaction and autocommit depth counters.
///
/// The counters are not synchronized; a `ProtoDb` must stay confined to the
/// thread that owns the connection.
#[derive(Debug)]
pub struct ProtoDb {
    conn: Connection,
    write_count: u32,
    batch_size: u32,
    transaction_depth: usize,
    autocommit_depth: usize,
}

impl ProtoDb {
    /// Wraps an open connection. The real transaction state must be idle.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            write_count: 0,
            batch_size: 0,
            transaction_depth: 0,
            autocommit_depth: 0,
        }
    }

    /// Sets the autocommit flush threshold; 0 selects the default.
    pub fn set_batch_size(&mut self, batch_size: u32) {
        self.batch_size = batch_size;
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Consumes the wrapper, handing the connection back.
    pub fn into_inner(self) -> Connection {
        self.conn
    }

    pub fn transaction_depth(&self) -> usize {
        self.transaction_depth
    }

    pub fn write_count(&self) -> u32 {
        self.write_count
    }

    /// Opens one transaction scope.
    ///
    /// Only the 0 to 1 transition opens a real transaction; the depth is not
    /// incremented when that fails.
    pub fn transaction_begin(&mut self) -> Result<()> {
        if self.transaction_depth > 0 {
            self.transaction_depth += 1;
            return Ok(());
        }

        self.conn.execute_batch("BEGIN IMMEDIATE TRANSACTION;")?;
        self.transaction_depth = 1;
        Ok(())
    }

    /// Closes one transaction scope, committing on the last.
    ///
    /// Commit failure aborts the process: callers of the inner scopes already
    /// believe their writes are ordered, and there is no state to which the
    /// wrapper could roll back.
    pub fn transaction_end(&mut self) {
        assert!(self.transaction_depth > 0, "transaction_end without begin");
        self.transaction_depth -= 1;
        if self.transaction_depth > 0 {
            // A non-batch scope may just have closed; cycle if we now can.
            self.count_writes(0);
            return;
        }

        self.write_count = 0;
        if let Err(e) = self.conn.execute_batch("COMMIT TRANSACTION;") {
            tracing::error!(error = %e, "failed to commit sqlite transaction");
            std::process::abort();
        }
    }

    /// Opens one batch (autocommit-eligible) transaction scope.
    pub fn batch_begin(&mut self) -> Result<()> {
        self.transaction_begin()?;
        self.autocommit_depth += 1;
        debug_assert!(self.autocommit_depth <= self.transaction_depth);
        Ok(())
    }

    /// Closes one batch transaction scope.
    ///
    /// The autocommit counter drops before the scope closes so that the
    /// cycling check inside [`transaction_end`](Self::transaction_end) sees
    /// only the scopes that remain open.
    pub fn batch_end(&mut self) {
        assert!(self.autocommit_depth > 0, "batch_end without batch_begin");
        self.autocommit_depth -= 1;
        self.transaction_end();
    }

    /// Records `n` write operations, flushing when the batch threshold is
    /// reached and every open scope is a batch scope.
    ///
    /// The counter saturates at the threshold while a plain scope pins the
    /// transaction, so the flush happens as soon as the last plain scope
    /// closes. Cycling failure aborts, as with commit failure.
    pub fn count_writes(&mut self, n: u32) {
        if self.transaction_depth == 0 {
            return;
        }

        let batch_size = if self.batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        };

        if self.write_count < batch_size && n < batch_size - self.write_count {
            self.write_count += n;
            return;
        }

        self.write_count = batch_size;
        if self.autocommit_depth < self.transaction_depth {
            return;
        }

        self.write_count = 0;
        if let Err(e) = self
            .conn
            .execute_batch("COMMIT TRANSACTION; BEGIN IMMEDIATE TRANSACTION;")
        {
            tracing::error!(error = %e, "failed to cycle sqlite transaction");
            std::process::abort();
        }
    }

    /// See [`paginate`].
    pub fn paginate(&self, table: &str, begin: i64, wanted: u64) -> Result<i64> {
        paginate(&self.conn, table, begin, wanted)
    }
}

/// Finds the last id of a page of up to `wanted` rows with `id > begin`.
///
/// Returns `begin` itself when no further rows exist, which makes the return
/// value directly usable as the next call's `begin`.
pub fn paginate(conn: &Connection, table: &str, begin: i64, wanted: u64) -> Result<i64> {
    let quoted = table.replace('"', "\"\"");
    let sql = format!(
        " SELECT COALESCE(MAX(id), :begin)\
         \n FROM (\
         \n   SELECT id\
         \n   FROM \"{quoted}\"\
         \n   WHERE id > :begin\
         \n   ORDER BY id ASC\
         \n   LIMIT :wanted\
         \n )"
    );

    let mut stmt = conn.prepare(&sql)?;
    let last = stmt.query_row(
        named_params! { ":begin": begin, ":wanted": wanted as i64 },
        |row| row.get(0),
    )?;
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> ProtoDb {
        ProtoDb::new(Connection::open_in_memory().expect("open in-memory db"))
    }

    #[test]
    fn test_nested_scopes_commit_once() {
        let mut db = db();

        db.transaction_begin().unwrap();
        db.transaction_begin().unwrap();
        assert_eq!(db.transaction_depth(), 2);
        assert!(!db.conn().is_autocommit());

        db.transaction_end();
        assert!(!db.conn().is_autocommit(), "inner end must not commit");

        db.transaction_end();
        assert!(db.conn().is_autocommit(), "outer end commits");
        assert_eq!(db.transaction_depth(), 0);
    }

    #[test]
    fn test_begin_failure_leaves_depth_untouched() {
        let mut db = db();

        // Occupy the real transaction behind the wrapper's back.
        db.conn().execute_batch("BEGIN EXCLUSIVE;").unwrap();
        assert!(db.transaction_begin().is_err());
        assert_eq!(db.transaction_depth(), 0);
        db.conn().execute_batch("COMMIT;").unwrap();
    }

    #[test]
    fn test_count_writes_outside_transaction_is_noop() {
        let mut db = db();
        db.count_writes(1000);
        assert_eq!(db.write_count(), 0);
    }

    #[test]
    fn test_count_writes_accumulates_below_threshold() {
        let mut db = db();
        db.set_batch_size(100);

        db.batch_begin().unwrap();
        db.count_writes(40);
        db.count_writes(40);
        assert_eq!(db.write_count(), 80);
        db.batch_end();
        assert_eq!(db.write_count(), 0);
    }

    #[test]
    fn test_batch_only_scopes_cycle_at_threshold() {
        let mut db = db();
        db.set_batch_size(10);

        db.batch_begin().unwrap();
        db.count_writes(10);
        // The flush resets the counter and keeps the real transaction open.
        assert_eq!(db.write_count(), 0);
        assert!(!db.conn().is_autocommit());
        db.batch_end();
        assert!(db.conn().is_autocommit());
    }

    #[test]
    fn test_plain_scope_pins_the_transaction() {
        let mut db = db();
        db.set_batch_size(10);

        db.transaction_begin().unwrap();
        db.batch_begin().unwrap();
        db.count_writes(10);
        // Saturated, not flushed: a plain scope is still open.
        assert_eq!(db.write_count(), 10);

        db.batch_end();
        // The surviving scope is plain, so closing the batch must not cycle.
        assert_eq!(db.write_count(), 10);
        assert!(!db.conn().is_autocommit());

        db.transaction_end();
        assert!(db.conn().is_autocommit());
        assert_eq!(db.write_count(), 0);
    }

    #[test]
    fn test_saturated_counter_flushes_once_plain_scope_closes() {
        let mut db = db();
        db.set_batch_size(10);

        db.batch_begin().unwrap();
        db.transaction_begin().unwrap();
        db.count_writes(10);
        assert_eq!(db.write_count(), 10);

        // Closing the inner plain scope leaves only batch scopes open, so
        // the pending flush fires.
        db.transaction_end();
        assert_eq!(db.write_count(), 0);
        assert!(!db.conn().is_autocommit());

        db.batch_end();
        assert!(db.conn().is_autocommit());
    }

    #[test]
    fn test_paginate_walks_pages() {
        let db = db();
        db.conn()
            .execute_batch(
                "CREATE TABLE t (id INTEGER PRIMARY KEY);
                 INSERT INTO t (id) VALUES (1), (2), (3), (4), (5);",
            )
            .unwrap();

        assert_eq!(db.paginate("t", 0, 3).unwrap(), 3);
        assert_eq!(db.paginate("t", 3, 3).unwrap(), 5);
        // Past the end, the begin id comes back unchanged.
        assert_eq!(db.paginate("t", 5, 3).unwrap(), 5);
    }

    #[test]
    fn test_paginate_empty_table_returns_begin() {
        let db = db();
        db.conn()
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);")
            .unwrap();
        assert_eq!(db.paginate("t", 42, 10).unwrap(), 42);
    }
}
