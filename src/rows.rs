//! Result rows, growable row collections, and the row upsert path.
//!
//! Rows own their decoded message and serialized bytes; moving a row into a
//! list transfers that ownership and leaves the source row empty. The
//! container is generic over the payload type, so generated prost types and
//! [`DynamicMessage`] share the same collection and upsert machinery.

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use rusqlite::types::ValueRef;
use rusqlite::{named_params, Connection, Rows, Statement};

use crate::error::{Error, Result};

/// One query result row: an id plus the row's payload in decoded and/or
/// serialized form.
///
/// An id of 0 marks a row not yet assigned a primary key; upserting such a
/// row inserts it and fills the id in. When both forms are present they
/// describe the same payload byte for byte.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow<M = DynamicMessage> {
    pub id: i64,
    pub message: Option<M>,
    pub bytes: Option<Vec<u8>>,
}

impl<M> ResultRow<M> {
    pub fn new(id: i64, message: Option<M>, bytes: Option<Vec<u8>>) -> Self {
        Self { id, message, bytes }
    }

    /// A row holding a message that has not been stored yet.
    pub fn for_insert(message: M) -> Self {
        Self::new(0, Some(message), None)
    }

    /// Moves the row out, leaving the empty row behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Drops the row's contents and returns it to the empty state.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Size of the serialized payload, 0 when absent.
    pub fn byte_len(&self) -> usize {
        self.bytes.as_ref().map_or(0, Vec::len)
    }
}

impl<M> Default for ResultRow<M> {
    fn default() -> Self {
        Self {
            id: 0,
            message: None,
            bytes: None,
        }
    }
}

/// A growable, ownership-taking collection of result rows.
#[derive(Debug)]
pub struct ResultList<M = DynamicMessage> {
    rows: Vec<ResultRow<M>>,
}

impl<M> Default for ResultList<M> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<M> ResultList<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.rows.capacity()
    }

    pub fn rows(&self) -> &[ResultRow<M>] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ResultRow<M>> {
        self.rows.iter()
    }

    /// Removes and returns the last row, if any.
    pub fn pop(&mut self) -> Option<ResultRow<M>> {
        self.rows.pop()
    }

    /// Drops every row and releases the backing storage.
    pub fn reset(&mut self) {
        self.rows = Vec::new();
    }

    /// Grows the backing storage for `additional` more rows.
    ///
    /// Capacity at least doubles each time, from a floor of 8, so repeated
    /// single-row pushes stay amortized-constant. Failure leaves the list
    /// unchanged.
    fn reserve_for(&mut self, additional: usize) -> Result<()> {
        let want = self
            .rows
            .len()
            .checked_add(additional)
            .ok_or(Error::ListCapacity)?;
        if want <= self.rows.capacity() {
            return Ok(());
        }

        let mut goal = self.rows.capacity();
        while goal < want {
            goal = goal.checked_mul(2).ok_or(Error::ListCapacity)?.max(8);
        }
        self.rows.try_reserve_exact(goal - self.rows.len())?;
        Ok(())
    }

    /// Appends `row`, taking ownership of its contents and resetting it.
    ///
    /// The only failure is allocation exhaustion, which leaves both the list
    /// and the source row untouched.
    pub fn push(&mut self, row: &mut ResultRow<M>) -> Result<()> {
        self.reserve_for(1)?;
        self.rows.push(row.take());
        Ok(())
    }
}

impl<M> IntoIterator for ResultList<M> {
    type Item = ResultRow<M>;
    type IntoIter = std::vec::IntoIter<ResultRow<M>>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Appends query results to `list`, decoding payloads with `decode`.
///
/// Each stepped row must yield an integer id in column 0; column 1, when
/// present and non-NULL, is the payload blob, copied into an owned buffer.
/// `decode` receives the id and bytes and may return `Ok(None)` to skip
/// decoding. A decode error aborts the populate with rows appended so far
/// left intact.
pub fn populate_with<M, F>(list: &mut ResultList<M>, mut decode: F, rows: &mut Rows<'_>) -> Result<()>
where
    F: FnMut(i64, &[u8]) -> Result<Option<M>>,
{
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;

        let bytes: Option<Vec<u8>> = match row.get_ref(1) {
            Ok(ValueRef::Null) => None,
            Ok(ValueRef::Blob(b)) => Some(b.to_vec()),
            Ok(ValueRef::Text(t)) => Some(t.to_vec()),
            Ok(other) => {
                return Err(Error::Sqlite(rusqlite::Error::InvalidColumnType(
                    1,
                    "proto".to_string(),
                    other.data_type(),
                )))
            }
            // A one-column result set is fine: the row just has no payload.
            Err(rusqlite::Error::InvalidColumnIndex(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let message = match &bytes {
            Some(bytes) => decode(id, bytes)?,
            None => None,
        };

        let mut row = ResultRow::new(id, message, bytes);
        list.push(&mut row)?;
    }

    Ok(())
}

/// Appends query results to `list`, reflection-decoding payloads as
/// `message_type` when one is supplied.
pub fn populate(
    list: &mut ResultList<DynamicMessage>,
    message_type: Option<&MessageDescriptor>,
    rows: &mut Rows<'_>,
) -> Result<()> {
    populate_with(
        list,
        |id, bytes| match message_type {
            Some(descriptor) => DynamicMessage::decode(descriptor.clone(), bytes)
                .map(Some)
                .map_err(|source| Error::RowDecode {
                    row_id: id,
                    message_type: descriptor.full_name().to_string(),
                    source,
                }),
            None => Ok(None),
        },
        rows,
    )
}

/// Lazily-prepared insert/update statements for one table.
struct RowWriter<'conn> {
    conn: &'conn Connection,
    table_name: &'conn str,
    insert: Option<Statement<'conn>>,
    update: Option<Statement<'conn>>,
}

impl<'conn> RowWriter<'conn> {
    fn new(conn: &'conn Connection, table_name: &'conn str) -> Self {
        Self {
            conn,
            table_name,
            insert: None,
            update: None,
        }
    }

    fn upsert<M: Message>(&mut self, row: &mut ResultRow<M>) -> Result<()> {
        if row.id == 0 {
            self.insert(row)
        } else {
            self.update(row)
        }
    }

    /// Serializes the row's message into its bytes slot if needed.
    ///
    /// A row with neither form binds SQL NULL, which the raw table's NOT
    /// NULL constraint rejects on insert.
    fn ensure_bytes<M: Message>(row: &mut ResultRow<M>) {
        if row.bytes.is_none() {
            if let Some(message) = &row.message {
                row.bytes = Some(message.encode_to_vec());
            }
        }
    }

    fn insert<M: Message>(&mut self, row: &mut ResultRow<M>) -> Result<()> {
        if self.insert.is_none() {
            // Insert against the raw table: the INSTEAD OF triggers on the
            // view make RETURNING unusable there.
            let sql = format!(
                " INSERT INTO {}_raw(proto) VALUES (:proto) RETURNING id",
                self.table_name
            );
            self.insert = Some(self.conn.prepare(&sql)?);
        }
        let stmt = self.insert.as_mut().expect("insert statement prepared above");

        Self::ensure_bytes(row);
        row.id = stmt.query_row(named_params! { ":proto": row.bytes }, |r| r.get(0))?;
        Ok(())
    }

    fn update<M: Message>(&mut self, row: &mut ResultRow<M>) -> Result<()> {
        if self.update.is_none() {
            let sql = format!(
                " UPDATE {} SET proto = :proto WHERE id = :id",
                self.table_name
            );
            self.update = Some(self.conn.prepare(&sql)?);
        }
        let stmt = self.update.as_mut().expect("update statement prepared above");

        Self::ensure_bytes(row);
        stmt.execute(named_params! { ":proto": row.bytes, ":id": row.id })?;
        Ok(())
    }
}

/// Upserts every row of `input` into `table_name`, in order.
///
/// Rows with id 0 are inserted (capturing the assigned id); others are
/// updated by id. Each processed row moves from `input` to `output` with
/// ownership transferred. On the first failure processing stops: `output`
/// holds the succeeded prefix, `input` exactly the unprocessed suffix
/// (compacted to its front), and the first error is returned.
///
/// No transaction is opened here; wrap bulk calls in [`crate::ProtoDb`]
/// scopes for atomicity and throughput.
pub fn upsert_rows<M: Message>(
    conn: &Connection,
    output: &mut ResultList<M>,
    input: &mut ResultList<M>,
    table_name: &str,
) -> Result<()> {
    // Preallocate so transferring ownership below can never fail midway.
    output.reserve_for(input.len())?;

    let mut writer = RowWriter::new(conn, table_name);
    let mut num_done = 0;
    let mut result = Ok(());

    while num_done < input.rows.len() {
        let row = &mut input.rows[num_done];
        if let Err(e) = writer.upsert(row) {
            result = Err(e);
            break;
        }
        output.rows.push(row.take());
        num_done += 1;
    }

    input.rows.drain(..num_done);
    result
}

/// Upserts a single row, updating its id and bytes in place.
pub fn upsert_row<M: Message>(
    conn: &Connection,
    row: &mut ResultRow<M>,
    table_name: &str,
) -> Result<()> {
    let mut writer = RowWriter::new(conn, table_name);
    writer.upsert(row)
}
