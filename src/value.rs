//! SQL value model used by the extraction engine and the bind layer.

use std::sync::Once;

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::ToSql;

static NARROWING_WARNING: Once = Once::new();

/// Emits the unsigned-narrowing diagnostic once per process.
///
/// SQLite has no unsigned 64-bit representation, so u64 values are stored as
/// their two's-complement i64 bit pattern.
pub(crate) fn warn_unsigned_narrowing(context: &str) {
    NARROWING_WARNING.call_once(|| {
        tracing::warn!(
            context,
            "unsigned 64-bit value narrowed to a signed SQLite integer"
        );
    });
}

/// A value bound to or produced for the SQL engine.
///
/// One variant per representable SQL type, dispatched by a single `ToSql`
/// match. `Unsigned` exists so callers can hand over u64s without deciding
/// the narrowing policy themselves; `ZeroBlob` reserves an all-zero blob of
/// the given size without materializing it.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Unsigned(u64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    ZeroBlob(u64),
}

impl SqlValue {
    /// True when the value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Unsigned(u) => {
                if *u > i64::MAX as u64 {
                    warn_unsigned_narrowing("bind");
                }
                ToSqlOutput::Owned(Value::Integer(*u as i64))
            }
            SqlValue::Real(f) => ToSqlOutput::Owned(Value::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            SqlValue::ZeroBlob(n) => ToSqlOutput::ZeroBlob(*n as i32),
        })
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        // SQLite convention: true is 1.
        SqlValue::Integer(i64::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bound(value: &SqlValue) -> ToSqlOutput<'_> {
        value.to_sql().expect("bind should not fail")
    }

    #[test]
    fn test_bind_null() {
        assert!(matches!(bound(&SqlValue::Null), ToSqlOutput::Owned(Value::Null)));
    }

    #[test]
    fn test_bind_integer() {
        assert!(matches!(
            bound(&SqlValue::Integer(17)),
            ToSqlOutput::Owned(Value::Integer(17))
        ));
    }

    #[test]
    fn test_bind_unsigned_wraps_to_bit_pattern() {
        let out = bound(&SqlValue::Unsigned(u64::MAX));
        assert!(matches!(out, ToSqlOutput::Owned(Value::Integer(-1))));
    }

    #[test]
    fn test_bind_text_and_blob_borrow() {
        let text = SqlValue::Text("hello".to_string());
        assert!(matches!(
            bound(&text),
            ToSqlOutput::Borrowed(ValueRef::Text(b"hello"))
        ));

        let blob = SqlValue::Blob(vec![1, 2, 3]);
        assert!(matches!(
            bound(&blob),
            ToSqlOutput::Borrowed(ValueRef::Blob(&[1, 2, 3]))
        ));
    }

    #[test]
    fn test_bool_maps_true_to_one() {
        assert_eq!(SqlValue::from(true), SqlValue::Integer(1));
        assert_eq!(SqlValue::from(false), SqlValue::Integer(0));
    }

    #[test]
    fn test_from_value_ref() {
        assert_eq!(SqlValue::from(ValueRef::Null), SqlValue::Null);
        assert_eq!(SqlValue::from(ValueRef::Integer(5)), SqlValue::Integer(5));
        assert_eq!(
            SqlValue::from(ValueRef::Text(b"abc")),
            SqlValue::Text("abc".to_string())
        );
    }
}
