//! Path expression parsing and reflection-based evaluation.
//!
//! A path addresses a value inside a decoded message: `$` is the message
//! itself, `$.phones[0].number` descends through fields and repeated-field
//! elements. Negative indices count back from the end of a repeated field.
//! Enum-typed terminals accept a trailing `.number` (the default) or `.name`.

use prost::Message as _;
use prost_reflect::{DynamicMessage, EnumDescriptor, FieldDescriptor, Kind, ReflectMessage, Value};

use crate::error::{Error, Result};
use crate::registry::{PrototypeCache, Registry};
use crate::value::{warn_unsigned_narrowing, SqlValue};

/// One `.field[index]` step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub field: String,
    pub index: Option<i64>,
}

fn invalid(path: &str, reason: impl Into<String>) -> Error {
    Error::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

/// Parses a path expression into its segments.
///
/// The root `$` parses to an empty segment list. Field names may contain any
/// character except `.` and `[`; indices are signed decimal integers.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let mut rest = path
        .strip_prefix('$')
        .ok_or_else(|| invalid(path, "must begin with '$'"))?;

    let mut segments = Vec::new();
    while !rest.is_empty() {
        rest = rest
            .strip_prefix('.')
            .ok_or_else(|| invalid(path, "expected '.' before field name"))?;

        let name_len = rest.find(['.', '[']).unwrap_or(rest.len());
        if name_len == 0 {
            return Err(invalid(path, "empty field name"));
        }
        let field = rest[..name_len].to_string();
        rest = &rest[name_len..];

        let mut index = None;
        if let Some(after_bracket) = rest.strip_prefix('[') {
            let close = after_bracket
                .find(']')
                .ok_or_else(|| invalid(path, "unterminated index"))?;
            let digits = &after_bracket[..close];
            index = Some(
                digits
                    .parse::<i64>()
                    .map_err(|_| invalid(path, format!("invalid index '{digits}'")))?,
            );
            rest = &after_bracket[close + 1..];
        }

        segments.push(PathSegment { field, index });
    }

    Ok(segments)
}

/// Evaluates `path` against `bytes` decoded as `type_name`.
///
/// Returns the addressed value converted to its SQL representation; the root
/// path returns the input bytes verbatim. When the path lands on an unset
/// field, `default` (if supplied) is returned in place of the field's own
/// declared default.
pub fn extract(
    cache: &mut PrototypeCache,
    registry: &Registry,
    bytes: &[u8],
    type_name: &str,
    path: &str,
    default: Option<&SqlValue>,
) -> Result<SqlValue> {
    let segments = parse_path(path)?;
    let message = cache.decode(registry, type_name, bytes)?;

    if segments.is_empty() {
        return Ok(SqlValue::Blob(bytes.to_vec()));
    }

    eval_segments(message, &segments, default, path)
}

fn eval_segments(
    message: &DynamicMessage,
    segments: &[PathSegment],
    default: Option<&SqlValue>,
    path: &str,
) -> Result<SqlValue> {
    let segment = &segments[0];
    let rest = &segments[1..];

    let descriptor = message.descriptor();
    let field = descriptor
        .get_field_by_name(&segment.field)
        .ok_or_else(|| Error::UnknownField {
            field: segment.field.clone(),
            message_type: descriptor.full_name().to_string(),
        })?;

    if field.is_map() {
        return Err(invalid(path, format!("map field '{}' is not addressable", segment.field)));
    }

    if field.is_list() {
        let Some(raw_index) = segment.index else {
            return Err(invalid(
                path,
                format!("repeated field '{}' requires an index", segment.field),
            ));
        };

        let value = message.get_field(&field);
        let elements = value.as_list().unwrap_or(&[]);
        let len = elements.len() as i64;
        let index = if raw_index < 0 { len + raw_index } else { raw_index };
        if index < 0 || index >= len {
            // Out of range terminates the lookup, not the query.
            return Ok(SqlValue::Null);
        }

        return eval_element(&field, &elements[index as usize], rest, default, path);
    }

    if segment.index.is_some() {
        return Err(invalid(
            path,
            format!("field '{}' is not repeated", segment.field),
        ));
    }

    if !message.has_field(&field) {
        return eval_unset(&field, rest, default, path);
    }

    let value = message.get_field(&field);
    eval_element(&field, &value, rest, default, path)
}

/// Converts a single present field value, descending into sub-messages.
fn eval_element(
    field: &FieldDescriptor,
    value: &Value,
    rest: &[PathSegment],
    default: Option<&SqlValue>,
    path: &str,
) -> Result<SqlValue> {
    match field.kind() {
        Kind::Message(_) => {
            let sub = value
                .as_message()
                .ok_or_else(|| invalid(path, "message field holds a non-message value"))?;
            if rest.is_empty() {
                Ok(SqlValue::Blob(sub.encode_to_vec()))
            } else {
                eval_segments(sub, rest, default, path)
            }
        }
        Kind::Enum(enum_type) => {
            let number = value
                .as_enum_number()
                .ok_or_else(|| invalid(path, "enum field holds a non-enum value"))?;
            eval_enum_suffix(&enum_type, number, rest, path)
        }
        _ => {
            if !rest.is_empty() {
                return Err(invalid(path, "path traverses non-message elements"));
            }
            scalar_value(field, value)
                .ok_or_else(|| invalid(path, "field value has no SQL representation"))
        }
    }
}

/// Handles a path landing on a field the message does not carry.
fn eval_unset(
    field: &FieldDescriptor,
    rest: &[PathSegment],
    default: Option<&SqlValue>,
    path: &str,
) -> Result<SqlValue> {
    if !rest.is_empty() && !matches!(field.kind(), Kind::Enum(_) | Kind::Message(_)) {
        return Err(invalid(path, "path traverses non-message elements"));
    }

    if let Some(default) = default {
        return Ok(default.clone());
    }

    if matches!(field.kind(), Kind::Message(_)) {
        return Ok(SqlValue::Null);
    }

    // Fall back to the field's declared default, custom proto2 defaults
    // included.
    let value = Value::default_value_for_field(field);
    match field.kind() {
        Kind::Enum(enum_type) => {
            let number = value
                .as_enum_number()
                .ok_or_else(|| invalid(path, "enum field has a non-enum default"))?;
            eval_enum_suffix(&enum_type, number, rest, path)
        }
        _ => scalar_value(field, &value)
            .ok_or_else(|| invalid(path, "field default has no SQL representation")),
    }
}

/// Applies the optional `.number` / `.name` suffix to an enum value.
fn eval_enum_suffix(
    enum_type: &EnumDescriptor,
    number: i32,
    rest: &[PathSegment],
    path: &str,
) -> Result<SqlValue> {
    match rest {
        [] => Ok(SqlValue::Integer(i64::from(number))),
        [segment] if segment.index.is_none() && segment.field == "number" => {
            Ok(SqlValue::Integer(i64::from(number)))
        }
        [segment] if segment.index.is_none() && segment.field == "name" => enum_type
            .get_value(number)
            .map(|value| SqlValue::Text(value.name().to_string()))
            .ok_or_else(|| Error::UnknownEnumValue {
                enum_type: enum_type.full_name().to_string(),
                number,
            }),
        _ => Err(invalid(path, "path traverses non-message elements")),
    }
}

/// Maps a scalar reflection value onto its SQL representation.
///
/// Unsigned 64-bit values narrow to the engine's signed integers; the
/// narrowing is diagnosed once per process.
fn scalar_value(field: &FieldDescriptor, value: &Value) -> Option<SqlValue> {
    Some(match value {
        Value::I32(v) => SqlValue::Integer(i64::from(*v)),
        Value::I64(v) => SqlValue::Integer(*v),
        Value::U32(v) => SqlValue::Integer(i64::from(*v)),
        Value::U64(v) => {
            warn_unsigned_narrowing(field.full_name());
            SqlValue::Unsigned(*v)
        }
        Value::F32(v) => SqlValue::Real(f64::from(*v)),
        Value::F64(v) => SqlValue::Real(*v),
        Value::Bool(v) => SqlValue::from(*v),
        Value::String(v) => SqlValue::Text(v.clone()),
        Value::Bytes(v) => SqlValue::Blob(v.to_vec()),
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn segment(field: &str, index: Option<i64>) -> PathSegment {
        PathSegment {
            field: field.to_string(),
            index,
        }
    }

    #[test]
    fn test_parse_root() {
        assert_eq!(parse_path("$").unwrap(), vec![]);
    }

    #[test]
    fn test_parse_single_field() {
        assert_eq!(parse_path("$.i64").unwrap(), vec![segment("i64", None)]);
    }

    #[test]
    fn test_parse_nested_with_indices() {
        assert_eq!(
            parse_path("$.phones[0].number").unwrap(),
            vec![segment("phones", Some(0)), segment("number", None)]
        );
        assert_eq!(
            parse_path("$.items[-1]").unwrap(),
            vec![segment("items", Some(-1))]
        );
    }

    #[rstest]
    #[case("")]
    #[case("items")]
    #[case(".items")]
    #[case("$items")]
    #[case("$.")]
    #[case("$.items[")]
    #[case("$.items[]")]
    #[case("$.items[abc]")]
    #[case("$.items[1")]
    #[case("$..items")]
    fn test_parse_rejects_malformed(#[case] path: &str) {
        assert!(matches!(
            parse_path(path),
            Err(Error::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_parse_error_carries_path() {
        let err = parse_path("$.items[]").unwrap_err();
        let Error::InvalidPath { path, .. } = err else {
            panic!("expected InvalidPath");
        };
        assert_eq!(path, "$.items[]");
    }

    #[test]
    fn test_parse_index_after_index_requires_dot() {
        // `[0][1]` has no grammar production; the second bracket must follow
        // a field name.
        assert!(parse_path("$.items[0][1]").is_err());
    }
}
